use std::time::Duration;

pub const APP_TITLE: &str = "ETS2 OtoRadio";

/// Fire-and-forget user notification. Implementations must not block and
/// give no delivery guarantee.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str, timeout: Duration);
}

/// Records the notice in the log; the log sink echoes it to the terminal
/// as a `[warn]` line.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, title: &str, message: &str, _timeout: Duration) {
        log::warn!("{title}: {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn notice_is_written_once() {
        let log = crate::logging::test_log();
        ConsoleNotifier.notify(APP_TITLE, "Music folder is read-only", Duration::from_secs(10));

        let logged = fs::read_to_string(log).unwrap();
        let hits = logged
            .lines()
            .filter(|l| l.ends_with(" - ETS2 OtoRadio: Music folder is read-only"))
            .count();
        assert_eq!(hits, 1);
    }
}
