use std::sync::Mutex;
use sysinfo::{ProcessRefreshKind, RefreshKind, System};

/// Point-in-time check for the game process. Implementations may block;
/// callers on the runtime run them through `spawn_blocking`.
pub trait GameDetector: Send + Sync {
    fn is_running(&self) -> bool;
}

pub struct ProcessMonitor {
    target: String,
    system: Mutex<System>,
}

impl ProcessMonitor {
    pub fn new(executable: &str) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new()),
        );
        Self {
            target: executable.to_lowercase(),
            system: Mutex::new(system),
        }
    }
}

/// Case-insensitive containment, so `eurotrucks2.exe` also matches the
/// `eurotrucks2.exe *32` style names some platforms report.
pub fn name_matches(process_name: &str, target: &str) -> bool {
    process_name.to_lowercase().contains(target)
}

impl GameDetector for ProcessMonitor {
    fn is_running(&self) -> bool {
        // A poisoned lock only means an earlier scan panicked; the System is still usable.
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_processes();
        // sysinfo skips entries it cannot read, so one vanished or
        // protected process never fails the whole scan.
        system
            .processes()
            .values()
            .any(|p| name_matches(p.name(), &self.target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_is_case_insensitive() {
        assert!(name_matches("EuroTruckS2.exe", "eurotrucks2.exe"));
        assert!(name_matches("eurotrucks2", "eurotrucks2"));
        assert!(!name_matches("amtrucks.exe", "eurotrucks2.exe"));
    }

    #[test]
    fn own_process_is_found() {
        let me = std::env::current_exe().unwrap();
        let name = me.file_name().unwrap().to_string_lossy().to_string();
        // Linux truncates comm names to 15 bytes
        let comm: String = name.chars().take(15).collect();
        assert!(ProcessMonitor::new(&comm.to_uppercase()).is_running());
    }

    #[test]
    fn absent_process_is_not_found() {
        assert!(!ProcessMonitor::new("no-such-game-process-xyz").is_running());
    }
}
