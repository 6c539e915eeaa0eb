use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::game::GameDetector;
use crate::notifier::{Notifier, APP_TITLE};
use crate::orchestrator::{DownloadOrchestrator, PassOutcome, PassReport};
use crate::ytdlp::Quality;

pub type EventSender = UnboundedSender<SyncEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Waiting,
    Syncing,
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Terminal: nothing to sync until the user configures a playlist.
    EmptyPlaylist,
    Cancelled,
}

/// Everything the worker tells the UI. The receiving side is the only
/// place that renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    State(SyncState),
    PassStarted { playlist_size: usize, missing: usize },
    /// Percentage in 0..=100, non-decreasing within a pass.
    Progress(u8),
    EntryFailed { url: String, reason: String },
    PassFinished(PassReport),
    PassAborted(String),
    Stopped(StopReason),
}

#[derive(Debug, Clone, Copy)]
pub struct SyncTiming {
    pub poll_interval: Duration,
    pub cooldown: Duration,
}

impl Default for SyncTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Sync without waiting for the game.
    pub bypass: bool,
    pub quality: Quality,
    /// Allow another pass once the game has been seen to exit after a sync.
    pub resync_on_relaunch: bool,
}

pub struct SyncLoop {
    config: Config,
    options: SyncOptions,
    timing: SyncTiming,
    orchestrator: DownloadOrchestrator,
    game: Arc<dyn GameDetector>,
    notifier: Arc<dyn Notifier>,
    events: EventSender,
    cancel: CancellationToken,
}

impl SyncLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        options: SyncOptions,
        timing: SyncTiming,
        orchestrator: DownloadOrchestrator,
        game: Arc<dyn GameDetector>,
        notifier: Arc<dyn Notifier>,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            options,
            timing,
            orchestrator,
            game,
            notifier,
            events,
            cancel,
        }
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    /// Sleeps unless cancelled first; false means stop.
    async fn pause(&self, d: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(d) => true,
        }
    }

    /// The process scan blocks, so it runs off the async threads. A failed
    /// scan counts as "not running".
    async fn game_running(&self) -> bool {
        let game = Arc::clone(&self.game);
        match tokio::task::spawn_blocking(move || game.is_running()).await {
            Ok(running) => running,
            Err(e) => {
                log::error!("Game process check failed: {e}");
                false
            }
        }
    }

    fn stop(&self, reason: StopReason) -> StopReason {
        self.emit(SyncEvent::Stopped(reason));
        reason
    }

    /// Polls until cancelled or the playlist turns out to be empty. At most
    /// one pass runs per process lifetime unless `resync_on_relaunch` is set.
    pub async fn run(self) -> StopReason {
        log::info!("Starting auto sync");
        let mut synced_once = false;
        let mut game_was_running = false;
        self.emit(SyncEvent::State(SyncState::Waiting));

        loop {
            if self.cancel.is_cancelled() {
                return self.stop(StopReason::Cancelled);
            }

            let game_running = !self.options.bypass && self.game_running().await;
            if self.options.resync_on_relaunch
                && synced_once
                && game_was_running
                && !game_running
            {
                log::info!("Game closed; the next launch will sync again");
                synced_once = false;
            }
            game_was_running = game_running;

            if (self.options.bypass || game_running) && !synced_once {
                log::info!("Sync conditions met. Starting download...");
                if !self.config.has_playlist() {
                    self.notifier.notify(
                        APP_TITLE,
                        "No playlist configured! Please add a playlist.",
                        Duration::from_secs(10),
                    );
                    return self.stop(StopReason::EmptyPlaylist);
                }

                self.emit(SyncEvent::State(SyncState::Syncing));
                let pass = self.orchestrator.run_pass(
                    &self.config.youtube_playlist,
                    self.options.quality,
                    &self.events,
                );
                let outcome = tokio::select! {
                    _ = self.cancel.cancelled() => return self.stop(StopReason::Cancelled),
                    outcome = pass => outcome,
                };
                match outcome {
                    PassOutcome::Completed(report) if report.failed > 0 => log::warn!(
                        "{} of {} missing track(s) failed to download and stay missing",
                        report.failed,
                        report.missing
                    ),
                    PassOutcome::Completed(_) => {}
                    PassOutcome::Aborted(reason) => log::warn!("Sync pass aborted: {reason}"),
                }
                synced_once = true;

                self.emit(SyncEvent::State(SyncState::Cooldown));
                if !self.pause(self.timing.cooldown).await {
                    return self.stop(StopReason::Cancelled);
                }
                self.emit(SyncEvent::State(SyncState::Waiting));
            }

            if !self.pause(self.timing.poll_interval).await {
                return self.stop(StopReason::Cancelled);
            }
        }
    }
}
