use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;

use crate::library::{self, AUDIO_EXT};
use crate::sync::{EventSender, SyncEvent};
use crate::tags::TagWriter;
use crate::ytdlp::{FinishedDownload, MediaSource, PlaylistEntry, Quality};

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub playlist_size: usize,
    pub missing: usize,
    pub downloaded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(PassReport),
    /// Nothing was downloaded; the reason has been logged.
    Aborted(String),
}

/// `round(done / total * 100)`, clamped to 0..=100.
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) as f64 / total as f64) * 100.0).round() as u8
}

/// Entries whose id is not yet on disk, in playlist order, each id once.
pub fn missing_entries(
    entries: Vec<PlaylistEntry>,
    known: &HashSet<String>,
) -> Vec<PlaylistEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| {
            let id = e.id.to_lowercase();
            !known.contains(&id) && seen.insert(id)
        })
        .collect()
}

/// One resolve / diff / download pass over a playlist.
pub struct DownloadOrchestrator {
    music_dir: PathBuf,
    source: Arc<dyn MediaSource>,
    tagger: Arc<dyn TagWriter>,
}

impl DownloadOrchestrator {
    pub fn new(
        music_dir: &Path,
        source: Arc<dyn MediaSource>,
        tagger: Arc<dyn TagWriter>,
    ) -> Self {
        Self {
            music_dir: music_dir.to_path_buf(),
            source,
            tagger,
        }
    }

    pub async fn run_pass(
        &self,
        playlist_url: &str,
        quality: Quality,
        events: &EventSender,
    ) -> PassOutcome {
        log::info!("Starting download of missing songs");

        let dir = self.music_dir.clone();
        let known = match task::spawn_blocking(move || library::known_ids(&dir)).await {
            Ok(Ok(k)) => k,
            Ok(Err(e)) => {
                return self.abort(format!("Music folder could not be read: {e:#}"), events)
            }
            Err(e) => return self.abort(format!("Music folder scan failed: {e}"), events),
        };

        let entries = match self.source.resolve_playlist(playlist_url).await {
            Ok(entries) => entries,
            Err(e) => return self.abort(format!("Playlist could not be fetched: {e}"), events),
        };

        let playlist_size = entries.len();
        let missing = missing_entries(entries, &known);
        log::info!(
            "Missing songs: {} of {} ({})",
            missing.len(),
            playlist_size,
            missing.iter().map(|e| e.id.as_str()).collect::<Vec<_>>().join(", ")
        );
        let _ = events.send(SyncEvent::PassStarted {
            playlist_size,
            missing: missing.len(),
        });

        let mut report = PassReport {
            playlist_size,
            missing: missing.len(),
            ..PassReport::default()
        };
        for (i, entry) in missing.iter().enumerate() {
            match self.source.download_audio(&entry.webpage_url, quality).await {
                Ok(finished) => {
                    for f in &finished {
                        self.tag_finished(f).await;
                    }
                    report.downloaded += 1;
                }
                Err(e) => {
                    log::error!("{} could not be downloaded: {e}", entry.webpage_url);
                    report.failed += 1;
                    let _ = events.send(SyncEvent::EntryFailed {
                        url: entry.webpage_url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            let _ = events.send(SyncEvent::Progress(progress_percent(i + 1, missing.len())));
        }

        log::info!(
            "Sync pass finished: {} downloaded, {} failed",
            report.downloaded,
            report.failed
        );
        let _ = events.send(SyncEvent::PassFinished(report.clone()));
        PassOutcome::Completed(report)
    }

    fn abort(&self, reason: String, events: &EventSender) -> PassOutcome {
        log::error!("{reason}");
        let _ = events.send(SyncEvent::PassAborted(reason.clone()));
        PassOutcome::Aborted(reason)
    }

    /// The "finished" hook: tag the mp3 with cleaned-up title and uploader.
    /// A tagging failure leaves the file untagged but keeps it.
    async fn tag_finished(&self, done: &FinishedDownload) {
        let path = done.filepath.clone();
        if !path.to_string_lossy().ends_with(AUDIO_EXT) {
            return;
        }
        let title = clean_or_unknown(done.title.as_deref());
        let artist = clean_or_unknown(done.uploader.as_deref());
        let tagger = Arc::clone(&self.tagger);
        let target = path.clone();
        let written = task::spawn_blocking(move || tagger.write_tags(&target, &title, &artist))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r);
        match written {
            Ok(()) => log::info!("{} downloaded and tagged", path.display()),
            Err(e) => log::error!("{} ID3 tag error: {e:#}", path.display()),
        }
    }
}

fn clean_or_unknown(text: Option<&str>) -> String {
    let cleaned = library::sanitize(text.unwrap_or(UNKNOWN));
    if cleaned.is_empty() {
        UNKNOWN.to_string()
    } else {
        cleaned
    }
}
