use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::str::FromStr;
use thiserror::Error;
use tokio::process::Command;

/// Output template for finished tracks; the bracketed id is what the
/// library scanner keys on.
pub const OUTPUT_TEMPLATE: &str = "%(title).80s [%(id)s].%(ext)s";
/// Square brackets removed from the title before it reaches the file name,
/// so the id is always the first bracket pair.
pub const TITLE_BRACKETS: &str = r"[\[\]]";
const FINISHED_PRINT: &str = "after_move:%(.{filepath,title,uploader})j";

// ---------- Types ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    Kbps128,
    #[default]
    Kbps192,
    Kbps320,
}

impl Quality {
    pub fn kbps(self) -> u16 {
        match self {
            Quality::Kbps128 => 128,
            Quality::Kbps192 => 192,
            Quality::Kbps320 => 320,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kbps())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_end_matches(['k', 'K']) {
            "128" => Ok(Quality::Kbps128),
            "192" => Ok(Quality::Kbps192),
            "320" => Ok(Quality::Kbps320),
            other => Err(format!("unsupported quality {other:?}, use 128, 192 or 320")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub id: String,
    pub webpage_url: String,
}

/// What the downloader reports once a track has been moved into place.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FinishedDownload {
    pub filepath: PathBuf,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("could not start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("yt-dlp exited with {code}: {stderr}")]
    Failed { code: String, stderr: String },
    #[error("unreadable yt-dlp output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The download library seam: playlist resolution plus one-entry audio
/// downloads.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn resolve_playlist(&self, url: &str) -> Result<Vec<PlaylistEntry>, SourceError>;

    /// Downloads and transcodes one entry; returns every file the
    /// downloader reported as finished.
    async fn download_audio(
        &self,
        url: &str,
        quality: Quality,
    ) -> Result<Vec<FinishedDownload>, SourceError>;
}

// ---------- Output parsing ----------

#[derive(Debug, Deserialize)]
struct RawEntry {
    id: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlaylist {
    #[serde(default)]
    entries: Option<Vec<Option<RawEntry>>>,
    #[serde(flatten)]
    single: RawEntry,
}

impl RawEntry {
    fn into_entry(self) -> Option<PlaylistEntry> {
        let id = self.id.filter(|id| !id.trim().is_empty())?;
        let webpage_url = self
            .webpage_url
            .or(self.url)
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={id}"));
        Some(PlaylistEntry { id, webpage_url })
    }
}

/// Parses `--dump-single-json` output. Unavailable entries (null) and
/// entries without an id are dropped; a bare video resolves to itself.
pub fn parse_playlist(json: &[u8]) -> Result<Vec<PlaylistEntry>, SourceError> {
    let raw: RawPlaylist = serde_json::from_slice(json)?;
    Ok(match raw.entries {
        Some(entries) => entries
            .into_iter()
            .flatten()
            .filter_map(RawEntry::into_entry)
            .collect(),
        None => raw.single.into_entry().into_iter().collect(),
    })
}

/// Picks the JSON lines printed after each move; yt-dlp may interleave
/// other chatter on stdout.
pub fn parse_finished(stdout: &str) -> Vec<FinishedDownload> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .filter_map(|l| match serde_json::from_str::<FinishedDownload>(l) {
            Ok(f) => Some(f),
            Err(e) => {
                log::warn!("Ignoring unexpected yt-dlp line ({e}): {l}");
                None
            }
        })
        .collect()
}

fn stderr_tail(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(3)..].join(" | ")
}

// ---------- yt-dlp executable ----------

/// Drives the `yt-dlp` executable; ffmpeg must be reachable for the mp3
/// post-processing step.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    music_dir: PathBuf,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>, music_dir: &Path) -> Self {
        Self {
            program: program.into(),
            music_dir: music_dir.to_path_buf(),
        }
    }

    fn download_args(&self, url: &str, quality: Quality) -> Vec<String> {
        vec![
            "--format".into(),
            "bestaudio/best".into(),
            "--extract-audio".into(),
            "--audio-format".into(),
            "mp3".into(),
            "--audio-quality".into(),
            format!("{}K", quality.kbps()),
            "--no-playlist".into(),
            "--no-warnings".into(),
            "--no-progress".into(),
            "--no-simulate".into(),
            "--replace-in-metadata".into(),
            "title".into(),
            TITLE_BRACKETS.into(),
            String::new(),
            "--print".into(),
            FINISHED_PRINT.into(),
            "--paths".into(),
            self.music_dir.to_string_lossy().to_string(),
            "--output".into(),
            OUTPUT_TEMPLATE.into(),
            url.into(),
        ]
    }

    async fn run(&self, args: &[String]) -> Result<Output, SourceError> {
        let output = Command::new(&self.program)
            .args(args)
            .env("PYTHONIOENCODING", "UTF-8")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SourceError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(SourceError::Failed {
                code: output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".into()),
                stderr: stderr_tail(&output),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl MediaSource for YtDlp {
    async fn resolve_playlist(&self, url: &str) -> Result<Vec<PlaylistEntry>, SourceError> {
        let args: Vec<String> = vec![
            "--flat-playlist".into(),
            "--skip-download".into(),
            "--no-warnings".into(),
            "--dump-single-json".into(),
            url.into(),
        ];
        let output = self.run(&args).await?;
        parse_playlist(&output.stdout)
    }

    async fn download_audio(
        &self,
        url: &str,
        quality: Quality,
    ) -> Result<Vec<FinishedDownload>, SourceError> {
        let output = self.run(&self.download_args(url, quality)).await?;
        Ok(parse_finished(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// The file name a finished download gets, as yt-dlp renders
/// `OUTPUT_TEMPLATE` once the title has been rewritten.
#[cfg(test)]
pub fn track_file_name(title: &str, id: &str) -> String {
    let stripped = regex::Regex::new(TITLE_BRACKETS)
        .unwrap()
        .replace_all(title, "")
        .into_owned();
    let title: String = stripped.chars().take(80).collect();
    format!("{title} [{id}].mp3")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_parses_the_three_bitrates() {
        assert_eq!("128".parse::<Quality>().unwrap(), Quality::Kbps128);
        assert_eq!("192k".parse::<Quality>().unwrap(), Quality::Kbps192);
        assert_eq!(" 320K ".parse::<Quality>().unwrap(), Quality::Kbps320);
        assert!("256".parse::<Quality>().is_err());
        assert_eq!(Quality::default(), Quality::Kbps192);
    }

    #[test]
    fn playlist_entries_keep_order_and_fall_back_to_url() {
        let json = br#"{
            "_type": "playlist",
            "id": "PLxyz",
            "title": "Road trip",
            "entries": [
                {"id": "aaa111", "url": "https://www.youtube.com/watch?v=aaa111"},
                null,
                {"id": "bbb222", "webpage_url": "https://www.youtube.com/watch?v=bbb222",
                 "url": "https://youtu.be/bbb222"},
                {"title": "[Private video]"},
                {"id": "ccc333"}
            ]
        }"#;
        let entries = parse_playlist(json).unwrap();
        assert_eq!(
            entries,
            vec![
                PlaylistEntry {
                    id: "aaa111".into(),
                    webpage_url: "https://www.youtube.com/watch?v=aaa111".into()
                },
                PlaylistEntry {
                    id: "bbb222".into(),
                    webpage_url: "https://www.youtube.com/watch?v=bbb222".into()
                },
                PlaylistEntry {
                    id: "ccc333".into(),
                    webpage_url: "https://www.youtube.com/watch?v=ccc333".into()
                },
            ]
        );
    }

    #[test]
    fn single_video_resolves_to_itself() {
        let json =
            br#"{"id": "solo42", "webpage_url": "https://www.youtube.com/watch?v=solo42"}"#;
        let entries = parse_playlist(json).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "solo42");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(parse_playlist(b"ERROR: nope"), Err(SourceError::Parse(_))));
    }

    #[test]
    fn finished_lines_are_extracted() {
        let stdout = "[info] something\n\
            {\"filepath\": \"/music/Song [abc].mp3\", \"title\": \"Song\", \"uploader\": \"Bnd\"}\n\
            {\"filepath\": \"/music/Other [def].mp3\", \"title\": \"Other\", \"uploader\": null}\n\
            {broken\n";
        let done = parse_finished(stdout);
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].filepath, PathBuf::from("/music/Song [abc].mp3"));
        assert_eq!(done[0].uploader.as_deref(), Some("Bnd"));
        assert_eq!(done[1].uploader, None);
    }

    #[test]
    fn download_args_request_mp3_at_bitrate_into_music_dir() {
        let ytdlp = YtDlp::new("yt-dlp", Path::new("/music"));
        let args = ytdlp.download_args("https://www.youtube.com/watch?v=abc", Quality::Kbps320);
        let joined = args.join(" ");
        assert!(joined.contains("--audio-format mp3"));
        assert!(joined.contains("--audio-quality 320K"));
        assert!(joined.contains("--paths /music"));
        assert!(joined.contains(&format!("--output {OUTPUT_TEMPLATE}")));
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=abc");
    }

    #[test]
    fn title_brackets_are_stripped_before_naming_the_file() {
        let ytdlp = YtDlp::new("yt-dlp", Path::new("/music"));
        let args = ytdlp.download_args("https://www.youtube.com/watch?v=abc", Quality::Kbps192);
        let at = args
            .iter()
            .position(|a| a == "--replace-in-metadata")
            .expect("title rewrite missing");
        assert_eq!(args[at + 1..at + 4], ["title", r"[\[\]]", ""]);
        assert!(at < args.iter().position(|a| a == "--output").unwrap());

        assert_eq!(
            track_file_name("Song [Official Video]", "abc123"),
            "Song Official Video [abc123].mp3"
        );
        assert_eq!(
            crate::library::track_id(&track_file_name("[HD] Intro", "Zz9")).as_deref(),
            Some("zz9")
        );
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let ytdlp = YtDlp::new("/definitely/not/yt-dlp", Path::new("/music"));
        let err = ytdlp.resolve_playlist("https://example.invalid").await.unwrap_err();
        assert!(matches!(err, SourceError::Spawn { .. }));
    }
}
