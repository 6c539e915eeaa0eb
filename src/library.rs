use anyhow::{anyhow, Context, Result};
use glob::{glob, Pattern};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

pub const AUDIO_EXT: &str = ".mp3";
/// Leftovers of interrupted downloads.
pub const PARTIAL_EXTS: [&str; 2] = ["part", "webm"];

static BRACKET_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\[\]]+)\]").unwrap());
static NOT_TAG_SAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_\s-]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s").unwrap());

// ---------- Music folder scanning ----------

/// The lower-cased identifier of a finished track, taken from the first
/// bracket pair in its name: `Title [abc123].mp3` -> `abc123`.
pub fn track_id(file_name: &str) -> Option<String> {
    if !file_name.ends_with(AUDIO_EXT) {
        return None;
    }
    BRACKET_ID
        .captures(file_name)
        .map(|c| c[1].to_lowercase())
}

fn file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = vec![];
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Ids of every track already present in `dir`. Rebuilt on every call.
pub fn known_ids(dir: &Path) -> Result<HashSet<String>> {
    Ok(file_names(dir)?
        .iter()
        .filter_map(|name| track_id(name))
        .collect())
}

/// Finished tracks in `dir`, sorted by name.
pub fn list_tracks(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut names: Vec<String> = file_names(dir)?
        .into_iter()
        .filter(|n| n.ends_with(AUDIO_EXT))
        .collect();
    names.sort();
    Ok(names.into_iter().map(|n| dir.join(n)).collect())
}

/// Deletes `.part`/`.webm` remnants. Failures are logged per file; returns
/// how many were removed.
pub fn cleanup_partial_downloads(dir: &Path) -> usize {
    let base = Pattern::escape(&dir.to_string_lossy());
    let mut removed = 0;
    for ext in PARTIAL_EXTS {
        let pattern = format!("{base}/*.{ext}");
        let paths = match glob(&pattern) {
            Ok(p) => p,
            Err(e) => {
                log::error!("Invalid cleanup pattern {pattern}: {e}");
                continue;
            }
        };
        for entry in paths {
            let Ok(p) = entry else { continue };
            if !p.is_file() {
                continue;
            }
            match fs::remove_file(&p) {
                Ok(()) => removed += 1,
                Err(e) => log::error!("Temporary file could not be deleted: {} - {e}", p.display()),
            }
        }
    }
    removed
}

/// Resolves a bare file name inside the music folder. Anything that would
/// escape the folder is refused.
pub fn track_path(dir: &Path, file_name: &str) -> Result<PathBuf> {
    let name = Path::new(file_name);
    if name.components().count() != 1 || name.file_name().is_none() {
        return Err(anyhow!("Not a plain file name: {file_name}"));
    }
    Ok(dir.join(name))
}

pub fn remove_track(dir: &Path, file_name: &str) -> Result<PathBuf> {
    let path = track_path(dir, file_name)?;
    fs::remove_file(&path).with_context(|| format!("deleting {}", path.display()))?;
    Ok(path)
}

// ---------- Tag text ----------

/// Makes a title or uploader safe for tags: compatibility-decomposes,
/// drops everything but ASCII word characters, hyphens and whitespace,
/// then turns every remaining whitespace character into an underscore.
pub fn sanitize(text: &str) -> String {
    let decomposed: String = text.nfkd().collect();
    let kept = NOT_TAG_SAFE.replace_all(&decomposed, "");
    WHITESPACE.replace_all(kept.trim(), "_").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn known_ids_are_lowercased_bracket_contents_of_mp3s() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Song [abc123].mp3");
        touch(dir.path(), "Other [XyZ-9_q].mp3");
        touch(dir.path(), "Two [first] [second].mp3");
        touch(dir.path(), "No id at all.mp3");
        touch(dir.path(), "Video [vid000].webm");
        touch(dir.path(), "Half [half01].mp3.part");
        fs::create_dir(dir.path().join("Folder [dir999].mp3")).unwrap();

        let ids = known_ids(dir.path()).unwrap();
        let expected: HashSet<String> = ["abc123", "xyz-9_q", "first"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn track_id_requires_audio_extension() {
        assert_eq!(track_id("Song [ABC].mp3").as_deref(), Some("abc"));
        assert_eq!(track_id("Song [ABC].m4a"), None);
        assert_eq!(track_id("Song [].mp3"), None);
    }

    #[test]
    fn missing_folder_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(known_ids(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn cleanup_removes_only_partial_files() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Song [a].mp3");
        touch(dir.path(), "Song [b].mp3.part");
        touch(dir.path(), "Song [b].webm");
        touch(dir.path(), "notes.txt");

        assert_eq!(cleanup_partial_downloads(dir.path()), 2);

        let mut left = file_names(dir.path()).unwrap();
        left.sort();
        assert_eq!(left, vec!["Song [a].mp3".to_string(), "notes.txt".to_string()]);
    }

    #[test]
    fn cleanup_handles_bracketed_folder_names() {
        let dir = tempdir().unwrap();
        let music = dir.path().join("music [x]");
        fs::create_dir(&music).unwrap();
        touch(&music, "a.part");
        assert_eq!(cleanup_partial_downloads(&music), 1);
    }

    #[test]
    fn list_tracks_is_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "b [2].mp3");
        touch(dir.path(), "a [1].mp3");
        touch(dir.path(), "c.part");
        let tracks = list_tracks(dir.path()).unwrap();
        let names: Vec<_> = tracks
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a [1].mp3", "b [2].mp3"]);
    }

    #[test]
    fn track_path_accepts_only_bare_names() {
        let dir = Path::new("/music");
        assert_eq!(
            track_path(dir, "Song [abc].mp3").unwrap(),
            PathBuf::from("/music/Song [abc].mp3")
        );
        assert!(track_path(dir, "sub/Song [abc].mp3").is_err());
        assert!(track_path(dir, "/etc/passwd").is_err());
        assert!(track_path(dir, "").is_err());
    }

    #[test]
    fn remove_track_refuses_paths() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "a [1].mp3");
        assert!(remove_track(dir.path(), "../a [1].mp3").is_err());
        assert!(remove_track(dir.path(), "..").is_err());
        let removed = remove_track(dir.path(), "a [1].mp3").unwrap();
        assert!(!removed.exists());
    }

    #[test]
    fn sanitize_strips_to_ascii_word_characters() {
        assert_eq!(sanitize("Café del Mar"), "Cafe_del_Mar");
        assert_eq!(sanitize("  AC/DC - Thunder!  "), "ACDC_-_Thunder");
        assert_eq!(sanitize("Şarkı\tÇalışıyor"), "Sark_Calsyor");
        assert_eq!(sanitize("ﬁne ①"), "fine_1");
        let out = sanitize("Ünïcödé  mixed 😀 text (Official Video) [HD]");
        assert!(out
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        assert_eq!(out, "Unicode__mixed__text_Official_Video_HD");
    }
}
