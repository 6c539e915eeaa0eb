use anyhow::{Context, Result};
use lofty::config::WriteOptions;
use lofty::prelude::*;
use lofty::read_from_path;
use lofty::tag::{Tag, TagType};
use std::path::Path;

/// Writes title/artist into a finished track.
pub trait TagWriter: Send + Sync {
    fn write_tags(&self, path: &Path, title: &str, artist: &str) -> Result<()>;
}

/// ID3v2 tags through lofty.
#[derive(Debug, Default, Clone, Copy)]
pub struct Id3Tags;

impl TagWriter for Id3Tags {
    fn write_tags(&self, path: &Path, title: &str, artist: &str) -> Result<()> {
        let tagged_file = read_from_path(path).context("Failed to read file")?;

        // Keep any frames already there (cover art, album) and only touch ours
        let mut tag = match tagged_file.tag(TagType::Id3v2) {
            Some(t) => t.clone(),
            None => Tag::new(TagType::Id3v2),
        };
        tag.set_title(title.to_string());
        tag.set_artist(artist.to_string());

        tag.save_to_path(path, WriteOptions::default())
            .context("Failed to save tags to disk")?;
        Ok(())
    }
}

/// Title and artist as stored in the file, if any.
pub fn read_tags(path: &Path) -> Result<(Option<String>, Option<String>)> {
    let tagged_file = read_from_path(path).context("Failed to read file")?;
    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag());

    let title = tag.and_then(|t| t.title().map(|s| s.to_string()));
    let artist = tag.and_then(|t| t.artist().map(|s| s.to_string()));
    Ok((title, artist))
}
