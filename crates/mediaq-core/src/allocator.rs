//! Collision-free output filenames per target directory.
//!
//! A name is free when it neither exists on disk nor is reserved by another
//! job. Taken names get a counter before the extension: `clip (1).mp4`,
//! `clip (2).mp4`, ... Reservations are held until released so two jobs that
//! observe the same engine filename never end up writing the same artifact.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Fallback when a proposed name sanitizes to nothing.
const DEFAULT_FILENAME: &str = "download";

/// Linux NAME_MAX.
const NAME_MAX: usize = 255;

/// Makes an engine-reported name safe to join onto a directory.
///
/// - Replaces NUL, `/`, `\`, and control characters with `_`
/// - Trims leading/trailing spaces and dots
/// - Limits length to 255 bytes
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c == '\0' || c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return DEFAULT_FILENAME.to_string();
    }

    let mut take = trimmed.len().min(NAME_MAX);
    while !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    trimmed[..take].to_string()
}

/// `("clip", ".mp4")` for `clip.mp4`; dotfiles and extensionless names have an empty extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(i) => name.split_at(i),
    }
}

fn numbered(name: &str, n: u32) -> String {
    let (stem, ext) = split_extension(name);
    format!("{stem} ({n}){ext}")
}

fn exists_on_disk(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Shared by every executor; cheap to call, holds a lock only while probing names.
#[derive(Debug, Default)]
pub struct FilenameAllocator {
    reserved: Mutex<HashMap<PathBuf, HashSet<String>>>,
}

impl FilenameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a free name in `dir`, starting from `proposed`.
    pub fn allocate(&self, dir: &Path, proposed: &str) -> String {
        let proposed = sanitize_filename(proposed);
        let mut reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        let taken = reserved.entry(dir.to_path_buf()).or_default();

        let mut candidate = proposed.clone();
        let mut counter = 1u32;
        while taken.contains(&candidate) || exists_on_disk(&dir.join(&candidate)) {
            candidate = numbered(&proposed, counter);
            counter += 1;
        }
        taken.insert(candidate.clone());
        tracing::debug!(dir = %dir.display(), proposed = %proposed, allocated = %candidate, "filename allocated");
        candidate
    }

    /// Drop a reservation made by `allocate`. Unknown names are ignored.
    pub fn release(&self, dir: &Path, name: &str) {
        let mut reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(taken) = reserved.get_mut(dir) {
            taken.remove(name);
            if taken.is_empty() {
                reserved.remove(dir);
            }
        }
    }

    pub fn is_reserved(&self, dir: &Path, name: &str) -> bool {
        let reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        reserved.get(dir).is_some_and(|taken| taken.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn free_name_is_returned_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = FilenameAllocator::new();
        assert_eq!(alloc.allocate(dir.path(), "clip.mp3"), "clip.mp3");
        assert!(alloc.is_reserved(dir.path(), "clip.mp3"));
    }

    #[test]
    fn existing_file_gets_increasing_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        let alloc = FilenameAllocator::new();
        assert_eq!(alloc.allocate(dir.path(), "a.mp4"), "a (1).mp4");
        assert_eq!(alloc.allocate(dir.path(), "a.mp4"), "a (2).mp4");
    }

    #[test]
    fn release_frees_the_name() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = FilenameAllocator::new();
        assert_eq!(alloc.allocate(dir.path(), "song.m4a"), "song.m4a");
        assert_eq!(alloc.allocate(dir.path(), "song.m4a"), "song (1).m4a");
        alloc.release(dir.path(), "song.m4a");
        assert!(!alloc.is_reserved(dir.path(), "song.m4a"));
        assert_eq!(alloc.allocate(dir.path(), "song.m4a"), "song.m4a");
    }

    #[test]
    fn directories_are_independent() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let alloc = FilenameAllocator::new();
        assert_eq!(alloc.allocate(a.path(), "x.webm"), "x.webm");
        assert_eq!(alloc.allocate(b.path(), "x.webm"), "x.webm");
    }

    #[test]
    fn names_without_extension_and_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README"), b"x").unwrap();
        let alloc = FilenameAllocator::new();
        assert_eq!(alloc.allocate(dir.path(), "README"), "README (1)");
        assert_eq!(numbered(".hidden", 1), ".hidden (1)");
        assert_eq!(numbered("show.s01.mkv", 3), "show.s01 (3).mkv");
    }

    #[test]
    fn concurrent_allocations_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = Arc::new(FilenameAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                let path = dir.path().to_path_buf();
                std::thread::spawn(move || alloc.allocate(&path, "same.mp4"))
            })
            .collect();
        let names: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains("same.mp4"));
        assert!(names.contains("same (7).mp4"));
    }

    #[test]
    fn sanitize_strips_separators_and_edges() {
        assert_eq!(sanitize_filename("a/b\\c.mp3"), "a_b_c.mp3");
        assert_eq!(sanitize_filename("  ..My Song.mp3.. "), "My Song.mp3");
        assert_eq!(sanitize_filename("bad\u{0}name.wav"), "bad_name.wav");
        assert_eq!(sanitize_filename(" . "), "download");
        let long = "é".repeat(200);
        let out = sanitize_filename(&long);
        assert!(out.len() <= 255);
        assert!(out.chars().all(|c| c == 'é'));
    }
}
