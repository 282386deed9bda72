//! Download directory layout: `audio/`, `video/`, `preview/`, `thumbnails/`
//! under a root, and which of them a finished artifact belongs in.

use std::io;
use std::path::{Path, PathBuf};

pub const AUDIO_DIR: &str = "audio";
pub const VIDEO_DIR: &str = "video";
pub const PREVIEW_DIR: &str = "preview";
pub const THUMBNAILS_DIR: &str = "thumbnails";

/// Media types (container extensions) placed under `audio/`.
const AUDIO_TYPES: &[&str] = &["mp3", "m4a", "wav", "aac", "flac", "opus", "ogg"];

/// Create the root and its four subdirectories if missing.
pub fn ensure_directories(root: &Path) -> io::Result<()> {
    for sub in [AUDIO_DIR, VIDEO_DIR, PREVIEW_DIR, THUMBNAILS_DIR] {
        std::fs::create_dir_all(root.join(sub))?;
    }
    Ok(())
}

pub fn is_audio_type(media_type: &str) -> bool {
    AUDIO_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(media_type.trim_start_matches('.')))
}

/// `save_path/audio` for audio media types, `save_path/video` otherwise.
pub fn target_dir(save_path: &Path, media_type: &str) -> PathBuf {
    if is_audio_type(media_type) {
        save_path.join(AUDIO_DIR)
    } else {
        save_path.join(VIDEO_DIR)
    }
}
