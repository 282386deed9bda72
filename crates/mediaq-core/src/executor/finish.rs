//! Post-exit phase: rename the engine's output to its reserved name, move
//! it into the `audio/` or `video/` subdirectory, and convert it when the job
//! asks for a different format.

use std::path::{Path, PathBuf};

use crate::layout;
use crate::transcode;

use super::supervise::{Observed, Reservation, Supervision};
use super::{EventKind, Outcome};

const NO_OUTPUT: &str = "engine finished without reporting an output file";

async fn rename(from: &Path, to: &Path) -> Result<(), String> {
    tokio::fs::rename(from, to)
        .await
        .map_err(|e| format!("move {} -> {}: {e}", from.display(), to.display()))
}

/// Runs after a zero exit. Reservations are released when `observed` and the
/// placement reservation drop at the end of this call.
pub(super) async fn finalize(sup: &Supervision, mut observed: Observed) -> Outcome {
    let (Some(engine_name), Some(reserved), Some(media_type)) = (
        observed.engine_name.take(),
        observed.reserved.take(),
        observed.media_type.take(),
    ) else {
        return Outcome::Failed {
            message: NO_OUTPUT.to_string(),
        };
    };

    let (filename, path) = match place(sup, &engine_name, &reserved, &media_type).await {
        Ok(placed) => placed,
        Err(message) => {
            tracing::warn!(job_id = %sup.job_id, %message, "placing output failed");
            return Outcome::Failed { message };
        }
    };

    let (filename, media_type, path) = match sup.convert_to.as_deref() {
        Some(target) if target != media_type => match convert(sup, &path, target).await {
            Ok((name, converted)) => (name, target.to_string(), converted),
            Err(message) => {
                tracing::warn!(job_id = %sup.job_id, %message, "conversion failed");
                return Outcome::Failed { message };
            }
        },
        _ => (filename, media_type, path),
    };

    tracing::info!(job_id = %sup.job_id, path = %path.display(), "download completed");
    Outcome::Completed {
        filename,
        media_type,
        path,
    }
}

/// Transcodes the placed download into `target`, in the subdirectory that
/// format belongs to. The downloaded file stays where it was placed.
async fn convert(sup: &Supervision, downloaded: &Path, target: &str) -> Result<(String, PathBuf), String> {
    sup.emit(EventKind::Converting(target.to_string())).await;
    let source_name = downloaded
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let target_dir = layout::target_dir(&sup.save_path, target);
    tokio::fs::create_dir_all(&target_dir)
        .await
        .map_err(|e| format!("create {}: {e}", target_dir.display()))?;
    let reserved = Reservation::allocate(
        &sup.allocator,
        &target_dir,
        &transcode::converted_name(&source_name, target),
    );
    let output = reserved.path();
    transcode::transcode(&sup.transcoder, downloaded, &output)
        .await
        .map_err(|e| format!("conversion to {target} failed: {e}"))?;
    Ok((reserved.name().to_string(), output))
}

async fn place(
    sup: &Supervision,
    engine_name: &str,
    reserved: &Reservation,
    media_type: &str,
) -> Result<(String, PathBuf), String> {
    let written = sup.save_path.join(engine_name);
    let staged = reserved.path();

    if tokio::fs::symlink_metadata(&written).await.is_err() {
        return Err(format!("engine output missing: {}", written.display()));
    }
    if written != staged {
        rename(&written, &staged).await?;
    }

    let target_dir = layout::target_dir(&sup.save_path, media_type);
    tokio::fs::create_dir_all(&target_dir)
        .await
        .map_err(|e| format!("create {}: {e}", target_dir.display()))?;

    let placed = Reservation::allocate(&sup.allocator, &target_dir, reserved.name());
    let final_path = placed.path();
    rename(&staged, &final_path).await?;
    Ok((placed.name().to_string(), final_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::FilenameAllocator;
    use crate::job::JobId;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn supervision(dir: &Path) -> Supervision {
        let (tx, _rx) = mpsc::channel(1);
        Supervision {
            job_id: JobId::new(),
            generation: 0,
            save_path: dir.to_path_buf(),
            retry_marker: "Retrying".into(),
            convert_to: None,
            transcoder: Default::default(),
            allocator: Arc::new(FilenameAllocator::new()),
            events: tx,
        }
    }

    fn observed(sup: &Supervision, engine_name: &str, media_type: &str) -> Observed {
        Observed {
            engine_name: Some(engine_name.into()),
            reserved: Some(Reservation::allocate(&sup.allocator, &sup.save_path, engine_name)),
            media_type: Some(media_type.into()),
            last_error: None,
        }
    }

    #[tokio::test]
    async fn audio_lands_in_audio_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervision(dir.path());
        // The engine reports its name before the file exists.
        let seen = observed(&sup, "clip.mp3", "mp3");
        std::fs::write(dir.path().join("clip.mp3"), b"id3").unwrap();

        let outcome = finalize(&sup, seen).await;
        let expected = dir.path().join("audio").join("clip.mp3");
        assert_eq!(
            outcome,
            Outcome::Completed {
                filename: "clip.mp3".into(),
                media_type: "mp3".into(),
                path: expected.clone(),
            }
        );
        assert_eq!(std::fs::read(&expected).unwrap(), b"id3");
        assert!(!dir.path().join("clip.mp3").exists());
        assert!(!sup.allocator.is_reserved(dir.path(), "clip.mp3"));
        assert!(!sup.allocator.is_reserved(&dir.path().join("audio"), "clip.mp3"));
    }

    #[tokio::test]
    async fn collision_in_target_dir_is_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervision(dir.path());
        std::fs::create_dir_all(dir.path().join("video")).unwrap();
        std::fs::write(dir.path().join("video").join("a.mp4"), b"old").unwrap();
        let seen = observed(&sup, "a.mp4", "mp4");
        std::fs::write(dir.path().join("a.mp4"), b"new").unwrap();

        let outcome = finalize(&sup, seen).await;
        match outcome {
            Outcome::Completed { filename, path, .. } => {
                assert_eq!(filename, "a (1).mp4");
                assert_eq!(std::fs::read(path).unwrap(), b"new");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(std::fs::read(dir.path().join("video").join("a.mp4")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn missing_observations_fail() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervision(dir.path());
        let outcome = finalize(&sup, Observed::default()).await;
        assert_eq!(
            outcome,
            Outcome::Failed {
                message: NO_OUTPUT.to_string()
            }
        );
    }

    /// Transcoder stand-in: copies the `-i` input to the last argument, or
    /// fails with `exit_code` when it is nonzero.
    #[cfg(unix)]
    fn fake_transcoder(dir: &Path, exit_code: i32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        const SCRIPT: &str = r#"#!/bin/sh
prev=""
for a in "$@"; do
  [ "$prev" = "-i" ] && in="$a"
  prev="$a"
  out="$a"
done
if [ EXIT -ne 0 ]; then
  echo "Conversion failed!" >&2
  exit EXIT
fi
cp "$in" "$out"
"#;
        let path = dir.join("fake-transcoder.sh");
        std::fs::write(&path, SCRIPT.replace("EXIT", &exit_code.to_string())).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn conversion_reports_the_new_artifact_and_keeps_the_download() {
        let bin = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut sup = supervision(dir.path());
        sup.convert_to = Some("mp3".into());
        sup.transcoder.program = fake_transcoder(bin.path(), 0);
        let seen = observed(&sup, "talk.webm", "webm");
        std::fs::write(dir.path().join("talk.webm"), b"webm").unwrap();

        let outcome = finalize(&sup, seen).await;
        let converted = dir.path().join("audio").join("talk.mp3");
        assert_eq!(
            outcome,
            Outcome::Completed {
                filename: "talk.mp3".into(),
                media_type: "mp3".into(),
                path: converted.clone(),
            }
        );
        assert_eq!(std::fs::read(&converted).unwrap(), b"webm");
        assert!(dir.path().join("video").join("talk.webm").exists());
        assert!(!sup.allocator.is_reserved(&dir.path().join("audio"), "talk.mp3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn conversion_to_the_downloaded_format_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = supervision(dir.path());
        sup.convert_to = Some("mp3".into());
        sup.transcoder.program = "/nonexistent/transcoder".into();
        let seen = observed(&sup, "song.mp3", "mp3");
        std::fs::write(dir.path().join("song.mp3"), b"id3").unwrap();

        match finalize(&sup, seen).await {
            Outcome::Completed { path, .. } => {
                assert_eq!(path, dir.path().join("audio").join("song.mp3"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_conversion_fails_the_job() {
        let bin = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut sup = supervision(dir.path());
        sup.convert_to = Some("wav".into());
        sup.transcoder.program = fake_transcoder(bin.path(), 1);
        let seen = observed(&sup, "clip.m4a", "m4a");
        std::fs::write(dir.path().join("clip.m4a"), b"aac").unwrap();

        match finalize(&sup, seen).await {
            Outcome::Failed { message } => {
                assert!(message.starts_with("conversion to wav failed"), "{message}");
                assert!(message.contains("Conversion failed!"), "{message}");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(!dir.path().join("audio").join("clip.wav").exists());
    }

    #[tokio::test]
    async fn missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervision(dir.path());
        match finalize(&sup, observed(&sup, "ghost.webm", "webm")).await {
            Outcome::Failed { message } => assert!(message.contains("ghost.webm")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
