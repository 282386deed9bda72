//! Short preview clips: the first few seconds of a source in the requested
//! format, fetched by the engine into `<root>/preview/`. Previews are not
//! jobs and never enter the queue.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::process::Command;

use crate::config::MediaqConfig;
use crate::error::ToolError;
use crate::executor::build_preview_args;
use crate::job::validate_source;
use crate::layout;
use crate::transcode::{last_line, run_bounded};

const TOOL: &str = "preview";

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Fetches a `preview_seconds` clip of `source` and returns where it landed.
pub async fn generate_preview(
    cfg: &MediaqConfig,
    root: &Path,
    source: &str,
    format: &str,
) -> Result<PathBuf, ToolError> {
    let url = validate_source(source).map_err(ToolError::InvalidRequest)?;
    if format.trim().is_empty() {
        return Err(ToolError::InvalidRequest("format is empty".to_string()));
    }

    let dir = root.join(layout::PREVIEW_DIR);
    tokio::fs::create_dir_all(&dir).await?;
    let stem = dir.join(format!("preview-{}", unix_millis()));
    let args = build_preview_args(
        format.trim(),
        url.as_str(),
        &stem,
        cfg.preview_seconds,
        &cfg.engine,
    );

    let mut cmd = Command::new(&cfg.engine.program);
    cmd.args(&args);
    let stdout = run_bounded(cmd, TOOL, cfg.preview_timeout()).await?;

    let stdout = String::from_utf8_lossy(&stdout);
    let Some(path) = last_line(&stdout).map(PathBuf::from) else {
        return Err(ToolError::Failed {
            tool: TOOL,
            code: Some(0),
            message: "engine did not report the preview file".to_string(),
        });
    };
    if tokio::fs::symlink_metadata(&path).await.is_err() {
        return Err(ToolError::Failed {
            tool: TOOL,
            code: Some(0),
            message: format!("preview file missing: {}", path.display()),
        });
    }
    tracing::info!(source = %url, path = %path.display(), "preview ready");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bad_requests_never_reach_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = MediaqConfig::default();
        cfg.engine.program = "/nonexistent/engine".into();
        for (source, format) in [("nope", "mp3"), ("https://example.com/v", " ")] {
            let err = generate_preview(&cfg, dir.path(), source, format)
                .await
                .unwrap_err();
            assert!(matches!(err, ToolError::InvalidRequest(_)), "{err}");
        }
        assert!(!dir.path().join("preview").exists());
    }

    #[cfg(unix)]
    mod with_fake_engine {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Writes the clip only when asked for the first ten seconds, then
        /// prints its path the way `--print after_move:filepath` does.
        const SCRIPT: &str = r#"#!/bin/sh
out=""
sections=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    --download-sections) sections="$2"; shift ;;
  esac
  shift
done
if [ "$sections" != "*0:00-0:10" ]; then
  echo "ERROR: unexpected section $sections" >&2
  exit 1
fi
printf 'clip' > "$out"
echo "$out"
"#;

        const SILENT: &str = "#!/bin/sh\nexit 0\n";

        fn config(dir: &Path, script: &str) -> MediaqConfig {
            let path = dir.join("fake-engine.sh");
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            let mut cfg = MediaqConfig::default();
            cfg.engine.program = path;
            cfg
        }

        #[tokio::test]
        async fn clip_lands_in_preview_directory() {
            let bin = tempfile::tempdir().unwrap();
            let root = tempfile::tempdir().unwrap();
            let cfg = config(bin.path(), SCRIPT);

            let path = generate_preview(&cfg, root.path(), "https://example.com/v", "mp3")
                .await
                .unwrap();
            assert_eq!(path.parent(), Some(root.path().join("preview").as_path()));
            let name = path.file_name().unwrap().to_str().unwrap();
            assert!(name.starts_with("preview-") && name.ends_with(".mp3"), "{name}");
            assert_eq!(std::fs::read(&path).unwrap(), b"clip");
        }

        #[tokio::test]
        async fn engine_that_reports_nothing_fails() {
            let bin = tempfile::tempdir().unwrap();
            let root = tempfile::tempdir().unwrap();
            let cfg = config(bin.path(), SILENT);
            let err = generate_preview(&cfg, root.path(), "https://example.com/v", "mp4-720p")
                .await
                .unwrap_err();
            assert!(err.to_string().contains("did not report"), "{err}");
        }

        #[tokio::test]
        async fn section_length_follows_config() {
            let bin = tempfile::tempdir().unwrap();
            let root = tempfile::tempdir().unwrap();
            let mut cfg = config(bin.path(), SCRIPT);
            cfg.preview_seconds = 30;
            match generate_preview(&cfg, root.path(), "https://example.com/v", "mp3").await {
                Err(ToolError::Failed { message, .. }) => {
                    assert_eq!(message, "ERROR: unexpected section *0:00-0:30");
                }
                other => panic!("unexpected result {other:?}"),
            }
        }
    }
}
