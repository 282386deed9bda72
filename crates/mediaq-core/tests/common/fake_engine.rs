//! Shell scripts standing in for the download engine and the transcoder.
//!
//! Behaviour is picked by the first path segment of the source URL:
//!
//! - `ok`: reports a destination, some progress, writes the file, exits 0.
//! - `merge`: like `ok` but announces an mkv merge of two streams.
//! - `slow`: reports a destination and 5% progress, then sleeps until killed.
//! - `fail`: prints an engine retry line and `ERROR: rate limited`, exits 1.
//!
//! The title is the last path segment, so `https://example.com/ok/intro`
//! produces `intro.<ext>`.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const SCRIPT: &str = r#"#!/bin/sh
out=""
src=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    --) src="$2"; shift ;;
  esac
  shift
done
title="${src##*/}"
rest="${src#*://*/}"
mode="${rest%%/*}"
file=$(printf '%s' "$out" | sed "s/%(title)s/$title/")
case "$mode" in
  ok)
    echo "[download] Destination: $file"
    echo "[download]  12.5% of 2.00MiB at 1.00MiB/s ETA 00:02"
    echo "[download]  60.0% of 2.00MiB at 1.00MiB/s ETA 00:01"
    echo "[download] 100% of 2.00MiB in 00:02"
    printf 'media' > "$file"
    ;;
  merge)
    dir="${file%/*}"
    echo "[download] Destination: $dir/$title.f137.mp4"
    echo "[download]  40.0% of 8.00MiB at 2.00MiB/s ETA 00:03"
    echo "[download] 100% of 8.00MiB in 00:04"
    echo "[Merger] Merging formats into \"$dir/$title.mkv\""
    printf 'video' > "$dir/$title.mkv"
    ;;
  slow)
    echo "[download] Destination: $file"
    echo "[download]   5.0% of 50.00MiB at 1.00MiB/s ETA 00:45"
    exec sleep 30
    ;;
  fail)
    echo "[download]   1.0% of 2.00MiB"
    echo "ERROR: rate limited" >&2
    echo "[download] Got error: HTTP 429. Retrying fragment 1 (1/10)..." >&2
    exit 1
    ;;
  *)
    echo "ERROR: unknown test mode $mode" >&2
    exit 2
    ;;
esac
"#;

/// Transcoder stand-in: writes `converted:<input bytes>` to the last argument.
const TRANSCODER: &str = r#"#!/bin/sh
prev=""
for a in "$@"; do
  [ "$prev" = "-i" ] && in="$a"
  prev="$a"
  out="$a"
done
{ printf 'converted:'; cat "$in"; } > "$out"
"#;

fn write_script(path: PathBuf, body: &str) -> PathBuf {
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Writes the engine script into `dir` and returns its path.
pub fn install(dir: &Path) -> PathBuf {
    write_script(dir.join("fake-engine.sh"), SCRIPT)
}

/// Writes the transcoder script into `dir` and returns its path.
pub fn install_transcoder(dir: &Path) -> PathBuf {
    write_script(dir.join("fake-transcoder.sh"), TRANSCODER)
}
