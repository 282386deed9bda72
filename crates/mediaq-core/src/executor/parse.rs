//! Incremental parser for the engine's stdout.
//!
//! Output arrives in arbitrary chunks; a line (and therefore a marker) may be
//! split across reads, so bytes are buffered until a `\n` or `\r` ends the
//! line. Each complete line yields at most one signal.

/// Something recognized in the engine's progress stream.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineSignal {
    /// `[download]  42.5% of ...`, with the fragment index when the engine reports one.
    Percent { percent: f64, fragment: Option<i64> },
    /// The file the engine is downloading into (name only).
    Destination(String),
    /// The final container after merging or audio extraction (name only).
    Container { filename: String, media_type: String },
}

const DOWNLOAD_TAG: &str = "[download]";
const DESTINATION_PREFIX: &str = "Destination:";
const ALREADY_DOWNLOADED_SUFFIX: &str = "has already been downloaded";
const MERGER_PREFIX: &str = "[Merger] Merging formats into";
const EXTRACT_AUDIO_PREFIX: &str = "[ExtractAudio] Destination:";

/// Last path component, accepting both `/` and `\` separators.
fn file_name_of(path: &str) -> Option<String> {
    let path = path.trim().trim_matches('"');
    let name = path.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn container(path: &str) -> Option<EngineSignal> {
    let filename = file_name_of(path)?;
    let media_type = extension_of(&filename)?;
    Some(EngineSignal::Container {
        filename,
        media_type,
    })
}

/// `(frag 12/40)` → 12.
fn fragment_index(rest: &str) -> Option<i64> {
    let start = rest.find("(frag ")? + "(frag ".len();
    let tail = &rest[start..];
    let end = tail.find('/')?;
    tail[..end].trim().parse().ok()
}

/// Recognize one complete line.
pub fn parse_line(line: &str) -> Option<EngineSignal> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(MERGER_PREFIX) {
        return container(rest);
    }
    if let Some(rest) = line.strip_prefix(EXTRACT_AUDIO_PREFIX) {
        return container(rest);
    }

    let rest = line.strip_prefix(DOWNLOAD_TAG)?.trim_start();
    if let Some(path) = rest.strip_prefix(DESTINATION_PREFIX) {
        return file_name_of(path).map(EngineSignal::Destination);
    }
    if let Some(path) = rest.strip_suffix(ALREADY_DOWNLOADED_SUFFIX) {
        return file_name_of(path).map(EngineSignal::Destination);
    }

    let first = rest.split_whitespace().next()?;
    let percent: f64 = first.strip_suffix('%')?.parse().ok()?;
    if !percent.is_finite() {
        return None;
    }
    Some(EngineSignal::Percent {
        percent,
        fragment: fragment_index(rest),
    })
}

/// Buffers partial lines between reads.
#[derive(Debug, Default)]
pub struct OutputParser {
    pending: Vec<u8>,
}

impl OutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk; returns signals for every line it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<EngineSignal> {
        let mut out = Vec::new();
        for &b in chunk {
            if b == b'\n' || b == b'\r' {
                self.take_line(&mut out);
            } else {
                self.pending.push(b);
            }
        }
        out
    }

    /// Flush a trailing line that never got a terminator (end of stream).
    pub fn finish(&mut self) -> Vec<EngineSignal> {
        let mut out = Vec::new();
        self.take_line(&mut out);
        out
    }

    fn take_line(&mut self, out: &mut Vec<EngineSignal>) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending);
        if let Some(signal) = parse_line(&line) {
            out.push(signal);
        }
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_lines() {
        assert_eq!(
            parse_line("[download]  42.5% of   10.00MiB at  1.00MiB/s ETA 00:05"),
            Some(EngineSignal::Percent {
                percent: 42.5,
                fragment: None
            })
        );
        assert_eq!(
            parse_line("[download] 100% of 3.2MiB in 00:02"),
            Some(EngineSignal::Percent {
                percent: 100.0,
                fragment: None
            })
        );
        assert_eq!(
            parse_line("[download]   7.0% of ~ 120.00MiB at 2.0MiB/s ETA 01:00 (frag 12/40)"),
            Some(EngineSignal::Percent {
                percent: 7.0,
                fragment: Some(12)
            })
        );
    }

    #[test]
    fn destination_lines() {
        assert_eq!(
            parse_line("[download] Destination: /home/me/Downloads/clip.f137.mp4"),
            Some(EngineSignal::Destination("clip.f137.mp4".into()))
        );
        assert_eq!(
            parse_line(r"[download] Destination: C:\Users\me\My Song.webm"),
            Some(EngineSignal::Destination("My Song.webm".into()))
        );
        assert_eq!(
            parse_line("[download] /srv/x/clip.mp4 has already been downloaded"),
            Some(EngineSignal::Destination("clip.mp4".into()))
        );
    }

    #[test]
    fn container_lines() {
        assert_eq!(
            parse_line(r#"[Merger] Merging formats into "/dl/My Video.MP4""#),
            Some(EngineSignal::Container {
                filename: "My Video.MP4".into(),
                media_type: "mp4".into()
            })
        );
        assert_eq!(
            parse_line("[ExtractAudio] Destination: /dl/clip.mp3"),
            Some(EngineSignal::Container {
                filename: "clip.mp3".into(),
                media_type: "mp3".into()
            })
        );
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        assert_eq!(parse_line("[youtube] abc: Downloading webpage"), None);
        assert_eq!(parse_line("[download] Downloading item 1 of 3"), None);
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("[Merger] Merging formats into \"/dl/noext\""), None);
    }

    #[test]
    fn markers_split_across_chunks() {
        let mut p = OutputParser::new();
        assert!(p.feed(b"[downl").is_empty());
        assert!(p.feed(b"oad]  12.").is_empty());
        assert_eq!(
            p.feed(b"0% of 1MiB\n[download] Destination: /a/b"),
            vec![EngineSignal::Percent {
                percent: 12.0,
                fragment: None
            }]
        );
        assert_eq!(
            p.feed(b"/c.mp3\r\n"),
            vec![EngineSignal::Destination("c.mp3".into())]
        );
    }

    #[test]
    fn carriage_returns_end_lines_and_finish_flushes() {
        let mut p = OutputParser::new();
        let signals = p.feed(b"[download]  1.0% of 1MiB\r[download]  2.0% of 1MiB\r[download]  3.0%");
        assert_eq!(signals.len(), 2);
        assert_eq!(
            p.finish(),
            vec![EngineSignal::Percent {
                percent: 3.0,
                fragment: None
            }]
        );
        assert!(p.finish().is_empty());
    }

    #[test]
    fn multibyte_names_survive_chunk_boundaries() {
        let line = "[download] Destination: /dl/日本語.mp4\n".as_bytes();
        let (a, b) = line.split_at(30);
        let mut p = OutputParser::new();
        assert!(p.feed(a).is_empty());
        assert_eq!(
            p.feed(b),
            vec![EngineSignal::Destination("日本語.mp4".into())]
        );
    }
}
