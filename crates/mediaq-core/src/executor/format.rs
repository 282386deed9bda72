//! Format key → engine arguments.
//!
//! Keys are opaque to the queue; this table is the only place they mean
//! anything. Unknown keys fall back to the engine's "best available".

use std::ffi::OsString;
use std::path::Path;

use crate::config::EngineConfig;

/// Video selectors for the fixed-resolution mp4 keys.
const MP4_HEIGHTS: &[(&str, u32)] = &[
    ("mp4-4K", 2160),
    ("mp4-1080p", 1080),
    ("mp4-720p", 720),
    ("mp4-360p", 360),
    ("mp4-240p", 240),
    ("mp4-144p", 144),
];

const FALLBACK_SELECTOR: &str = "best";

/// What the engine is asked to produce for a format key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatPlan {
    /// Extract audio and transcode to `codec`.
    Audio {
        codec: String,
        quality: Option<&'static str>,
    },
    /// Select streams with `selector`; merge into `container` when known.
    Video {
        selector: String,
        container: Option<String>,
    },
}

impl FormatPlan {
    /// Extension used in the output template (`%(ext)s` lets the engine decide).
    fn template_extension(&self) -> &str {
        match self {
            FormatPlan::Audio { codec, .. } => codec.as_str(),
            FormatPlan::Video {
                container: Some(c), ..
            } => c.as_str(),
            FormatPlan::Video { container: None, .. } => "%(ext)s",
        }
    }
}

fn video_selector(key: &str) -> Option<String> {
    if let Some((_, h)) = MP4_HEIGHTS.iter().find(|(k, _)| *k == key) {
        return Some(format!(
            "bestvideo[height<={h}][ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]"
        ));
    }
    match key {
        "webm" => Some("bestvideo[ext=webm]+bestaudio[ext=webm]/best[ext=webm]".to_string()),
        "mkv" => Some("bestvideo[ext=mkv]+bestaudio[ext=m4a]/best[ext=mkv]".to_string()),
        _ => None,
    }
}

/// Resolve a format key. `mp3`/`mp3-*` pick quality tier 0 when the key mentions 320, else 5.
pub fn resolve_format(key: &str) -> FormatPlan {
    let key = key.trim();
    if key.starts_with("mp3") {
        let quality = if key.contains("320") { "0" } else { "5" };
        return FormatPlan::Audio {
            codec: "mp3".to_string(),
            quality: Some(quality),
        };
    }
    if key == "m4a" || key == "wav" {
        return FormatPlan::Audio {
            codec: key.to_string(),
            quality: None,
        };
    }
    match video_selector(key) {
        Some(selector) => FormatPlan::Video {
            selector,
            container: key.split('-').next().map(str::to_string),
        },
        None => FormatPlan::Video {
            selector: FALLBACK_SELECTOR.to_string(),
            container: None,
        },
    }
}

fn push_format_args(plan: &FormatPlan, args: &mut Vec<OsString>) {
    match plan {
        FormatPlan::Audio { codec, quality } => {
            args.extend(["-x", "--audio-format"].map(OsString::from));
            args.push(codec.into());
            if let Some(q) = quality {
                args.push("--audio-quality".into());
                args.push((*q).into());
            }
        }
        FormatPlan::Video {
            selector,
            container,
        } => {
            args.push("-f".into());
            args.push(selector.into());
            if let Some(c) = container {
                args.push("--merge-output-format".into());
                args.push(c.into());
            }
        }
    }
}

fn push_tuning_args(engine: &EngineConfig, args: &mut Vec<OsString>) {
    args.push("--socket-timeout".into());
    args.push(engine.socket_timeout_secs.to_string().into());
    args.push("--retries".into());
    args.push(engine.retries.to_string().into());
    args.push("--fragment-retries".into());
    args.push(engine.fragment_retries.to_string().into());
    args.push("--newline".into());
    if let Some(proxy) = &engine.proxy {
        args.push("--proxy".into());
        args.push(proxy.into());
    }
}

/// Full argument list for one download: format arguments, engine tuning,
/// output template under `save_path`, then the source.
pub fn build_args(
    format_key: &str,
    source: &str,
    save_path: &Path,
    engine: &EngineConfig,
) -> Vec<OsString> {
    let plan = resolve_format(format_key);
    let mut args: Vec<OsString> = Vec::with_capacity(20);
    push_format_args(&plan, &mut args);
    push_tuning_args(engine, &mut args);

    let template = save_path.join(format!("%(title)s.{}", plan.template_extension()));
    args.push("-o".into());
    args.push(template.into_os_string());
    args.push("--".into());
    args.push(source.into());
    args
}

/// `*0:00-0:10` for a ten-second clip from the start.
fn clip_section(seconds: u32) -> String {
    format!("*0:00-{}:{:02}", seconds / 60, seconds % 60)
}

/// Arguments for a preview clip: the download's format selection limited to
/// the first `seconds`, written to `output_stem` plus the format's extension.
/// The engine prints the final file path on stdout once it is in place.
pub fn build_preview_args(
    format_key: &str,
    source: &str,
    output_stem: &Path,
    seconds: u32,
    engine: &EngineConfig,
) -> Vec<OsString> {
    let plan = resolve_format(format_key);
    let mut args: Vec<OsString> = Vec::with_capacity(24);
    push_format_args(&plan, &mut args);
    push_tuning_args(engine, &mut args);
    args.push("--no-playlist".into());
    args.push("--download-sections".into());
    args.push(clip_section(seconds).into());
    args.push("--print".into());
    args.push("after_move:filepath".into());

    let mut template = output_stem.as_os_str().to_os_string();
    template.push(format!(".{}", plan.template_extension()));
    args.push("-o".into());
    args.push(template);
    args.push("--".into());
    args.push(source.into());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn mp3_quality_tiers() {
        assert_eq!(
            resolve_format("mp3-320"),
            FormatPlan::Audio {
                codec: "mp3".into(),
                quality: Some("0")
            }
        );
        assert_eq!(
            resolve_format("mp3-128"),
            FormatPlan::Audio {
                codec: "mp3".into(),
                quality: Some("5")
            }
        );
        assert_eq!(
            resolve_format("mp3"),
            FormatPlan::Audio {
                codec: "mp3".into(),
                quality: Some("5")
            }
        );
    }

    #[test]
    fn m4a_and_wav_have_no_quality() {
        for key in ["m4a", "wav"] {
            assert_eq!(
                resolve_format(key),
                FormatPlan::Audio {
                    codec: key.into(),
                    quality: None
                }
            );
        }
    }

    #[test]
    fn mp4_resolutions_map_to_height_caps() {
        for (key, h) in MP4_HEIGHTS {
            match resolve_format(key) {
                FormatPlan::Video {
                    selector,
                    container,
                } => {
                    assert!(selector.starts_with(&format!("bestvideo[height<={h}][ext=mp4]")));
                    assert!(selector.ends_with("/best[ext=mp4]"));
                    assert_eq!(container.as_deref(), Some("mp4"));
                }
                other => panic!("unexpected plan for {key}: {other:?}"),
            }
        }
    }

    #[test]
    fn webm_and_mkv_selectors() {
        assert_eq!(
            resolve_format("webm"),
            FormatPlan::Video {
                selector: "bestvideo[ext=webm]+bestaudio[ext=webm]/best[ext=webm]".into(),
                container: Some("webm".into()),
            }
        );
        assert_eq!(
            resolve_format("mkv"),
            FormatPlan::Video {
                selector: "bestvideo[ext=mkv]+bestaudio[ext=m4a]/best[ext=mkv]".into(),
                container: Some("mkv".into()),
            }
        );
    }

    #[test]
    fn unknown_key_falls_back_to_best() {
        assert_eq!(
            resolve_format("flv-potato"),
            FormatPlan::Video {
                selector: "best".into(),
                container: None,
            }
        );
    }

    #[test]
    fn audio_invocation_args() {
        let engine = EngineConfig::default();
        let args = strings(&build_args(
            "mp3-320",
            "https://example.com/watch?v=1",
            Path::new("/dl"),
            &engine,
        ));
        assert_eq!(
            args,
            vec![
                "-x",
                "--audio-format",
                "mp3",
                "--audio-quality",
                "0",
                "--socket-timeout",
                "30",
                "--retries",
                "10",
                "--fragment-retries",
                "10",
                "--newline",
                "-o",
                "/dl/%(title)s.mp3",
                "--",
                "https://example.com/watch?v=1",
            ]
        );
    }

    #[test]
    fn video_invocation_with_proxy() {
        let engine = EngineConfig {
            proxy: Some("http://proxy:8080".into()),
            ..EngineConfig::default()
        };
        let args = strings(&build_args("mp4-720p", "https://v", Path::new("/dl"), &engine));
        assert_eq!(&args[0..2], &["-f", "bestvideo[height<=720][ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]"]);
        assert_eq!(&args[2..4], &["--merge-output-format", "mp4"]);
        let proxy_at = args.iter().position(|a| a == "--proxy").unwrap();
        assert_eq!(args[proxy_at + 1], "http://proxy:8080");
        assert!(args.contains(&"/dl/%(title)s.mp4".to_string()));
    }

    #[test]
    fn preview_clip_is_cut_and_printed() {
        let args = strings(&build_preview_args(
            "mp3-320",
            "https://v",
            Path::new("/dl/preview/preview-1"),
            10,
            &EngineConfig::default(),
        ));
        assert_eq!(&args[0..5], &["-x", "--audio-format", "mp3", "--audio-quality", "0"]);
        let at = args.iter().position(|a| a == "--download-sections").unwrap();
        assert_eq!(args[at + 1], "*0:00-0:10");
        let at = args.iter().position(|a| a == "--print").unwrap();
        assert_eq!(args[at + 1], "after_move:filepath");
        assert_eq!(
            &args[args.len() - 4..],
            &["-o", "/dl/preview/preview-1.mp3", "--", "https://v"]
        );
    }

    #[test]
    fn clip_sections_past_a_minute() {
        assert_eq!(clip_section(10), "*0:00-0:10");
        assert_eq!(clip_section(75), "*0:00-1:15");
    }

    #[test]
    fn fallback_invocation_lets_engine_pick_extension() {
        let args = strings(&build_args("best", "https://v", Path::new("/dl"), &EngineConfig::default()));
        assert!(!args.contains(&"--merge-output-format".to_string()));
        assert!(args.contains(&"/dl/%(title)s.%(ext)s".to_string()));
    }
}
