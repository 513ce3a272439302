use serde::{Deserialize, Serialize};

use crate::{EngineConfig, TranscodeError};

/// Subtitle codecs the text-VTT extractor can convert. Image-based
/// subtitles (pgs, dvdsub, ...) are dropped from the report.
const TEXT_SUBTITLE_CODECS: &[&str] = &[
    "subrip", "webvtt", "ass", "ssa", "mov_text", "mpl2", "text",
];

/// Source media information extracted via the external inspector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub video: Option<VideoStream>,
    pub audio: Vec<AudioTrack>,
    pub subtitles: Vec<SubtitleStream>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoStream {
    pub codec: String,
    pub profile: Option<String>,
    /// Codec-specific level number; 0 when the inspector does not report one.
    pub level: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTrack {
    /// Absolute stream index in the source container.
    pub index: u32,
    /// Position among the audio streams, in ascending absolute index.
    pub ordinal: u32,
    pub language: String,
    pub title: Option<String>,
    pub codec: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleStream {
    /// Absolute stream index; the subtitle extractor maps this verbatim.
    pub index: u32,
    pub language: String,
    pub title: Option<String>,
    pub codec: String,
}

/// Run the inspector on a source URL and parse its JSON report.
///
/// Blocks until the inspector terminates; the caller bounds the wait with
/// `EngineConfig::probe_timeout`.
pub async fn probe(config: &EngineConfig, url: &str) -> Result<ProbeReport, TranscodeError> {
    let output = tokio::process::Command::new(&config.ffprobe_path)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(url)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| TranscodeError::ProbeFailed(format!("spawn failed: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TranscodeError::ProbeFailed(stderr.into_owned()));
    }

    let raw: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| TranscodeError::ProbeFailed(format!("parse JSON: {e}")))?;

    parse_probe_output(&raw)
}

fn parse_probe_output(raw: &serde_json::Value) -> Result<ProbeReport, TranscodeError> {
    let duration_secs: f64 = raw
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    let streams = raw
        .get("streams")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut video = None;
    let mut audio = Vec::new();
    let mut subtitles = Vec::new();

    for s in &streams {
        let codec_type = s.get("codec_type").and_then(|v| v.as_str()).unwrap_or("");
        let index = s.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let codec = s
            .get("codec_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let tags = s.get("tags");
        let language = tags
            .and_then(|t| t.get("language"))
            .and_then(|v| v.as_str())
            .unwrap_or("und")
            .to_string();
        let title = tags
            .and_then(|t| t.get("title"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        match codec_type {
            "video" => {
                // Keep the primary video track only (first by stream index).
                if video.is_none() {
                    let profile = s
                        .get("profile")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                    let level = s.get("level").and_then(|v| v.as_i64()).unwrap_or(0);
                    video = Some(VideoStream {
                        codec,
                        profile,
                        level,
                    });
                }
            }
            "audio" => {
                let ordinal = audio.len() as u32;
                audio.push(AudioTrack {
                    index,
                    ordinal,
                    language,
                    title,
                    codec,
                });
            }
            "subtitle" => {
                if TEXT_SUBTITLE_CODECS.contains(&codec.as_str()) {
                    subtitles.push(SubtitleStream {
                        index,
                        language,
                        title,
                        codec,
                    });
                }
            }
            _ => {}
        }
    }

    if video.is_none() {
        return Err(TranscodeError::ProbeFailed("no video stream found".into()));
    }

    Ok(ProbeReport {
        video,
        audio,
        subtitles,
        duration_secs,
    })
}
