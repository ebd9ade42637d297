//! FFprobe adapter and track selection.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use vpipe_models::{AudioTrack, MediaContainer, SubtitleTrack, VideoTrack};

use crate::error::{MediaError, MediaResult};

/// Frame rate assumed when `avg_frame_rate` cannot be parsed.
const FALLBACK_FRAME_RATE: u32 = 24;

/// Probe result: the selected stream set plus the source size.
#[derive(Debug, Clone)]
pub struct ProbedMedia {
    pub container: MediaContainer,
    pub size_bytes: u64,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeStream {
    index: u32,
    codec_type: String,
    codec_name: Option<String>,
    avg_frame_rate: Option<String>,
    channel_layout: Option<String>,
    channels: Option<u32>,
    bit_rate: Option<String>,
    #[serde(default)]
    disposition: FfprobeDisposition,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeDisposition {
    #[serde(default)]
    default: u8,
    #[serde(default)]
    forced: u8,
    #[serde(default)]
    comment: u8,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeTags {
    language: Option<String>,
    title: Option<String>,
}

/// Probe a media file and reduce it to the normalized container.
pub async fn probe_media(path: impl AsRef<Path>) -> MediaResult<ProbedMedia> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let size_bytes = tokio::fs::metadata(path).await?.len();

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::probe_failed(
            "ffprobe failed",
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
        ));
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
    let container = select_tracks(probe)?;

    debug!(
        audios = container.audios.len(),
        subtitles = container.subtitles.len(),
        "Probed {}",
        path.display()
    );

    Ok(ProbedMedia {
        container,
        size_bytes,
    })
}

/// Reduce raw probe output to the stream set kept for the target.
///
/// Exactly one video stream survives. Audio keeps one stream per
/// language, preferring the highest channel count and breaking ties on
/// bitrate. Subtitles keep forced and comment streams unconditionally
/// and otherwise the first stream seen per language; later duplicates
/// are dropped.
fn select_tracks(probe: FfprobeOutput) -> MediaResult<MediaContainer> {
    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::invalid_media("no video stream found"))?;

    let duration_secs = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let video = VideoTrack {
        id: video_stream.index,
        duration_secs,
        frame_rate: video_stream
            .avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .unwrap_or(FALLBACK_FRAME_RATE),
    };

    let mut best_audio_per_language: HashMap<String, AudioTrack> = HashMap::new();
    for stream in probe.streams.iter().filter(|s| s.codec_type == "audio") {
        let candidate = AudioTrack {
            id: stream.index,
            language: stream.tags.language.clone().unwrap_or_default(),
            channel_layout: stream.channel_layout.clone().unwrap_or_default(),
            channels: stream.channels.unwrap_or(0),
            bitrate: stream
                .bit_rate
                .as_deref()
                .and_then(|b| b.parse::<u64>().ok())
                .unwrap_or(0),
            default: stream.disposition.default == 1,
            title: stream.tags.title.clone().unwrap_or_default(),
        };

        match best_audio_per_language.get(&candidate.language) {
            Some(best)
                if (best.channels, best.bitrate) >= (candidate.channels, candidate.bitrate) => {}
            _ => {
                best_audio_per_language.insert(candidate.language.clone(), candidate);
            }
        }
    }
    let mut audios: Vec<AudioTrack> = best_audio_per_language.into_values().collect();
    audios.sort_by_key(|a| a.id);

    let mut subtitles = Vec::new();
    let mut seen_languages: HashMap<String, ()> = HashMap::new();
    for stream in probe.streams.iter().filter(|s| s.codec_type == "subtitle") {
        let subtitle = SubtitleTrack {
            id: stream.index,
            language: stream.tags.language.clone().unwrap_or_default(),
            forced: stream.disposition.forced == 1,
            comment: stream.disposition.comment == 1,
            codec: stream.codec_name.clone().unwrap_or_default(),
            title: stream.tags.title.clone().unwrap_or_default(),
        };

        if subtitle.forced || subtitle.comment {
            subtitles.push(subtitle);
            continue;
        }

        if seen_languages
            .insert(subtitle.language.clone(), ())
            .is_none()
        {
            subtitles.push(subtitle);
        }
    }

    Ok(MediaContainer {
        video,
        audios,
        subtitles,
    })
}

/// Parse an `avg_frame_rate` of the form `N/D` into an integer rate.
fn parse_frame_rate(s: &str) -> Option<u32> {
    let (num, den) = s.split_once('/')?;
    let num: u32 = num.parse().ok()?;
    let den: u32 = den.parse().ok()?;
    if den == 0 {
        return None;
    }
    Some(num / den)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_stream(index: u32, avg_frame_rate: &str) -> FfprobeStream {
        FfprobeStream {
            index,
            codec_type: "video".to_string(),
            avg_frame_rate: Some(avg_frame_rate.to_string()),
            ..Default::default()
        }
    }

    fn audio_stream(index: u32, language: &str, channels: u32, bitrate: u64) -> FfprobeStream {
        FfprobeStream {
            index,
            codec_type: "audio".to_string(),
            channel_layout: Some("stereo".to_string()),
            channels: Some(channels),
            bit_rate: Some(bitrate.to_string()),
            tags: FfprobeTags {
                language: Some(language.to_string()),
                title: None,
            },
            ..Default::default()
        }
    }

    fn subtitle_stream(index: u32, language: &str, forced: bool) -> FfprobeStream {
        FfprobeStream {
            index,
            codec_type: "subtitle".to_string(),
            codec_name: Some("subrip".to_string()),
            disposition: FfprobeDisposition {
                forced: forced as u8,
                ..Default::default()
            },
            tags: FfprobeTags {
                language: Some(language.to_string()),
                title: None,
            },
            ..Default::default()
        }
    }

    fn probe_with(streams: Vec<FfprobeStream>) -> FfprobeOutput {
        FfprobeOutput {
            format: FfprobeFormat {
                duration: Some("600.5".to_string()),
            },
            streams,
        }
    }

    #[test]
    fn frame_rate_parses_ratio_and_rejects_garbage() {
        assert_eq!(parse_frame_rate("24/1"), Some(24));
        assert_eq!(parse_frame_rate("30000/1001"), Some(29));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("29.97"), None);
        assert_eq!(parse_frame_rate(""), None);
    }

    #[test]
    fn unparsable_frame_rate_falls_back() {
        let container = select_tracks(probe_with(vec![video_stream(0, "x")])).unwrap();
        assert_eq!(container.video.frame_rate, FALLBACK_FRAME_RATE);
        assert!((container.video.duration_secs - 600.5).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_video_stream_is_an_error() {
        let result = select_tracks(probe_with(vec![audio_stream(1, "eng", 2, 128_000)]));
        assert!(matches!(result, Err(MediaError::InvalidMedia(_))));
    }

    #[test]
    fn audio_keeps_best_stream_per_language() {
        let container = select_tracks(probe_with(vec![
            video_stream(0, "24/1"),
            audio_stream(1, "eng", 2, 128_000),
            audio_stream(2, "eng", 6, 96_000),
            audio_stream(3, "spa", 2, 192_000),
        ]))
        .unwrap();

        assert_eq!(container.audios.len(), 2);
        // Channel count dominates bitrate
        assert_eq!(container.audios[0].id, 2);
        assert_eq!(container.audios[1].id, 3);
    }

    #[test]
    fn audio_ties_break_on_bitrate() {
        let container = select_tracks(probe_with(vec![
            video_stream(0, "24/1"),
            audio_stream(1, "eng", 6, 96_000),
            audio_stream(2, "eng", 6, 640_000),
        ]))
        .unwrap();

        assert_eq!(container.audios.len(), 1);
        assert_eq!(container.audios[0].id, 2);
    }

    #[test]
    fn audio_selection_is_deterministic_under_full_ties() {
        // Identical (channels, bitrate): the first stream wins and stays
        let container = select_tracks(probe_with(vec![
            video_stream(0, "24/1"),
            audio_stream(1, "eng", 6, 640_000),
            audio_stream(2, "eng", 6, 640_000),
        ]))
        .unwrap();

        assert_eq!(container.audios.len(), 1);
        assert_eq!(container.audios[0].id, 1);
    }

    #[test]
    fn forced_subtitles_always_survive() {
        let container = select_tracks(probe_with(vec![
            video_stream(0, "24/1"),
            subtitle_stream(1, "eng", false),
            subtitle_stream(2, "eng", true),
            subtitle_stream(3, "eng", false),
        ]))
        .unwrap();

        // First eng + forced eng; the trailing duplicate is dropped
        let ids: Vec<u32> = container.subtitles.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn one_subtitle_per_language_first_seen_wins() {
        let container = select_tracks(probe_with(vec![
            video_stream(0, "24/1"),
            subtitle_stream(1, "eng", false),
            subtitle_stream(2, "spa", false),
            subtitle_stream(3, "spa", false),
        ]))
        .unwrap();

        let ids: Vec<u32> = container.subtitles.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
