//! Normalized media container model.
//!
//! The probed source is reduced to the set of streams that survive track
//! selection; the result is embedded verbatim in the encoded artifact's
//! container metadata.

use serde::{Deserialize, Serialize};

/// The single video stream kept for the target file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoTrack {
    /// Stream index in the source container
    pub id: u32,
    /// Source duration in seconds
    pub duration_secs: f64,
    /// Integer frame rate, derived from `avg_frame_rate`
    pub frame_rate: u32,
}

/// An audio stream retained after per-language selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub id: u32,
    pub language: String,
    /// Channel layout name, e.g. `5.1(side)`
    pub channel_layout: String,
    pub channels: u32,
    pub bitrate: u64,
    pub default: bool,
    #[serde(default)]
    pub title: String,
}

/// A subtitle stream retained after selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub id: u32,
    pub language: String,
    pub forced: bool,
    pub comment: bool,
    /// Codec name as reported by the probe, e.g. `hdmv_pgs_subtitle`
    pub codec: String,
    #[serde(default)]
    pub title: String,
}

impl SubtitleTrack {
    /// Image-based subtitles need the OCR round-trip before muxing.
    pub fn is_image_based(&self) -> bool {
        self.codec.to_lowercase().contains("pgs")
    }
}

/// The selected, normalized stream set for the target file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaContainer {
    pub video: VideoTrack,
    #[serde(default)]
    pub audios: Vec<AudioTrack>,
    #[serde(default)]
    pub subtitles: Vec<SubtitleTrack>,
}

impl MediaContainer {
    pub fn has_image_subtitles(&self) -> bool {
        self.subtitles.iter().any(|s| s.is_image_based())
    }

    /// Subtitles requiring OCR, in container order.
    pub fn image_subtitles(&self) -> impl Iterator<Item = &SubtitleTrack> {
        self.subtitles.iter().filter(|s| s.is_image_based())
    }

    /// JSON form embedded in the target's container metadata.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subtitle(codec: &str) -> SubtitleTrack {
        SubtitleTrack {
            id: 3,
            language: "eng".to_string(),
            forced: false,
            comment: false,
            codec: codec.to_string(),
            title: String::new(),
        }
    }

    #[test]
    fn pgs_detection_is_case_insensitive() {
        assert!(subtitle("hdmv_pgs_subtitle").is_image_based());
        assert!(subtitle("HDMV_PGS_SUBTITLE").is_image_based());
        assert!(!subtitle("subrip").is_image_based());
        assert!(!subtitle("ass").is_image_based());
    }

    #[test]
    fn container_json_embeds_all_tracks() {
        let container = MediaContainer {
            video: VideoTrack {
                id: 0,
                duration_secs: 600.0,
                frame_rate: 24,
            },
            audios: vec![AudioTrack {
                id: 1,
                language: "eng".to_string(),
                channel_layout: "5.1".to_string(),
                channels: 6,
                bitrate: 640_000,
                default: true,
                title: String::new(),
            }],
            subtitles: vec![subtitle("subrip")],
        };

        let json = container.to_json();
        let decoded: MediaContainer = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, container);
    }
}
