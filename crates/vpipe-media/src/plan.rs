//! FFmpeg argument planner.
//!
//! Pure translation from a selected [`MediaContainer`] to the argument
//! vector handed to ffmpeg. No quoting happens here; arguments are
//! passed to the process verbatim.

use std::path::{Path, PathBuf};

use vpipe_models::MediaContainer;

/// Scale filter: cap width at 1920, keep aspect, never upscale.
const VIDEO_SCALE_FILTER: &str = "scale='min(1920,iw)':-1:force_original_aspect_ratio=decrease";

/// Plan for a single transcode invocation.
#[derive(Debug, Clone)]
pub struct FfmpegPlan {
    args: Vec<String>,
    inputs: Vec<PathBuf>,
}

impl FfmpegPlan {
    /// Build the full argument vector for one encode.
    ///
    /// Inputs are the source followed by one `.srt` per image subtitle,
    /// in subtitle-list order; those files are produced by the OCR
    /// round-trip into `work_dir` before ffmpeg runs.
    pub fn build(
        container: &MediaContainer,
        source_path: &Path,
        work_dir: &Path,
        threads: u32,
        target_path: &Path,
    ) -> Self {
        let mut args: Vec<String> = Vec::new();
        let mut inputs: Vec<PathBuf> = vec![source_path.to_path_buf()];

        args.push("-hide_banner".into());
        args.push("-threads".into());
        args.push(threads.to_string());

        for subtitle in container.image_subtitles() {
            inputs.push(work_dir.join(format!("{}.srt", subtitle.id)));
        }
        for input in &inputs {
            args.push("-i".into());
            args.push(input.to_string_lossy().into_owned());
        }

        args.push("-max_muxing_queue_size".into());
        args.push("9999".into());

        // Video: single mapped stream, chapters stripped
        args.push("-map".into());
        args.push(format!("0:{}", container.video.id));
        args.push("-map_chapters".into());
        args.push("-1".into());
        args.push("-flags".into());
        args.push("+global_header".into());
        args.push("-filter:v".into());
        args.push(VIDEO_SCALE_FILTER.into());
        args.push("-pix_fmt".into());
        args.push("yuv420p10le".into());
        args.push("-c:v".into());
        args.push("libx265".into());
        args.push("-crf".into());
        args.push("28".into());
        args.push("-x265-params".into());
        args.push("profile=main10".into());

        for (index, audio) in container.audios.iter().enumerate() {
            args.push("-map".into());
            args.push(format!("0:{}", audio.id));
            args.push(format!("-metadata:s:a:{index}"));
            args.push(format!(
                "title={} ({})",
                audio.language, audio.channel_layout
            ));
            args.push(format!("-c:a:{index}"));
            args.push("libfdk_aac".into());
            args.push("-vbr".into());
            args.push("5".into());
        }

        let mut srt_input_index = 0usize;
        for (index, subtitle) in container.subtitles.iter().enumerate() {
            if subtitle.is_image_based() {
                srt_input_index += 1;
                args.push("-map".into());
                args.push(srt_input_index.to_string());
                args.push(format!("-c:s:{index}"));
                args.push("srt".into());
                if subtitle.forced {
                    args.push(format!("-disposition:s:s:{index}"));
                    args.push("forced".into());
                    args.push(format!("-disposition:s:s:{index}"));
                    args.push("default".into());
                }
                if subtitle.comment {
                    args.push(format!("-disposition:s:s:{index}"));
                    args.push("comment".into());
                }
                args.push(format!("-metadata:s:s:{index}"));
                args.push(format!("language={}", subtitle.language));
                args.push(format!("-metadata:s:s:{index}"));
                args.push(format!("title={}", subtitle.title));
                args.push("-max_interleave_delta".into());
                args.push("0".into());
            } else {
                args.push("-map".into());
                args.push(format!("0:{}", subtitle.id));
                args.push(format!("-c:s:{index}"));
                args.push("copy".into());
            }
        }

        args.push("-metadata".into());
        args.push(format!("encodeParameters={}", container.to_json()));

        args.push("-y".into());
        args.push(target_path.to_string_lossy().into_owned());

        Self { args, inputs }
    }

    /// The argument vector in execution order.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Every `-i` input, source first.
    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn into_args(self) -> Vec<String> {
        self.args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpipe_models::{AudioTrack, SubtitleTrack, VideoTrack};

    fn audio(id: u32, language: &str) -> AudioTrack {
        AudioTrack {
            id,
            language: language.to_string(),
            channel_layout: "5.1".to_string(),
            channels: 6,
            bitrate: 640_000,
            default: true,
            title: String::new(),
        }
    }

    fn subtitle(id: u32, codec: &str, forced: bool) -> SubtitleTrack {
        SubtitleTrack {
            id,
            language: "eng".to_string(),
            forced,
            comment: false,
            codec: codec.to_string(),
            title: "English".to_string(),
        }
    }

    fn container(audios: Vec<AudioTrack>, subtitles: Vec<SubtitleTrack>) -> MediaContainer {
        MediaContainer {
            video: VideoTrack {
                id: 0,
                duration_secs: 1200.0,
                frame_rate: 24,
            },
            audios,
            subtitles,
        }
    }

    fn window(args: &[String], flag: &str) -> Option<usize> {
        args.iter().position(|a| a == flag)
    }

    #[test]
    fn source_is_the_first_input() {
        let c = container(vec![audio(1, "eng")], vec![]);
        let plan = FfmpegPlan::build(
            &c,
            Path::new("/work/src.mkv"),
            Path::new("/work"),
            8,
            Path::new("/work/out.mkv"),
        );

        assert_eq!(plan.inputs()[0], PathBuf::from("/work/src.mkv"));
        let i = window(plan.args(), "-i").unwrap();
        assert_eq!(plan.args()[i + 1], "/work/src.mkv");
    }

    #[test]
    fn extra_inputs_match_image_subtitle_count() {
        let c = container(
            vec![audio(1, "eng")],
            vec![
                subtitle(3, "hdmv_pgs_subtitle", false),
                subtitle(4, "subrip", false),
                subtitle(5, "hdmv_pgs_subtitle", true),
            ],
        );
        let plan = FfmpegPlan::build(
            &c,
            Path::new("/work/src.mkv"),
            Path::new("/work"),
            4,
            Path::new("/work/out.mkv"),
        );

        assert_eq!(plan.inputs().len(), 1 + 2);
        assert_eq!(plan.inputs()[1], PathBuf::from("/work/3.srt"));
        assert_eq!(plan.inputs()[2], PathBuf::from("/work/5.srt"));
    }

    #[test]
    fn audio_outputs_match_selected_streams() {
        let c = container(vec![audio(1, "eng"), audio(2, "spa")], vec![]);
        let plan = FfmpegPlan::build(
            &c,
            Path::new("/w/s.mkv"),
            Path::new("/w"),
            4,
            Path::new("/w/o.mkv"),
        );

        let aac_count = plan.args().iter().filter(|a| *a == "libfdk_aac").count();
        assert_eq!(aac_count, 2);
        assert!(plan.args().contains(&"-c:a:0".to_string()));
        assert!(plan.args().contains(&"-c:a:1".to_string()));
        assert!(plan.args().contains(&"title=eng (5.1)".to_string()));
    }

    #[test]
    fn text_subtitles_are_copied_and_image_subtitles_remuxed_as_srt() {
        let c = container(
            vec![],
            vec![
                subtitle(3, "subrip", false),
                subtitle(4, "hdmv_pgs_subtitle", true),
            ],
        );
        let plan = FfmpegPlan::build(
            &c,
            Path::new("/w/s.mkv"),
            Path::new("/w"),
            4,
            Path::new("/w/o.mkv"),
        );
        let args = plan.args();

        assert!(args.contains(&"-c:s:0".to_string()));
        assert!(args.contains(&"copy".to_string()));
        assert!(args.contains(&"-c:s:1".to_string()));
        assert!(args.contains(&"srt".to_string()));
        assert!(args.contains(&"-disposition:s:s:1".to_string()));
        assert!(args.contains(&"forced".to_string()));
        assert!(args.contains(&"language=eng".to_string()));
    }

    #[test]
    fn plan_carries_prelude_metadata_and_target() {
        let c = container(vec![audio(1, "eng")], vec![]);
        let plan = FfmpegPlan::build(
            &c,
            Path::new("/w/s.mkv"),
            Path::new("/w"),
            6,
            Path::new("/w/o.mkv"),
        );
        let args = plan.args();

        assert_eq!(args[0], "-hide_banner");
        assert_eq!(args[1], "-threads");
        assert_eq!(args[2], "6");
        assert!(args.contains(&"-max_muxing_queue_size".to_string()));
        assert!(args
            .iter()
            .any(|a| a.starts_with("encodeParameters={")));
        assert_eq!(args[args.len() - 2], "-y");
        assert_eq!(args[args.len() - 1], "/w/o.mkv");
    }
}
