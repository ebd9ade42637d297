//! Encode stage: probe, subtitle conversion, transcode, validation.

use std::path::{Path, PathBuf};
use tracing::debug;

use vpipe_media::{probe_media, FfmpegPlan, MediaError, ProgressParser, Subprocess};
use vpipe_models::{EventStatus, MediaContainer, NotificationType, WorkTask};

use crate::error::{WorkerError, WorkerResult};
use crate::pgs;
use crate::pipeline::WorkerContext;

/// Accepted drift between source and encoded duration, in seconds.
const MAX_DURATION_DRIFT_SECS: f64 = 60.0;

/// Progress events are emitted every time the wall-clock percentage
/// advances at least this much.
const PROGRESS_STEP_PERCENT: f64 = 10.0;

/// Run the full encode stage for one task.
pub async fn run(ctx: &WorkerContext, task: &mut WorkTask) -> WorkerResult<()> {
    let events = &ctx.events;

    events
        .emit(task, NotificationType::FfProbe, EventStatus::Progressing, "")
        .await?;

    let source = task
        .source_path
        .clone()
        .ok_or_else(|| WorkerError::validation("task has no source file"))?;

    let probed = match probe_media(&source).await {
        Ok(probed) => probed,
        Err(e) => {
            events
                .emit(
                    task,
                    NotificationType::FfProbe,
                    EventStatus::Failed,
                    e.to_string(),
                )
                .await
                .ok();
            return Err(WorkerError::validation(e.to_string()));
        }
    };
    events
        .emit(task, NotificationType::FfProbe, EventStatus::Completed, "")
        .await?;

    let container = probed.container;
    let source_size = probed.size_bytes;

    if container.has_image_subtitles() {
        convert_subtitles(ctx, task, &source, &container).await?;
    }

    events
        .emit(task, NotificationType::Ffmpeg, EventStatus::Progressing, "")
        .await?;

    let target = target_path_for(&source, &task.work_dir);
    task.target_path = Some(target.clone());

    if let Err(e) = run_ffmpeg(ctx, task, &container, &source, &target).await {
        events
            .emit(
                task,
                NotificationType::Ffmpeg,
                EventStatus::Failed,
                e.to_string(),
            )
            .await
            .ok();
        return Err(e);
    }

    if let Err(e) = validate_target(&target, &container, source_size).await {
        events
            .emit(
                task,
                NotificationType::Ffmpeg,
                EventStatus::Failed,
                e.to_string(),
            )
            .await
            .ok();
        return Err(e);
    }

    events
        .emit(task, NotificationType::Ffmpeg, EventStatus::Completed, "")
        .await?;

    Ok(())
}

/// Extract image subtitles and run them through the OCR bridge.
async fn convert_subtitles(
    ctx: &WorkerContext,
    task: &mut WorkTask,
    source: &Path,
    container: &MediaContainer,
) -> WorkerResult<()> {
    let events = &ctx.events;
    let image_tracks: Vec<_> = container.image_subtitles().collect();

    events
        .emit(
            task,
            NotificationType::MkvExtract,
            EventStatus::Progressing,
            "",
        )
        .await?;
    if let Err(e) = vpipe_media::extract_subtitles(
        source,
        &task.work_dir,
        &image_tracks,
        ctx.cancel.clone(),
    )
    .await
    {
        events
            .emit(
                task,
                NotificationType::MkvExtract,
                EventStatus::Failed,
                e.to_string(),
            )
            .await
            .ok();
        return Err(e.into());
    }
    events
        .emit(
            task,
            NotificationType::MkvExtract,
            EventStatus::Completed,
            "",
        )
        .await?;

    events
        .emit(task, NotificationType::Pgs, EventStatus::Progressing, "")
        .await?;
    if let Err(e) = pgs::convert_image_subtitles(ctx, task, container).await {
        events
            .emit(
                task,
                NotificationType::Pgs,
                EventStatus::Failed,
                e.to_string(),
            )
            .await
            .ok();
        return Err(e);
    }
    events
        .emit(task, NotificationType::Pgs, EventStatus::Completed, "")
        .await?;

    Ok(())
}

/// Run ffmpeg with the planned arguments, emitting progress events.
async fn run_ffmpeg(
    ctx: &WorkerContext,
    task: &mut WorkTask,
    container: &MediaContainer,
    source: &Path,
    target: &Path,
) -> WorkerResult<()> {
    let ffmpeg = which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

    let plan = FfmpegPlan::build(container, source, &task.work_dir, ctx.config.threads, target);
    debug!(
        job_id = %task.task.job_id,
        "FFMPEG command: {} {}",
        ffmpeg.display(),
        plan.args().join(" ")
    );

    let mut command = Subprocess::new(ffmpeg.to_string_lossy())
        .args(plan.args().iter().cloned())
        .current_dir(&task.work_dir);
    if cfg!(unix) {
        if let Some(dir) = ffmpeg.parent() {
            command = command.env("LD_LIBRARY_PATH", dir.to_string_lossy());
        }
    }

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();
    let cancel = ctx.cancel.clone();
    let mut run = tokio::spawn(async move {
        let mut parser = ProgressParser::new();
        command
            .run(cancel, |_| {}, move |line| {
                if let Some(point) = parser.push_line(line) {
                    progress_tx.send(point).ok();
                }
            })
            .await
    });

    let duration = container.video.duration_secs;
    let mut last_percent = 0.0f64;

    loop {
        tokio::select! {
            point = progress_rx.recv() => {
                if let Some(point) = point {
                    let percent = point.percent(duration);
                    if percent - last_percent >= PROGRESS_STEP_PERCENT {
                        ctx.events
                            .emit(
                                task,
                                NotificationType::Ffmpeg,
                                EventStatus::Progressing,
                                format!("{{\"progress\":\"{:.2}\"}}", percent.min(100.0)),
                            )
                            .await
                            .ok();
                        last_percent = percent;
                    }
                }
            }
            result = &mut run => {
                let result = result
                    .map_err(|e| WorkerError::validation(format!("transcoder task failed: {e}")))?;
                result?;
                return Ok(());
            }
        }
    }
}

/// Reject encodes that drifted in duration or grew beyond the source.
async fn validate_target(
    target: &Path,
    source_container: &MediaContainer,
    source_size: u64,
) -> WorkerResult<()> {
    let encoded = probe_media(target)
        .await
        .map_err(|e| WorkerError::validation(e.to_string()))?;

    let source_duration = source_container.video.duration_secs;
    let encoded_duration = encoded.container.video.duration_secs;
    if (encoded_duration - source_duration).abs() > MAX_DURATION_DRIFT_SECS {
        return Err(WorkerError::validation(format!(
            "source file duration {source_duration} is different than encoded {encoded_duration}"
        )));
    }

    if encoded.size_bytes > source_size {
        return Err(WorkerError::validation(format!(
            "source file size {source_size} bytes is less than encoded {} bytes",
            encoded.size_bytes
        )));
    }

    Ok(())
}

/// Target lives next to the source as `<stem>-encoded.mkv`.
fn target_path_for(source: &Path, work_dir: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    work_dir.join(format!("{stem}-encoded.mkv"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_name_derives_from_source_stem() {
        let target = target_path_for(
            Path::new("/w/abc123.mkv"),
            Path::new("/w"),
        );
        assert_eq!(target, PathBuf::from("/w/abc123-encoded.mkv"));

        let target = target_path_for(Path::new("/w/clip.final.mp4"), Path::new("/w"));
        assert_eq!(target, PathBuf::from("/w/clip.final-encoded.mkv"));
    }
}
