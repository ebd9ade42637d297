//! Image-subtitle OCR bridge.

use futures_util::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use vpipe_models::{MediaContainer, TaskPgs, WorkTask};

use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::WorkerContext;
use crate::shutdown::cancelled;

/// Overall wait for all OCR replies of one job.
const PGS_WAIT: Duration = Duration::from_secs(90 * 60);

/// Send one OCR request per extracted image subtitle and collect the
/// correlated replies into `<pgs_id>.srt` files.
///
/// The reply subscription is opened before the first request so no
/// reply can be lost. There is no per-request retry at this layer; the
/// overall timeout bounds the wait.
pub async fn convert_image_subtitles(
    ctx: &WorkerContext,
    task: &WorkTask,
    container: &MediaContainer,
) -> WorkerResult<()> {
    let subtitles: Vec<_> = container.image_subtitles().collect();
    if subtitles.is_empty() {
        return Ok(());
    }

    let job_id = task.task.job_id;
    let mut replies = ctx.bus.subscribe_pgs_replies(&job_id).await?;

    let mut pending: HashSet<u32> = HashSet::new();
    for subtitle in &subtitles {
        let sup_path = task.work_dir.join(format!("{}.sup", subtitle.id));
        let data = tokio::fs::read(&sup_path).await?;

        debug!(
            %job_id,
            pgs_id = subtitle.id,
            bytes = data.len(),
            "Requesting PGS conversion"
        );

        ctx.bus
            .request_pgs(&TaskPgs {
                job_id,
                pgs_id: subtitle.id,
                data,
                language: subtitle.language.clone(),
            })
            .await?;
        pending.insert(subtitle.id);
    }

    let deadline = tokio::time::sleep(PGS_WAIT);
    tokio::pin!(deadline);
    let mut cancel = ctx.cancel.clone();

    while !pending.is_empty() {
        tokio::select! {
            _ = cancelled(&mut cancel) => return Err(WorkerError::Cancelled),
            _ = &mut deadline => return Err(WorkerError::PgsTimeout),
            reply = replies.next() => {
                let Some(reply) = reply else {
                    return Err(WorkerError::Pgs("reply stream closed".to_string()));
                };
                if let Some(error) = reply.error {
                    return Err(WorkerError::Pgs(format!(
                        "error on process PGS {}: {}",
                        reply.pgs_id, error
                    )));
                }

                let srt_path = task.work_dir.join(format!("{}.srt", reply.pgs_id));
                tokio::fs::write(&srt_path, &reply.srt).await?;
                debug!(%job_id, pgs_id = reply.pgs_id, "PGS converted");
                pending.remove(&reply.pgs_id);
            }
        }
    }

    Ok(())
}
