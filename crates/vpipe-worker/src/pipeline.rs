//! The three-stage worker pipeline.
//!
//! download → encode → upload, connected by bounded channels. One task
//! drains the download channel; `encode_jobs` tasks each drain the
//! encode and upload channels. Admission from the bus is gated by the
//! `prefetched` counter: work accepted but not yet finished encoding.

use chrono::Local;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use vpipe_bus::MessageBus;
use vpipe_models::{
    EventStatus, NotificationType, PipelineStage, TaskEncode, WorkTask,
};

use crate::checkpoint::CheckpointStore;
use crate::config::WorkerConfig;
use crate::download;
use crate::encode;
use crate::error::{WorkerError, WorkerResult};
use crate::events::EventSender;
use crate::shutdown::cancelled;
use crate::upload;

/// Per-stage hand-off channel capacity.
const CHANNEL_CAPACITY: usize = 100;

/// Shared state every stage sees.
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub bus: Arc<MessageBus>,
    pub events: EventSender,
    pub cancel: watch::Receiver<bool>,
    pub http: reqwest::Client,
    /// Work accepted but not yet finished encoding
    prefetched: AtomicU32,
}

impl WorkerContext {
    /// Whether the worker advertises readiness for more work.
    pub fn accept_jobs(&self) -> bool {
        if self.config.paused {
            return false;
        }
        if let Some(window) = &self.config.window {
            if !window.contains(Local::now().time()) {
                return false;
            }
        }
        self.prefetched.load(Ordering::SeqCst) < self.config.max_prefetch_jobs
    }

    pub fn prefetched(&self) -> u32 {
        self.prefetched.load(Ordering::SeqCst)
    }

    fn acquire_prefetch(&self) {
        self.prefetched.fetch_add(1, Ordering::SeqCst);
    }

    /// Saturating decrement keeps the counter in [0, max].
    fn release_prefetch(&self) {
        let _ = self
            .prefetched
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }
}

/// The worker: stage tasks plus the bus-facing consume loop.
pub struct EncodeWorker {
    ctx: Arc<WorkerContext>,
    download_tx: mpsc::Sender<WorkTask>,
    encode_tx: mpsc::Sender<WorkTask>,
    upload_tx: mpsc::Sender<WorkTask>,
    handles: Vec<JoinHandle<()>>,
}

impl EncodeWorker {
    /// Create the pipeline and spawn its stage tasks.
    pub fn new(
        config: WorkerConfig,
        bus: MessageBus,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<Self> {
        std::fs::create_dir_all(config.worker_path())?;

        let bus = Arc::new(bus);
        let events = EventSender::new(Arc::clone(&bus), &config.name);
        let ctx = Arc::new(WorkerContext {
            config,
            bus,
            events,
            cancel,
            http: reqwest::Client::new(),
            prefetched: AtomicU32::new(0),
        });

        let (download_tx, download_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (encode_tx, encode_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (upload_tx, upload_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let mut handles = Vec::new();

        handles.push(tokio::spawn(download_loop(
            Arc::clone(&ctx),
            download_rx,
            encode_tx.clone(),
        )));

        let encode_rx = Arc::new(Mutex::new(encode_rx));
        let upload_rx = Arc::new(Mutex::new(upload_rx));
        for _ in 0..ctx.config.encode_jobs.max(1) {
            handles.push(tokio::spawn(encode_loop(
                Arc::clone(&ctx),
                Arc::clone(&encode_rx),
                upload_tx.clone(),
            )));
            handles.push(tokio::spawn(upload_loop(
                Arc::clone(&ctx),
                Arc::clone(&upload_rx),
            )));
        }

        Ok(Self {
            ctx,
            download_tx,
            encode_tx,
            upload_tx,
            handles,
        })
    }

    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.ctx
    }

    /// Re-enter checkpointed tasks left by a previous run.
    pub async fn resume(&self) -> WorkerResult<usize> {
        let checkpoints = CheckpointStore::load_all(&self.ctx.config.worker_path()).await?;
        let mut resumed = 0;

        for checkpoint in checkpoints {
            let job_id = checkpoint.task.task.job_id;
            match checkpoint.resume_stage() {
                Some(PipelineStage::Download) => {
                    info!(%job_id, "Resuming at download");
                    self.ctx.acquire_prefetch();
                    self.download_tx.send(checkpoint.task).await.ok();
                    resumed += 1;
                }
                Some(PipelineStage::Encode) => {
                    info!(%job_id, "Resuming at encode");
                    self.ctx.acquire_prefetch();
                    self.encode_tx.send(checkpoint.task).await.ok();
                    resumed += 1;
                }
                Some(PipelineStage::Upload) => {
                    info!(%job_id, "Resuming at upload");
                    self.upload_tx.send(checkpoint.task).await.ok();
                    resumed += 1;
                }
                None => {
                    // Terminal leftovers are garbage from a previous run.
                    info!(%job_id, "Discarding finished checkpoint");
                    tokio::fs::remove_dir_all(&checkpoint.task.work_dir)
                        .await
                        .ok();
                }
            }
        }

        Ok(resumed)
    }

    /// Pull work from the bus until cancelled, then drain the stages.
    pub async fn run(mut self) {
        let mut cancel = self.ctx.cancel.clone();
        let stream = self.ctx.bus.config().encode_stream.clone();
        let group = self.ctx.bus.config().encode_group.clone();
        let consumer = self.ctx.config.name.clone();

        info!(
            worker = %consumer,
            max_prefetch = self.ctx.config.max_prefetch_jobs,
            encode_jobs = self.ctx.config.encode_jobs,
            "Worker consuming"
        );

        loop {
            if *cancel.borrow() {
                break;
            }

            if !self.ctx.accept_jobs() {
                if crate::shutdown::sleep_cancellable(Duration::from_secs(1), &cancel)
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }

            let result = tokio::select! {
                _ = cancelled(&mut cancel) => break,
                result = self.ctx.bus.consume(&stream, &group, &consumer, 1000, 1) => result,
            };

            match result {
                Ok(messages) => {
                    for (message_id, payload) in messages {
                        self.accept_message(&stream, &group, &message_id, &payload)
                            .await;
                    }
                }
                Err(e) => {
                    error!("Error consuming work queue: {}", e);
                    if crate::shutdown::sleep_cancellable(Duration::from_secs(5), &cancel)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }

        info!("Worker stopping, closing stage channels");
        drop(self.download_tx);
        drop(self.encode_tx);
        drop(self.upload_tx);

        for handle in self.handles.drain(..) {
            handle.await.ok();
        }
        info!("Worker stopped");
    }

    /// Accept one work message: checkpoint it, ack it, hand it off.
    async fn accept_message(&self, stream: &str, group: &str, message_id: &str, payload: &[u8]) {
        let task: TaskEncode = match serde_json::from_slice(payload) {
            Ok(task) => task,
            Err(e) => {
                warn!(message_id, "Dropping malformed work message: {}", e);
                self.ctx.bus.ack(stream, group, message_id).await.ok();
                return;
            }
        };

        let job_id = task.job_id;
        let work_dir = self.ctx.config.worker_path().join(job_id.to_string());
        if let Err(e) = tokio::fs::create_dir_all(&work_dir).await {
            error!(%job_id, "Failed to create work dir: {}", e);
            return;
        }

        let mut work_task = WorkTask::new(task, work_dir);

        // The checkpoint written here makes the job ours; only then is
        // the delivery acked.
        if let Err(e) = self
            .ctx
            .events
            .emit(
                &mut work_task,
                NotificationType::Job,
                EventStatus::Progressing,
                "",
            )
            .await
        {
            error!(%job_id, "Failed to checkpoint accepted job: {}", e);
            return;
        }
        self.ctx.bus.ack(stream, group, message_id).await.ok();

        self.ctx.acquire_prefetch();
        info!(%job_id, prefetched = self.ctx.prefetched(), "Accepted job");
        self.download_tx.send(work_task).await.ok();
    }
}

async fn download_loop(
    ctx: Arc<WorkerContext>,
    mut rx: mpsc::Receiver<WorkTask>,
    encode_tx: mpsc::Sender<WorkTask>,
) {
    let mut cancel = ctx.cancel.clone();
    loop {
        let mut task = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            task = rx.recv() => match task {
                Some(task) => task,
                None => return,
            },
        };

        if let Err(e) = ctx
            .events
            .emit(
                &mut task,
                NotificationType::Download,
                EventStatus::Progressing,
                "",
            )
            .await
        {
            warn!(job_id = %task.task.job_id, "Checkpoint write failed: {}", e);
        }

        match download::run(&ctx, &mut task).await {
            Ok(()) => {
                ctx.events
                    .emit(
                        &mut task,
                        NotificationType::Download,
                        EventStatus::Completed,
                        "",
                    )
                    .await
                    .ok();
                if encode_tx.send(task).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                if !e.is_cancelled() {
                    ctx.events
                        .emit(
                            &mut task,
                            NotificationType::Download,
                            EventStatus::Failed,
                            e.to_string(),
                        )
                        .await
                        .ok();
                }
                fail_job(&ctx, &mut task, &e).await;
                ctx.release_prefetch();
            }
        }
    }
}

async fn encode_loop(
    ctx: Arc<WorkerContext>,
    rx: Arc<Mutex<mpsc::Receiver<WorkTask>>>,
    upload_tx: mpsc::Sender<WorkTask>,
) {
    let mut cancel = ctx.cancel.clone();
    loop {
        let mut task = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancelled(&mut cancel) => return,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => return,
                },
            }
        };

        let result = encode::run(&ctx, &mut task).await;
        // The admission window ends when the job leaves the encode
        // stage, successful or not.
        ctx.release_prefetch();

        match result {
            Ok(()) => {
                if upload_tx.send(task).await.is_err() {
                    return;
                }
            }
            Err(e) => fail_job(&ctx, &mut task, &e).await,
        }
    }
}

async fn upload_loop(ctx: Arc<WorkerContext>, rx: Arc<Mutex<mpsc::Receiver<WorkTask>>>) {
    let mut cancel = ctx.cancel.clone();
    loop {
        let mut task = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancelled(&mut cancel) => return,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => return,
                },
            }
        };

        if let Err(e) = ctx
            .events
            .emit(
                &mut task,
                NotificationType::Upload,
                EventStatus::Progressing,
                "",
            )
            .await
        {
            warn!(job_id = %task.task.job_id, "Checkpoint write failed: {}", e);
        }

        match upload::run(&ctx, &mut task).await {
            Ok(()) => {
                ctx.events
                    .emit(
                        &mut task,
                        NotificationType::Upload,
                        EventStatus::Completed,
                        "",
                    )
                    .await
                    .ok();
                ctx.events
                    .emit(&mut task, NotificationType::Job, EventStatus::Completed, "")
                    .await
                    .ok();
                clean_work_dir(&task).await;
            }
            Err(e) => {
                if !e.is_cancelled() {
                    ctx.events
                        .emit(
                            &mut task,
                            NotificationType::Upload,
                            EventStatus::Failed,
                            e.to_string(),
                        )
                        .await
                        .ok();
                }
                fail_job(&ctx, &mut task, &e).await;
            }
        }
    }
}

/// Terminal handling for a failed or cancelled task.
///
/// Cancellation publishes `JOB:canceled` without rewriting the
/// checkpoint and leaves the work dir intact so the task resumes after
/// a restart. Real failures emit `JOB:failed` and clean up.
async fn fail_job(ctx: &WorkerContext, task: &mut WorkTask, err: &WorkerError) {
    if err.is_cancelled() {
        ctx.events
            .publish_only(task, NotificationType::Job, EventStatus::Canceled, "")
            .await;
        return;
    }

    error!(job_id = %task.task.job_id, "Job failed: {}", err);
    ctx.events
        .emit(
            task,
            NotificationType::Job,
            EventStatus::Failed,
            err.to_string(),
        )
        .await
        .ok();
    clean_work_dir(task).await;
}

async fn clean_work_dir(task: &WorkTask) {
    if let Err(e) = tokio::fs::remove_dir_all(&task.work_dir).await {
        warn!(
            job_id = %task.task.job_id,
            "Failed to clean work dir {}: {}",
            task.work_dir.display(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DailyWindow;

    fn context_with(config: WorkerConfig) -> WorkerContext {
        let bus = Arc::new(
            MessageBus::new(vpipe_bus::BusConfig::default()).expect("bus client"),
        );
        let (_tx, cancel) = watch::channel(false);
        WorkerContext {
            events: EventSender::new(Arc::clone(&bus), &config.name),
            config,
            bus,
            cancel,
            http: reqwest::Client::new(),
            prefetched: AtomicU32::new(0),
        }
    }

    #[test]
    fn prefetch_gates_admission() {
        let ctx = context_with(WorkerConfig {
            max_prefetch_jobs: 2,
            ..Default::default()
        });

        assert!(ctx.accept_jobs());
        ctx.acquire_prefetch();
        assert!(ctx.accept_jobs());
        ctx.acquire_prefetch();
        assert!(!ctx.accept_jobs());

        ctx.release_prefetch();
        assert!(ctx.accept_jobs());
    }

    #[test]
    fn release_never_underflows() {
        let ctx = context_with(WorkerConfig::default());
        ctx.release_prefetch();
        ctx.release_prefetch();
        assert_eq!(ctx.prefetched(), 0);
    }

    #[test]
    fn paused_worker_accepts_nothing() {
        let ctx = context_with(WorkerConfig {
            paused: true,
            ..Default::default()
        });
        assert!(!ctx.accept_jobs());
    }

    #[test]
    fn window_gates_admission() {
        // A window that excludes every time of day cannot exist; build
        // one we are guaranteed to be outside of by inverting bounds.
        let now = Local::now().time();
        let outside = DailyWindow {
            start_after: now,
            stop_after: now,
        };
        let ctx = context_with(WorkerConfig {
            window: Some(outside),
            ..Default::default()
        });
        assert!(!ctx.accept_jobs());
    }
}
