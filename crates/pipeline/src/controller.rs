//! The operator control surface: start, cancel and status for one job at a
//! time, sequenced over the event bus.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use reelsmith_core::{
    BusConfig, EventBus, EventBusBuilder, Worker,
    workers::{WorkerInputs, WorkerWiring},
};
use tokio::{
    sync::{broadcast, watch},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    artifacts::JobPaths,
    collaborators::Collaborators,
    config::{CaptionStrategy, PipelineConfig},
    error::ControlError,
    stages::{
        FootageLocator, NarrationSynthesizer, Publisher, ScriptGenerator, SubtitleDeriver,
        VideoAssembler,
    },
    types::{CancelAck, GenerationRequest, JobId, JobStatus, Stage},
    workers::{
        ActiveSlot, DeriveCaptionsWorker, GenerateScriptWorker, JobContext, JobFinalizer,
        LocateFootageWorker, PublishVideoWorker, RenderVideoWorker, SynthesizeNarrationWorker,
        events::{JobCancelled, JobRequested},
    },
};

/// A started job. Dropping the handle does not cancel the job.
pub struct JobHandle {
    pub id: JobId,
    status: watch::Receiver<JobStatus>,
}

impl JobHandle {
    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// A receiver that sees every status change of this job.
    pub fn watch(&self) -> watch::Receiver<JobStatus> {
        self.status.clone()
    }

    /// Resolve once the job reaches a terminal status.
    pub async fn wait(mut self) -> JobStatus {
        let terminal = self
            .status
            .wait_for(JobStatus::is_terminal)
            .await
            .map(|status| status.clone());
        // The senders only go away when the controller shuts down mid-job.
        terminal.unwrap_or_else(|_| self.status.borrow().clone())
    }
}

struct JobEntry {
    job: JobContext,
    status: watch::Receiver<JobStatus>,
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<JobId, JobEntry>,
    order: VecDeque<JobId>,
}

impl Registry {
    /// Insert, then drop the oldest finished jobs beyond `capacity`.
    fn insert(&mut self, id: JobId, entry: JobEntry, capacity: usize) {
        self.jobs.insert(id, entry);
        self.order.push_back(id);

        while self.order.len() > capacity.max(1) {
            let Some(pos) = self.order.iter().position(|id| {
                self.jobs
                    .get(id)
                    .is_none_or(|e| e.status.borrow().is_terminal())
            }) else {
                break;
            };
            if let Some(evicted) = self.order.remove(pos) {
                self.jobs.remove(&evicted);
                debug!(job_id = %evicted, "status evicted from history");
            }
        }
    }
}

struct ControllerInner {
    bus: Arc<EventBus>,
    config: Arc<PipelineConfig>,
    can_publish: bool,
    slot: ActiveSlot,
    registry: Mutex<Registry>,
    shutdown_tx: broadcast::Sender<()>,
    shut_down: AtomicBool,
    /// Jobs whose stage was abandoned; swept again once the workers stop.
    abandoned: Mutex<Vec<JobContext>>,
}

#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

fn take_inputs<W: Worker>(wiring: &mut WorkerWiring) -> anyhow::Result<WorkerInputs> {
    wiring
        .take(W::SUBSCRIBER_ID)
        .ok_or_else(|| anyhow::anyhow!("no inputs wired for {}", W::SUBSCRIBER_ID))
}

impl Controller {
    /// Build the bus and spawn one task per worker. Must be called from
    /// within a Tokio runtime.
    pub fn launch(config: PipelineConfig, collaborators: Collaborators) -> anyhow::Result<Self> {
        if config.caption_strategy == CaptionStrategy::Transcription && collaborators.transcriber.is_none() {
            warn!("transcription captions requested without a transcriber, using heuristic timing");
        }
        let config = Arc::new(config);
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let slot = ActiveSlot::default();

        let (bus, mut wiring, tasks) = EventBusBuilder::new(BusConfig::default())
            .subscribe(GenerateScriptWorker::subscription())
            .subscribe(LocateFootageWorker::subscription())
            .subscribe(SynthesizeNarrationWorker::subscription())
            .subscribe(DeriveCaptionsWorker::subscription())
            .subscribe(RenderVideoWorker::subscription())
            .subscribe(PublishVideoWorker::subscription())
            .subscribe(JobFinalizer::subscription())
            .build()?;
        let bus = Arc::new(bus);

        // Isolated drain tasks must run before anything is published.
        for t in tasks.tokio {
            tokio::spawn(t);
        }

        let c = &collaborators;
        let script = GenerateScriptWorker::new(ScriptGenerator::new(
            Arc::clone(&c.language_model),
            Arc::clone(&config),
        ));
        let footage = LocateFootageWorker::new(FootageLocator::new(
            Arc::clone(&c.footage),
            Arc::clone(&c.media),
            Arc::clone(&config),
        ));
        let narration = SynthesizeNarrationWorker::new(NarrationSynthesizer::new(
            Arc::clone(&c.speech),
            Arc::clone(&c.media),
            Arc::clone(&config),
        ));
        let captions = DeriveCaptionsWorker::new(SubtitleDeriver::new(
            c.transcriber.clone(),
            Arc::clone(&config),
        ));
        let render = RenderVideoWorker::new(VideoAssembler::new(
            Arc::clone(&c.media),
            Arc::clone(&config),
        ));
        let publish = PublishVideoWorker::new(Publisher::new(
            c.video_host.clone(),
            Arc::clone(&c.language_model),
            Arc::clone(&config),
        ));
        let finalizer = JobFinalizer::new(slot.clone(), Arc::clone(&config));

        tokio::spawn(script.run(
            take_inputs::<GenerateScriptWorker>(&mut wiring)?,
            Arc::clone(&bus),
            shutdown_rx.resubscribe(),
        ));
        tokio::spawn(footage.run(
            take_inputs::<LocateFootageWorker>(&mut wiring)?,
            Arc::clone(&bus),
            shutdown_rx.resubscribe(),
        ));
        tokio::spawn(narration.run(
            take_inputs::<SynthesizeNarrationWorker>(&mut wiring)?,
            Arc::clone(&bus),
            shutdown_rx.resubscribe(),
        ));
        tokio::spawn(captions.run(
            take_inputs::<DeriveCaptionsWorker>(&mut wiring)?,
            Arc::clone(&bus),
            shutdown_rx.resubscribe(),
        ));
        tokio::spawn(render.run(
            take_inputs::<RenderVideoWorker>(&mut wiring)?,
            Arc::clone(&bus),
            shutdown_rx.resubscribe(),
        ));
        tokio::spawn(publish.run(
            take_inputs::<PublishVideoWorker>(&mut wiring)?,
            Arc::clone(&bus),
            shutdown_rx.resubscribe(),
        ));
        tokio::spawn(finalizer.run(
            take_inputs::<JobFinalizer>(&mut wiring)?,
            Arc::clone(&bus),
            shutdown_rx,
        ));

        let unclaimed = wiring.unclaimed();
        if !unclaimed.is_empty() {
            warn!(?unclaimed, "subscribers without a running worker");
        }

        info!(
            session_id = %bus.session_id(),
            work_root = %config.work_root.display(),
            output_dir = %config.output_dir.display(),
            "pipeline ready"
        );

        Ok(Self {
            inner: Arc::new(ControllerInner {
                bus,
                can_publish: collaborators.video_host.is_some(),
                config,
                slot,
                registry: Mutex::new(Registry::default()),
                shutdown_tx,
                shut_down: AtomicBool::new(false),
                abandoned: Mutex::new(Vec::new()),
            }),
        })
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// The job currently holding the single-job slot.
    pub fn active(&self) -> Option<JobId> {
        self.inner.slot.current()
    }

    /// Accept `request` unless another job is in flight.
    pub fn start(&self, request: GenerationRequest) -> Result<JobHandle, ControlError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(ControlError::ShutDown);
        }
        request
            .validate()
            .map_err(|e| ControlError::InvalidRequest(e.to_string()))?;
        if request.publish && !self.inner.can_publish {
            return Err(ControlError::InvalidRequest(
                "publishing requested but no video host is configured".into(),
            ));
        }

        let id = JobId::new();
        self.inner
            .slot
            .claim(id)
            .map_err(|active| ControlError::Busy { active })?;

        let (status_tx, status_rx) = watch::channel(JobStatus::Queued);
        let cancel = Arc::new(AtomicBool::new(false));
        let config = &self.inner.config;
        let paths = JobPaths::new(&config.work_root, &config.output_dir, id);

        info!(
            job_id = %id,
            topic = %request.topic,
            voice = %request.voice,
            publish = request.publish,
            "job accepted"
        );
        let job = JobContext::new(id, request, paths, cancel, Arc::new(status_tx));
        self.registry().insert(
            id,
            JobEntry {
                job: job.clone(),
                status: status_rx.clone(),
            },
            config.status_history,
        );
        self.inner.bus.publish(Arc::new(JobRequested::new(job)));

        Ok(JobHandle {
            id,
            status: status_rx,
        })
    }

    /// Request cooperative cancellation; it takes effect at the next stage
    /// boundary.
    pub fn cancel(&self, id: JobId) -> Result<CancelAck, ControlError> {
        let registry = self.registry();
        let entry = registry.jobs.get(&id).ok_or(ControlError::UnknownJob(id))?;
        if entry.status.borrow().is_terminal() {
            return Ok(CancelAck::AlreadyFinished);
        }
        entry.job.request_cancel();
        info!(job_id = %id, "cancellation requested");
        Ok(CancelAck::Requested)
    }

    pub fn status(&self, id: JobId) -> Result<JobStatus, ControlError> {
        self.registry()
            .jobs
            .get(&id)
            .map(|entry| entry.status.borrow().clone())
            .ok_or(ControlError::UnknownJob(id))
    }

    /// The request job `id` was started with.
    pub fn request(&self, id: JobId) -> Result<GenerationRequest, ControlError> {
        self.registry()
            .jobs
            .get(&id)
            .map(|entry| entry.job.request.clone())
            .ok_or(ControlError::UnknownJob(id))
    }

    /// A receiver that sees every status change of job `id`.
    pub fn watch(&self, id: JobId) -> Result<watch::Receiver<JobStatus>, ControlError> {
        self.registry()
            .jobs
            .get(&id)
            .map(|entry| entry.status.clone())
            .ok_or(ControlError::UnknownJob(id))
    }

    /// Cancel the active job, give its stage `shutdown_grace` to reach the
    /// boundary, then stop every worker. A stage still running after the
    /// grace period is abandoned and the job finalized as cancelled at that
    /// stage, so no job is left running and no temp files outlive shutdown.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(active) = self.active() {
            self.wind_down(active).await;
        }
        let _ = self.inner.shutdown_tx.send(());

        // Anything an abandoned stage wrote after its job was finalized.
        tokio::task::yield_now().await;
        let abandoned = std::mem::take(
            &mut *self.inner.abandoned.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for job in abandoned {
            let report = job.ledger.cleanup().await;
            debug!(job_id = %job.id, removed = report.removed, "swept abandoned job");
        }
        info!("pipeline shut down");
    }

    /// Finalize job `id` as cancelled at its current stage without waiting
    /// for that stage to reach a boundary. Whatever the abandoned stage
    /// reports afterwards is ignored.
    pub async fn abandon(&self, id: JobId) -> Result<CancelAck, ControlError> {
        let (job, mut status) = self.entry(id)?;
        if job.is_finished() {
            return Ok(CancelAck::AlreadyFinished);
        }
        job.request_cancel();

        let stage = match job.status() {
            JobStatus::Running { stage } => stage,
            _ => Stage::Script,
        };
        warn!(job_id = %id, stage = %stage, "abandoning stage in flight");
        self.inner
            .abandoned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job.clone());
        self.inner
            .bus
            .publish(Arc::new(JobCancelled::abandoned(job, stage)));
        if !settled(&mut status, self.inner.config.shutdown_grace).await {
            warn!(job_id = %id, "abandoned job was not finalized in time");
        }
        Ok(CancelAck::Requested)
    }

    fn entry(&self, id: JobId) -> Result<(JobContext, watch::Receiver<JobStatus>), ControlError> {
        self.registry()
            .jobs
            .get(&id)
            .map(|entry| (entry.job.clone(), entry.status.clone()))
            .ok_or(ControlError::UnknownJob(id))
    }

    /// Drive job `id` to a terminal status, abandoning its stage if it does
    /// not reach the boundary within the grace period.
    async fn wind_down(&self, id: JobId) {
        let Ok((job, mut status)) = self.entry(id) else {
            return;
        };
        job.request_cancel();
        info!(job_id = %id, "cancelling active job for shutdown");

        if !settled(&mut status, self.inner.config.shutdown_grace).await {
            let _ = self.abandon(id).await;
        }
    }
}

/// Wait up to `grace` for a terminal status.
async fn settled(status: &mut watch::Receiver<JobStatus>, grace: Duration) -> bool {
    matches!(
        timeout(grace, status.wait_for(JobStatus::is_terminal)).await,
        Ok(Ok(_))
    )
}
