//! Single-flight inference executor
//!
//! `InferenceEngine` owns the model session and runs at most one generation
//! at a time. A submitted job runs on a blocking worker; its progress events
//! travel through an unbounded channel to a delivery task that hands them to
//! the caller's sink in emission order. The busy gate is only test-and-set in
//! `submit` and released by the delivery task once the terminal event has
//! been delivered, so it is never held across inference.

use crate::{
    config::EngineConfig,
    generation::{pipeline::GenerationPipeline, GenerationRequest, GenerationResult},
    model::{Model, ModelInfo},
    progress::{ProgressEvent, ProgressSink},
    session::ModelSession,
    tokenizer::MidiTokenizer,
    validation::Validator,
    CoreError, Result,
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct ActiveJob {
    id: Uuid,
    cancel: CancellationToken,
    finished: watch::Receiver<bool>,
}

/// Releases the busy gate when the delivery task ends
struct GateGuard {
    busy: Arc<AtomicBool>,
    active: Arc<Mutex<Option<ActiveJob>>>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.active.lock().take();
        self.busy.store(false, Ordering::Release);
    }
}

/// Main inference engine that owns the model session
pub struct InferenceEngine {
    /// Engine configuration
    config: EngineConfig,
    /// Loaded model, `None` when the artifact could not be loaded
    session: Option<Arc<ModelSession>>,
    /// Why the session is missing
    unavailable_reason: Option<String>,
    tokenizer: Arc<MidiTokenizer>,
    busy: Arc<AtomicBool>,
    active: Arc<Mutex<Option<ActiveJob>>>,
}

impl InferenceEngine {
    /// Create an engine, loading the model artifact named by the configuration
    ///
    /// A missing or unloadable artifact is not an error here: the engine
    /// starts unavailable and `submit` reports `ModelUnavailable`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let model_path = config.model_path();
        match ModelSession::load(&model_path, &config.session) {
            Ok(session) => {
                info!("Model loaded from {}", model_path.display());
                Ok(Self::build(config, Some(Arc::new(session)), None))
            }
            Err(e) => {
                warn!("Engine starting without a model: {}", e);
                Ok(Self::build(config, None, Some(e.to_string())))
            }
        }
    }

    /// Create an engine around an existing session
    pub fn with_session(config: EngineConfig, session: ModelSession) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, Some(Arc::new(session)), None))
    }

    /// Create an engine around any model backend
    pub fn with_model(config: EngineConfig, model: Arc<dyn Model>) -> Result<Self> {
        let session = ModelSession::from_model(model, config.session.clone())?;
        Self::with_session(config, session)
    }

    fn build(
        config: EngineConfig,
        session: Option<Arc<ModelSession>>,
        unavailable_reason: Option<String>,
    ) -> Self {
        let tokenizer = Arc::new(MidiTokenizer::new(config.tokenizer.clone()));
        Self {
            config,
            session,
            unavailable_reason,
            tokenizer,
            busy: Arc::new(AtomicBool::new(false)),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Get engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The engine's tokenizer
    pub fn tokenizer(&self) -> &MidiTokenizer {
        &self.tokenizer
    }

    /// Whether a model is loaded
    pub fn is_available(&self) -> bool {
        self.session.is_some()
    }

    /// Why no model is loaded, if none is
    pub fn unavailable_reason(&self) -> Option<&str> {
        self.unavailable_reason.as_deref()
    }

    /// Get current model information
    pub fn model_info(&self) -> Option<ModelInfo> {
        self.session.as_ref().map(|s| s.model_info())
    }

    /// The loaded session
    pub fn session(&self) -> Option<&Arc<ModelSession>> {
        self.session.as_ref()
    }

    /// Whether a job is in flight
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Id of the in-flight job
    pub fn active_job(&self) -> Option<Uuid> {
        self.active.lock().as_ref().map(|job| job.id)
    }

    /// Start a generation in the background
    ///
    /// Parameters (against the configured sequence limit too), model
    /// availability, the source file and the busy gate
    /// are checked here, in that order; any failure returns before work is
    /// spawned. Everything after that is reported only through `sink`, which
    /// always receives exactly one terminal event. Must be called from within
    /// a Tokio runtime.
    pub fn submit<S: ProgressSink>(&self, request: GenerationRequest, sink: S) -> Result<JobHandle> {
        Validator::validate_generation_request(&request)?;
        Validator::validate_context_budget(request.prompt_len, self.config.max_sequence_length)?;

        let session = match &self.session {
            Some(session) => Arc::clone(session),
            None => {
                return Err(CoreError::model_unavailable(
                    "MODEL_UNAVAILABLE",
                    match &self.unavailable_reason {
                        Some(reason) => format!("No model is loaded: {}", reason),
                        None => "No model is loaded".to_string(),
                    },
                    "Place the model artifact in the working directory and restart",
                    Some(self.config.model_path()),
                ))
            }
        };

        Validator::validate_midi_path(&request.midi_path)?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            CoreError::internal(
                "NO_RUNTIME",
                format!("submit called outside a Tokio runtime: {}", e),
                "Spawning generation worker",
            )
        })?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CoreError::busy(self.active_job()));
        }

        let job_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (finished_tx, finished_rx) = watch::channel(false);
        *self.active.lock() = Some(ActiveJob {
            id: job_id,
            cancel: cancel.clone(),
            finished: finished_rx,
        });
        let guard = GateGuard {
            busy: Arc::clone(&self.busy),
            active: Arc::clone(&self.active),
        };

        info!(
            "Submitting generation {} for {}",
            job_id,
            request.midi_path.display()
        );

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let tokenizer = Arc::clone(&self.tokenizer);
        let max_sequence_length = self.config.max_sequence_length;
        let progress_interval = self.config.progress_interval;
        let worker_cancel = cancel.clone();

        let worker = runtime.spawn_blocking(move || {
            let mut emit = |event: ProgressEvent| {
                let _ = event_tx.send(event);
            };
            let mut pipeline = GenerationPipeline::new(
                &session,
                &tokenizer,
                max_sequence_length,
                progress_interval,
            );
            let result = pipeline.run(job_id, &request, &worker_cancel, &mut emit);
            emit(terminal_event(job_id, &result));
            result
        });

        runtime.spawn(async move {
            let mut terminal_seen = false;
            while let Some(event) = event_rx.recv().await {
                terminal_seen |= event.is_terminal();
                sink.deliver(event);
            }

            let result = match worker.await {
                Ok(result) => result,
                Err(join_err) => {
                    error!("Generation {} worker failed: {}", job_id, join_err);
                    Err(CoreError::internal(
                        "WORKER_FAILED",
                        format!("Generation worker stopped unexpectedly: {}", join_err),
                        "Running generation",
                    ))
                }
            };
            if !terminal_seen {
                sink.deliver(terminal_event(job_id, &result));
            }

            drop(guard);
            debug!("Generation {} released the engine", job_id);
            let _ = finished_tx.send(true);
            let _ = outcome_tx.send(result);
        });

        Ok(JobHandle {
            id: job_id,
            cancel,
            outcome: outcome_rx,
        })
    }

    /// Request cancellation of the in-flight job, if any
    ///
    /// Takes effect at the next decode step boundary.
    pub fn try_cancel(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(job) => {
                info!("Cancellation requested for generation {}", job.id);
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel any in-flight job and wait until the engine is idle
    pub async fn shutdown(&self) {
        let finished = self.active.lock().as_ref().map(|job| {
            job.cancel.cancel();
            job.finished.clone()
        });
        if let Some(mut finished) = finished {
            // An error means the delivery task is gone, which is also idle
            let _ = finished.wait_for(|done| *done).await;
        }
        info!("Inference engine shut down");
    }
}

fn terminal_event(job_id: Uuid, result: &Result<GenerationResult>) -> ProgressEvent {
    match result {
        Ok(result) => ProgressEvent::done(job_id, result.output_path.clone()),
        Err(e @ CoreError::Cancelled { .. }) => ProgressEvent::cancelled(job_id, e.to_string()),
        Err(e) => ProgressEvent::error(job_id, e.code(), e.to_string()),
    }
}

/// Handle to a submitted generation
///
/// Dropping the handle does not cancel the job.
pub struct JobHandle {
    id: Uuid,
    cancel: CancellationToken,
    outcome: oneshot::Receiver<Result<GenerationResult>>,
}

impl JobHandle {
    /// Job ID, as carried by its progress events
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the terminal event has been delivered and the engine is free
    pub async fn join(self) -> Result<GenerationResult> {
        match self.outcome.await {
            Ok(result) => result,
            Err(_) => Err(CoreError::internal(
                "JOB_LOST",
                "Generation ended without reporting an outcome",
                "Joining generation job",
            )),
        }
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle").field("id", &self.id).finish()
    }
}
