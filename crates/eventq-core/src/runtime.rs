use std::sync::Arc;

use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    engine::{PollEngine, RunOutcome},
    error::{EngineError, FailureKind},
    persistence::Persistence,
    session::SessionHandle,
    sink::EventSink,
    transport::Transport,
    types::{EngineConfig, QueueState},
};

#[derive(Debug)]
struct RunningPoll {
    stop: CancellationToken,
    task: JoinHandle<RunOutcome>,
}

#[derive(Debug)]
struct PollerSlot {
    running: Option<RunningPoll>,
    queue: QueueState,
}

/// Owns the background poll task and carries the queue between runs.
pub struct Poller {
    transport: Arc<dyn Transport>,
    persistence: Arc<dyn Persistence>,
    config: EngineConfig,
    session: SessionHandle,
    slot: Mutex<PollerSlot>,
}

impl Poller {
    pub fn new(
        transport: Arc<dyn Transport>,
        persistence: Arc<dyn Persistence>,
        config: EngineConfig,
    ) -> Self {
        Self::with_queue(transport, persistence, config, QueueState::unregistered())
    }

    /// Poller whose first run resumes `queue` instead of registering.
    pub fn with_queue(
        transport: Arc<dyn Transport>,
        persistence: Arc<dyn Persistence>,
        config: EngineConfig,
        queue: QueueState,
    ) -> Self {
        Self {
            transport,
            persistence,
            config,
            session: SessionHandle::new(),
            slot: Mutex::new(PollerSlot {
                running: None,
                queue,
            }),
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub async fn is_running(&self) -> bool {
        let slot = self.slot.lock().await;
        slot.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    pub async fn start(&self, sink: Arc<dyn EventSink>) -> Result<(), EngineError> {
        let mut slot = self.slot.lock().await;
        if let Some(running) = slot.running.take() {
            if !running.task.is_finished() {
                slot.running = Some(running);
                return Err(EngineError::new(
                    FailureKind::Internal,
                    "poller_already_running",
                    "poll loop is already running",
                ));
            }
            let outcome = join(running.task).await?;
            debug!(exit = ?outcome.exit, "collected finished poll run");
            slot.queue = outcome.queue;
        }

        let engine = PollEngine::new(
            self.transport.clone(),
            self.persistence.clone(),
            sink,
            self.session.clone(),
            self.config,
        );
        let stop = CancellationToken::new();
        let stop_child = stop.child_token();
        let queue = slot.queue.clone();
        let task = tokio::spawn(async move { engine.run(queue, stop_child).await });

        slot.running = Some(RunningPoll { stop, task });
        info!("poller started");
        Ok(())
    }

    /// Cancel the active run, wait for it, and keep its queue for the next start.
    pub async fn stop(&self) -> Result<RunOutcome, EngineError> {
        let mut slot = self.slot.lock().await;
        let Some(running) = slot.running.take() else {
            return Err(EngineError::new(
                FailureKind::Internal,
                "poller_not_running",
                "poll loop is not running",
            ));
        };

        running.stop.cancel();
        let outcome = join(running.task).await?;
        slot.queue = outcome.queue.clone();
        info!(exit = ?outcome.exit, "poller stopped");
        Ok(outcome)
    }
}

async fn join(task: JoinHandle<RunOutcome>) -> Result<RunOutcome, EngineError> {
    task.await.map_err(|err| {
        EngineError::new(
            FailureKind::Internal,
            "poll_task_failed",
            format!("poll task did not complete: {err}"),
        )
    })
}
