use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    dispatch::EventDispatcher,
    error::{EngineError, Recovery, classify_transport_error},
    persistence::Persistence,
    session::SessionHandle,
    sink::EventSink,
    state_machine::EngineStateMachine,
    transport::{ApiRequest, Transport},
    types::{
        EngineConfig, EventsResponse, QueueState, RawEvent, RegistrationResult,
        RegistrationSnapshot,
    },
};

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Cancellation was observed.
    Aborted,
    /// An unexpected failure terminated the loop.
    Fatal(EngineError),
}

/// Result of one engine run: the queue to resume from and why the run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub queue: QueueState,
    pub exit: ExitReason,
}

/// Per-run mutable state, owned by the loop and never shared.
struct RunState {
    queue: QueueState,
    failures: u32,
    ready_signalled: bool,
    machine: EngineStateMachine,
}

impl RunState {
    fn new(queue: QueueState) -> Self {
        let machine = EngineStateMachine::for_queue(queue.is_registered());
        Self {
            queue,
            failures: 0,
            ready_signalled: false,
            machine,
        }
    }
}

/// Register/poll/recover loop over one event queue.
pub struct PollEngine {
    transport: Arc<dyn Transport>,
    persistence: Arc<dyn Persistence>,
    sink: Arc<dyn EventSink>,
    session: SessionHandle,
    dispatcher: EventDispatcher,
    config: EngineConfig,
}

impl PollEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        persistence: Arc<dyn Persistence>,
        sink: Arc<dyn EventSink>,
        session: SessionHandle,
        config: EngineConfig,
    ) -> Self {
        let dispatcher = EventDispatcher::new(persistence.clone(), sink.clone(), session.clone());
        Self {
            transport,
            persistence,
            sink,
            session,
            dispatcher,
            config,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Run until `stop` is cancelled or an unexpected failure occurs.
    ///
    /// Every call is a new run: the ready signal fires again once, and the
    /// first poll does not block.
    pub async fn run(&self, queue: QueueState, stop: CancellationToken) -> RunOutcome {
        let mut run = RunState::new(queue);
        self.session.publish_queue(&run.queue);
        self.publish_state(&run);
        info!(queue_id = ?run.queue.queue_id(), "poll loop started");

        loop {
            if stop.is_cancelled() {
                return self.abort(run);
            }

            let failure = match self.iterate(&mut run, &stop).await {
                Ok(()) => continue,
                Err(err) => err,
            };

            match failure.recovery() {
                Recovery::Stop => return self.abort(run),
                Recovery::Fatal => return self.fail(run, failure),
                Recovery::Reregister => {
                    warn!(
                        queue_id = ?run.queue.queue_id(),
                        error = %failure,
                        "event queue expired; registering a new one"
                    );
                    run.queue.expire();
                    self.session.publish_queue(&run.queue);
                    if let Err(err) = run.machine.on_queue_expired() {
                        return self.fail(run, err);
                    }
                    self.publish_state(&run);
                }
                Recovery::RetryNow => {
                    debug!(error = %failure, "request timed out; retrying immediately");
                }
                Recovery::Backoff => {
                    if let Err(err) = self.back_off(&mut run, &failure, &stop).await {
                        return self.terminate(run, err);
                    }
                }
            }
        }
    }

    async fn iterate(
        &self,
        run: &mut RunState,
        stop: &CancellationToken,
    ) -> Result<(), EngineError> {
        if !run.queue.is_registered() {
            let registration = self.register(stop).await?;
            self.apply_registration(run, registration)?;
        }

        let dont_block = run.queue.awaiting_first_poll() || !run.ready_signalled;
        let request = ApiRequest::poll(&run.queue, dont_block)
            .ok_or_else(|| EngineError::invalid_state(run.machine.state(), "poll"))?;
        let body = self.call(&request, stop).await?;
        let response: EventsResponse = serde_json::from_str(&body)
            .map_err(|err| EngineError::malformed("events response", err))?;

        self.apply_events(run, response.events)
    }

    async fn register(&self, stop: &CancellationToken) -> Result<RegistrationResult, EngineError> {
        let body = self.call(&ApiRequest::register(), stop).await?;
        serde_json::from_str(&body).map_err(|err| EngineError::malformed("register response", err))
    }

    fn apply_registration(
        &self,
        run: &mut RunState,
        registration: RegistrationResult,
    ) -> Result<(), EngineError> {
        let RegistrationResult {
            queue_id,
            last_event_id,
            pointer,
            max_message_id,
            subscriptions,
            realm_users,
        } = registration;

        info!(%queue_id, last_event_id, "registered event queue");
        run.queue.assign(queue_id, last_event_id);
        self.session
            .publish_registration(&run.queue, pointer, max_message_id);
        run.failures = 0;
        run.machine.on_registered()?;
        self.publish_state(run);

        let snapshot = RegistrationSnapshot {
            pointer,
            max_message_id,
            streams: subscriptions,
            people: realm_users,
        };
        if let Err(err) = self.process_registration(&snapshot) {
            // The queue is only handed back once its registration data is stored.
            run.queue.expire();
            self.session.publish_queue(&run.queue);
            return Err(err);
        }

        self.sink.on_registration_processed(snapshot);
        self.signal_ready(run, true);
        Ok(())
    }

    fn process_registration(&self, snapshot: &RegistrationSnapshot) -> Result<(), EngineError> {
        let trimmed = self
            .persistence
            .trim_old_messages(self.config.message_retention)
            .map_err(|err| EngineError::storage("trim_old_messages", err))?;
        if trimmed > 0 {
            debug!(trimmed, "trimmed stored messages");
        }
        self.persistence
            .persist_streams(&snapshot.streams)
            .map_err(|err| EngineError::storage("persist_streams", err))?;
        self.persistence
            .persist_people(&snapshot.people)
            .map_err(|err| EngineError::storage("persist_people", err))?;
        debug!(
            streams = snapshot.streams.len(),
            people = snapshot.people.len(),
            "registration persisted"
        );
        Ok(())
    }

    fn apply_events(&self, run: &mut RunState, events: Vec<RawEvent>) -> Result<(), EngineError> {
        trace!(count = events.len(), "poll returned");
        if !events.is_empty() {
            let summary = self.dispatcher.dispatch(events)?;
            if let Some(last_event_id) = summary.last_event_id {
                if last_event_id < run.queue.last_event_id() {
                    warn!(
                        last_event_id,
                        cursor = run.queue.last_event_id(),
                        "server batch ends before the current cursor"
                    );
                }
                run.queue.advance(last_event_id);
            }
        }

        run.queue.mark_polled();
        self.session.publish_queue(&run.queue);
        run.failures = 0;
        self.signal_ready(run, false);
        Ok(())
    }

    async fn call(
        &self,
        request: &ApiRequest,
        stop: &CancellationToken,
    ) -> Result<String, EngineError> {
        trace!(path = request.path, method = ?request.method, "issuing request");
        tokio::select! {
            biased;
            _ = stop.cancelled() => Err(EngineError::cancelled()),
            result = self.transport.execute(request) => result.map_err(classify_transport_error),
        }
    }

    async fn back_off(
        &self,
        run: &mut RunState,
        failure: &EngineError,
        stop: &CancellationToken,
    ) -> Result<(), EngineError> {
        run.failures = run.failures.saturating_add(1);
        let delay = self.config.backoff.delay_for_failures(run.failures);
        error!(
            failures = run.failures,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "request failed; backing off"
        );

        run.machine.on_backoff()?;
        self.publish_state(run);

        tokio::select! {
            biased;
            _ = stop.cancelled() => return Err(EngineError::cancelled()),
            _ = tokio::time::sleep(delay) => {}
        }

        run.machine.on_backoff_elapsed(run.queue.is_registered())?;
        self.publish_state(run);
        Ok(())
    }

    fn signal_ready(&self, run: &mut RunState, initial_load: bool) {
        if run.ready_signalled {
            return;
        }
        run.ready_signalled = true;
        info!(initial_load, "event queue ready");
        self.sink.on_ready(initial_load);
    }

    fn publish_state(&self, run: &RunState) {
        self.session.set_engine_state(run.machine.state());
    }

    fn terminate(&self, run: RunState, err: EngineError) -> RunOutcome {
        match err.recovery() {
            Recovery::Stop => self.abort(run),
            _ => self.fail(run, err),
        }
    }

    fn abort(&self, mut run: RunState) -> RunOutcome {
        run.machine.on_abort();
        self.publish_state(&run);
        info!(queue_id = ?run.queue.queue_id(), "poll loop aborted");
        RunOutcome {
            queue: run.queue,
            exit: ExitReason::Aborted,
        }
    }

    fn fail(&self, mut run: RunState, err: EngineError) -> RunOutcome {
        run.machine.on_fatal();
        self.publish_state(&run);
        error!(code = %err.code, error = %err, "poll loop terminated");
        self.sink.on_fatal(&err);
        RunOutcome {
            queue: run.queue,
            exit: ExitReason::Fatal(err),
        }
    }
}
