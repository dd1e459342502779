mod config;
mod logging;
mod state;

use std::{error::Error, process::ExitCode, sync::Arc};

use config::TailConfig;
use eventq_core::{EngineEvent, EventChannels, ExitReason, Poller};
use eventq_http::ReqwestTransport;
use eventq_store::MemoryStore;
use state::TailState;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};

const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("starting eventq-tail");

    let config = match TailConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            eprintln!("eventq-tail: {err}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "eventq-tail failed");
            eprintln!("eventq-tail: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: TailConfig) -> Result<(), Box<dyn Error>> {
    let transport = Arc::new(ReqwestTransport::new(config.server.clone())?);
    let store = MemoryStore::new();
    let channels = EventChannels::new(EVENT_BUFFER);
    let mut events = channels.subscribe();
    let mut state = TailState::new(config.recent_limit);

    let poller = Poller::new(transport, Arc::new(store.clone()), config.engine);
    poller.start(Arc::new(channels.clone())).await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupt received; stopping");
                break;
            }
            received = events.recv() => match received {
                Ok(event) => {
                    let fatal = matches!(event, EngineEvent::FatalError { .. });
                    for line in state.handle_engine_event(event) {
                        println!("{line}");
                    }
                    if fatal {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => println!("{}", state.handle_lag(skipped)),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let outcome = poller.stop().await?;
    for line in state.snapshot().summary() {
        println!("{line}");
    }

    let session = poller.session().snapshot();
    info!(
        queue_id = ?session.queue_id,
        last_event_id = session.last_event_id,
        stored_streams = store.streams()?.len(),
        stored_people = store.people()?.len(),
        stored_messages = store.message_count()?,
        stored_range = ?store.range()?,
        "eventq-tail stopped"
    );

    match outcome.exit {
        ExitReason::Aborted => Ok(()),
        ExitReason::Fatal(err) => Err(err.into()),
    }
}
