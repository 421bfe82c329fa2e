use std::sync::{Arc, LazyLock};

use serde::Deserialize;
use tokio::sync::broadcast;
use volley_common::{Signal, internal, logging, tracing};
use volley_dispatch::{DispatchProcessor, ProcessorConfig, Registry, SinkTransport, Transport};
use volley_queue::{FileQueueStore, MemoryQueueStore, QueueConfig, QueueStore};

/// Top-level service definition, deserialized from the RON config file
#[derive(Default, Deserialize)]
pub struct Volley {
    #[serde(default)]
    queue: QueueConfig,

    #[serde(default)]
    dispatch: ProcessorConfig,

    #[serde(alias = "relay", default)]
    relays: Vec<volley_common::relay::RelayConfig>,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Volley {
    /// Run the dispatcher, and everything it controls
    ///
    /// # Errors
    ///
    /// This function will return an error if the queue store cannot be
    /// opened or the shutdown signal handler cannot be installed.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let store: Arc<dyn QueueStore> = match &self.queue {
            QueueConfig::Memory => Arc::new(MemoryQueueStore::new()),
            QueueConfig::File { path } => Arc::new(FileQueueStore::open(path).await?),
        };

        let registry = Arc::new(Registry::new());
        for relay in self.relays {
            internal!("Registering relay {} ({})", relay.name, relay.id);
            registry.register_relay(relay);
        }

        let transport: Arc<dyn Transport> = Arc::new(SinkTransport::new());
        let processor = DispatchProcessor::new(self.dispatch, registry, store, transport);

        internal!("Controller running");

        tokio::select! {
            () = processor.serve(SHUTDOWN_BROADCAST.subscribe()) => {}
            r = shutdown() => {
                r?;
            }
        }

        internal!("Shutting down...");

        Ok(())
    }
}
