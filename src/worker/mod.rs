//! The worker context: a dedicated thread that owns open files and their
//! window caches, reachable only through message channels.

pub mod dispatcher;
pub mod handles;
pub mod window;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::info;

use crate::client::WorkerClient;
use crate::constants::WORKER_THREAD_NAME;
use crate::error::{ProviderError, Result};
use crate::protocol::ChannelId;

pub use dispatcher::{Inbound, WorkerDispatcher};
pub use handles::FileHandleManager;
pub use window::{WindowConfig, WindowManager};

/// Handle to a running worker thread.
///
/// The thread exits once this handle and every client connected through it
/// have been dropped.
pub struct Worker {
    inbound: UnboundedSender<Inbound>,
    next_channel: Arc<AtomicU64>,
}

impl Worker {
    pub fn spawn() -> Result<Self> {
        Self::spawn_with(WindowConfig::default())
    }

    /// Spawns a worker whose files start out with `window_defaults`.
    pub fn spawn_with(window_defaults: WindowConfig) -> Result<Self> {
        let (inbound, rx) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run(rx, window_defaults))
            .map_err(|e| ProviderError::Transport(format!("cannot start worker thread: {e}")))?;
        Ok(Self {
            inbound,
            next_channel: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Opens a new channel to the worker and waits for its greeting.
    pub async fn connect(
        &self,
        request_timeout: Option<Duration>,
    ) -> Result<WorkerClient> {
        let channel = ChannelId(self.next_channel.fetch_add(1, Ordering::Relaxed));
        let (reply, replies) = mpsc::unbounded_channel();
        self.inbound
            .send(Inbound::Connect { channel, reply })
            .map_err(|_| ProviderError::Transport("worker has shut down".to_string()))?;
        WorkerClient::handshake(channel, self.inbound.clone(), replies, request_timeout).await
    }
}

fn run(
    mut rx: UnboundedReceiver<Inbound>,
    window_defaults: WindowConfig,
) {
    info!("worker started");
    let mut dispatcher = WorkerDispatcher::new(window_defaults);
    while let Some(inbound) = rx.blocking_recv() {
        dispatcher.handle_inbound(inbound);
    }
    dispatcher.shutdown();
    info!("worker stopped");
}
