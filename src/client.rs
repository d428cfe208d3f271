//! Host-side RPC client for a worker channel.
//!
//! Every request gets a fresh correlation id and a oneshot resolver in the
//! pending table. A background task routes replies by id, so replies may
//! arrive in any order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{ProviderError, Result};
use crate::protocol::{ChannelId, Envelope, FileId, Message, MessageId};
use crate::resource::FileResource;
use crate::worker::Inbound;

type PendingMap = Arc<Mutex<HashMap<MessageId, oneshot::Sender<Message>>>>;

/// Counters of requests posted by a client.
#[derive(Debug, Default)]
pub struct ClientStats {
    requests: AtomicU64,
    byte_range_requests: AtomicU64,
    timeouts: AtomicU64,
}

impl ClientStats {
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// `READ_BYTE_RANGE` messages actually put on the channel.
    pub fn byte_range_requests(&self) -> u64 {
        self.byte_range_requests.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    fn record(
        &self,
        message: &Message,
    ) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if matches!(message, Message::ReadByteRange { .. }) {
            self.byte_range_requests.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Async client of one worker channel. Clone-able; clones share the channel.
#[derive(Clone)]
pub struct WorkerClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    channel: ChannelId,
    outbound: UnboundedSender<Inbound>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Option<Duration>,
    stats: ClientStats,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let _ = self.outbound.send(Inbound::Disconnect {
            channel: self.channel,
        });
    }
}

impl WorkerClient {
    /// Waits for the worker's `CONNECTED` greeting on `replies`, then starts
    /// routing replies.
    pub(crate) async fn handshake(
        channel: ChannelId,
        outbound: UnboundedSender<Inbound>,
        mut replies: UnboundedReceiver<Envelope>,
        request_timeout: Option<Duration>,
    ) -> Result<Self> {
        if let Err(e) = await_greeting(&mut replies, request_timeout).await {
            // the worker registered the channel when it received Connect
            let _ = outbound.send(Inbound::Disconnect { channel });
            return Err(e);
        }
        debug!("channel {:?} established", channel);

        let pending: PendingMap = Arc::default();
        tokio::spawn(route_replies(replies, Arc::clone(&pending)));
        Ok(Self {
            inner: Arc::new(ClientInner {
                channel,
                outbound,
                pending,
                next_id: AtomicU64::new(1),
                request_timeout,
                stats: ClientStats::default(),
            }),
        })
    }

    /// Posts `message` and waits for its reply. An `ERROR` reply becomes `Err`.
    pub async fn send_request(
        &self,
        message: Message,
    ) -> Result<Message> {
        let inner = &self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let tag = message.tag().to_string();
        inner.stats.record(&message);

        let (tx, rx) = oneshot::channel();
        lock(&inner.pending).insert(id, tx);
        let sent = inner.outbound.send(Inbound::Message {
            channel: inner.channel,
            envelope: Envelope::new(id, message),
        });
        if sent.is_err() {
            lock(&inner.pending).remove(&id);
            return Err(ProviderError::Transport("worker has shut down".to_string()));
        }
        trace!("sent {} #{}", tag, id);

        let reply = match inner.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    lock(&inner.pending).remove(&id);
                    inner.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    return Err(ProviderError::Timeout { id, after: limit });
                }
            },
            None => rx.await,
        };
        match reply {
            Ok(Message::Error { error, .. }) => Err(error),
            Ok(message) => Ok(message),
            Err(_) => Err(ProviderError::Transport(format!(
                "worker channel closed before {tag} #{id} was answered"
            ))),
        }
    }

    pub async fn open_file(
        &self,
        file_id: &FileId,
        handle: Arc<dyn FileResource>,
    ) -> Result<()> {
        let request = Message::OpenFile {
            file_id: file_id.clone(),
            handle,
        };
        match self.send_request(request).await? {
            Message::Ack { .. } => Ok(()),
            other => Err(unexpected("OPEN_FILE", &other)),
        }
    }

    pub async fn read_byte_range(
        &self,
        file_id: &FileId,
        start: u64,
        end: u64,
    ) -> Result<Bytes> {
        let request = Message::ReadByteRange {
            file_id: file_id.clone(),
            start,
            end,
        };
        match self.send_request(request).await? {
            Message::ByteRangeResponse { data, .. } => Ok(data),
            other => Err(unexpected("READ_BYTE_RANGE", &other)),
        }
    }

    pub async fn file_size(
        &self,
        file_id: &FileId,
    ) -> Result<u64> {
        let request = Message::GetFileSize {
            file_id: file_id.clone(),
        };
        match self.send_request(request).await? {
            Message::FileSizeResponse { size, .. } => Ok(size),
            other => Err(unexpected("GET_FILE_SIZE", &other)),
        }
    }

    pub async fn close_file(
        &self,
        file_id: &FileId,
    ) -> Result<()> {
        let request = Message::CloseFile {
            file_id: file_id.clone(),
        };
        match self.send_request(request).await? {
            Message::Ack { .. } => Ok(()),
            other => Err(unexpected("CLOSE_FILE", &other)),
        }
    }

    pub async fn set_window_size(
        &self,
        file_id: &FileId,
        window_size: u64,
    ) -> Result<()> {
        let request = Message::SetWindowSize {
            file_id: file_id.clone(),
            window_size,
        };
        match self.send_request(request).await? {
            Message::Ack { .. } => Ok(()),
            other => Err(unexpected("SET_WINDOW_SIZE", &other)),
        }
    }

    pub fn stats(&self) -> &ClientStats {
        &self.inner.stats
    }

    /// Requests still waiting for a reply.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.pending).len()
    }
}

async fn await_greeting(
    replies: &mut UnboundedReceiver<Envelope>,
    request_timeout: Option<Duration>,
) -> Result<()> {
    let greeting = match request_timeout {
        Some(limit) => tokio::time::timeout(limit, replies.recv())
            .await
            .map_err(|_| ProviderError::Timeout { id: 0, after: limit })?,
        None => replies.recv().await,
    };
    match greeting.map(|e| e.message) {
        Some(Message::Connected) => Ok(()),
        Some(other) => Err(ProviderError::Transport(format!(
            "expected CONNECTED, got {}",
            other.tag()
        ))),
        None => Err(ProviderError::Transport(
            "worker closed the channel during connect".to_string(),
        )),
    }
}

async fn route_replies(
    mut replies: UnboundedReceiver<Envelope>,
    pending: PendingMap,
) {
    while let Some(Envelope { id, message }) = replies.recv().await {
        let key = message.correlation_id(id);
        let waiter = lock(&pending).remove(&key);
        match waiter {
            Some(tx) => {
                if tx.send(message).is_err() {
                    debug!("requester for #{} went away", key);
                }
            }
            None => warn!("dropping {} for unknown or expired request #{}", message.tag(), key),
        }
    }
    // Dropping the resolvers fails every remaining request.
    let abandoned = std::mem::take(&mut *lock(&pending));
    if !abandoned.is_empty() {
        warn!(
            "worker channel closed with {} request(s) in flight",
            abandoned.len()
        );
    }
}

fn unexpected(
    request: &str,
    reply: &Message,
) -> ProviderError {
    ProviderError::Transport(format!("unexpected {} reply to {}", reply.tag(), request))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
