use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, trace, warn};

use super::handles::FileHandleManager;
use super::window::{WindowConfig, WindowManager};
use crate::error::{ProviderError, Result};
use crate::protocol::{ChannelId, Envelope, Message};
use crate::range;

/// Everything the worker thread can receive.
#[derive(Debug)]
pub enum Inbound {
    Connect {
        channel: ChannelId,
        reply: UnboundedSender<Envelope>,
    },
    Message {
        channel: ChannelId,
        envelope: Envelope,
    },
    Disconnect {
        channel: ChannelId,
    },
}

/// Routes requests to the file and window managers and answers each one
/// exactly once on the channel it came from.
pub struct WorkerDispatcher {
    handles: FileHandleManager,
    windows: WindowManager,
    channels: HashMap<ChannelId, UnboundedSender<Envelope>>,
}

impl Default for WorkerDispatcher {
    fn default() -> Self {
        Self::new(WindowConfig::default())
    }
}

impl WorkerDispatcher {
    pub fn new(window_defaults: WindowConfig) -> Self {
        Self {
            handles: FileHandleManager::new(),
            windows: WindowManager::with_defaults(window_defaults),
            channels: HashMap::new(),
        }
    }

    pub fn handle_inbound(
        &mut self,
        inbound: Inbound,
    ) {
        match inbound {
            Inbound::Connect { channel, reply } => {
                debug!("channel {:?} connected", channel);
                self.channels.insert(channel, reply);
                self.post(channel, Envelope::new(0, Message::Connected));
            }
            Inbound::Message { channel, envelope } => {
                if let Some(reply) = self.dispatch(envelope) {
                    self.post(channel, reply);
                }
            }
            Inbound::Disconnect { channel } => {
                if self.channels.remove(&channel).is_some() {
                    debug!("channel {:?} disconnected", channel);
                }
            }
        }
    }

    pub fn connected_channels(&self) -> usize {
        self.channels.len()
    }

    /// Handles one envelope and builds its reply. Responses echoed back at
    /// the worker produce no reply.
    pub fn dispatch(
        &mut self,
        envelope: Envelope,
    ) -> Option<Envelope> {
        let Envelope { id, message } = envelope;
        if message.is_response() {
            trace!("ignoring {} echoed to worker", message.tag());
            return None;
        }
        let tag = message.tag().to_string();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handle(message)));
        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => {
                debug!("{} #{} failed: {}", tag, id, error);
                Message::Error {
                    error,
                    original_message_id: id,
                }
            }
            Err(payload) => {
                let error = ProviderError::Internal(panic_message(payload.as_ref()));
                warn!("{} #{} panicked: {}", tag, id, error);
                Message::Error {
                    error,
                    original_message_id: id,
                }
            }
        };
        Some(Envelope::new(id, reply))
    }

    fn handle(
        &mut self,
        message: Message,
    ) -> Result<Message> {
        match message {
            Message::OpenFile { file_id, handle } => {
                self.windows.clear_cache(&file_id);
                self.handles.open_file(file_id.clone(), handle)?;
                Ok(Message::Ack { file_id })
            }
            Message::ReadByteRange {
                file_id,
                start,
                end,
            } => {
                let size = self.handles.file_size(&file_id)?;
                let range = range::clamp(start, end, size);
                let handles = &self.handles;
                let data = self
                    .windows
                    .get_window(&file_id, range.start, range.end, |s, e| {
                        handles.read_byte_range(&file_id, s, e)
                    })?;
                Ok(Message::ByteRangeResponse {
                    file_id,
                    start: range.start,
                    end: range.end,
                    data,
                })
            }
            Message::GetFileSize { file_id } => {
                let size = self.handles.file_size(&file_id)?;
                Ok(Message::FileSizeResponse { file_id, size })
            }
            Message::CloseFile { file_id } => {
                self.handles.close_file(&file_id);
                self.windows.clear_cache(&file_id);
                Ok(Message::Ack { file_id })
            }
            Message::SetWindowSize {
                file_id,
                window_size,
            } => {
                if !self.handles.has_file(&file_id) {
                    return Err(ProviderError::NotOpen(file_id));
                }
                self.windows.set_window_size(&file_id, window_size)?;
                Ok(Message::Ack { file_id })
            }
            Message::SearchBytes { .. } => Err(ProviderError::UnimplementedOperation(
                "SEARCH_BYTES".to_string(),
            )),
            Message::Unknown { tag } => Err(ProviderError::UnknownMessageType(tag)),
            response @ (Message::Connected
            | Message::ByteRangeResponse { .. }
            | Message::FileSizeResponse { .. }
            | Message::Ack { .. }
            | Message::Error { .. }) => Err(ProviderError::UnknownMessageType(
                response.tag().to_string(),
            )),
        }
    }

    fn post(
        &mut self,
        channel: ChannelId,
        envelope: Envelope,
    ) {
        let Some(reply) = self.channels.get(&channel) else {
            debug!("dropping reply #{} for unknown channel {:?}", envelope.id, channel);
            return;
        };
        if reply.send(envelope).is_err() {
            debug!("channel {:?} closed, removing", channel);
            self.channels.remove(&channel);
        }
    }

    /// Releases every open file and cached window.
    pub fn shutdown(&mut self) {
        info!(
            "worker shutting down with {} connected channel(s)",
            self.connected_channels()
        );
        self.channels.clear();
        self.handles.close_all();
        self.windows.clear_all_caches();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
