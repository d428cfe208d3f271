//! Tagged envelope shared by both sides of the worker boundary.
//!
//! Every request posted by a client is answered by exactly one message
//! carrying the same [`MessageId`]: either the matching response variant or
//! [`Message::Error`] with `original_message_id` set to the request id.
//! Byte payloads are [`Bytes`] and move through the channel, so a sender
//! never keeps a usable copy of what it posted.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::ProviderError;
use crate::resource::FileResource;

/// Correlation id, unique among the outstanding requests of one client.
pub type MessageId = u64;

/// Identifies a connected host channel on a multiplexed worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

/// Name under which a file is opened on the worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Self {
        FileId(id.into())
    }
}

impl fmt::Display for FileId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(id: &str) -> Self {
        FileId(id.to_string())
    }
}

impl From<String> for FileId {
    fn from(id: String) -> Self {
        FileId(id)
    }
}

#[derive(Debug)]
pub struct Envelope {
    pub id: MessageId,
    pub message: Message,
}

impl Envelope {
    pub fn new(
        id: MessageId,
        message: Message,
    ) -> Self {
        Self { id, message }
    }
}

#[derive(Debug)]
pub enum Message {
    // Requests (host -> worker)
    OpenFile {
        file_id: FileId,
        handle: Arc<dyn FileResource>,
    },
    ReadByteRange {
        file_id: FileId,
        start: u64,
        end: u64,
    },
    GetFileSize {
        file_id: FileId,
    },
    CloseFile {
        file_id: FileId,
    },
    SetWindowSize {
        file_id: FileId,
        window_size: u64,
    },
    /// Declared by the protocol but not served by this worker.
    SearchBytes {
        file_id: FileId,
        pattern: Bytes,
    },

    // Responses (worker -> host)
    Connected,
    ByteRangeResponse {
        file_id: FileId,
        start: u64,
        end: u64,
        data: Bytes,
    },
    FileSizeResponse {
        file_id: FileId,
        size: u64,
    },
    Ack {
        file_id: FileId,
    },
    Error {
        error: ProviderError,
        original_message_id: MessageId,
    },

    /// A message whose type tag this build does not recognize.
    Unknown {
        tag: String,
    },
}

impl Message {
    /// Wire tag of the message, as it appears in logs.
    pub fn tag(&self) -> &str {
        match self {
            Message::OpenFile { .. } => "OPEN_FILE",
            Message::ReadByteRange { .. } => "READ_BYTE_RANGE",
            Message::GetFileSize { .. } => "GET_FILE_SIZE",
            Message::CloseFile { .. } => "CLOSE_FILE",
            Message::SetWindowSize { .. } => "SET_WINDOW_SIZE",
            Message::SearchBytes { .. } => "SEARCH_BYTES",
            Message::Connected => "CONNECTED",
            Message::ByteRangeResponse { .. } => "BYTE_RANGE_RESPONSE",
            Message::FileSizeResponse { .. } => "FILE_SIZE_RESPONSE",
            Message::Ack { .. } => "ACK",
            Message::Error { .. } => "ERROR",
            Message::Unknown { tag } => tag,
        }
    }

    /// True for variants only the worker emits.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Message::Connected
                | Message::ByteRangeResponse { .. }
                | Message::FileSizeResponse { .. }
                | Message::Ack { .. }
                | Message::Error { .. }
        )
    }

    /// The id a reply to `envelope_id` should be routed by.
    pub fn correlation_id(
        &self,
        envelope_id: MessageId,
    ) -> MessageId {
        match self {
            Message::Error {
                original_message_id,
                ..
            } => *original_message_id,
            _ => envelope_id,
        }
    }
}
