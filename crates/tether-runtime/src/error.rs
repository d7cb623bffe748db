//! Error types for the tether runtime.

use thiserror::Error;

use tether_protocol::{CallId, LocalId, PackedId};

use crate::data::{ErrorBase, ErrorData};

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while packing, unpacking or routing bridge traffic.
#[derive(Debug, Error)]
pub enum Error {
    /// The codec met a value no envelope tag can carry.
    #[error("Unsupported value at {path}")]
    Unsupported { path: String },

    /// An `'o'` envelope referenced an object that was closed before packing.
    #[error("Closed bridge object at {path}")]
    ClosedObject { path: String },

    /// An `'o'` envelope carried an id this peer cannot resolve.
    #[error("Invalid packedId {id} at {path}")]
    InvalidPackedId { id: PackedId, path: String },

    /// An `'s'` envelope named a share id missing from the shared table.
    #[error("Invalid shareId '{0}'")]
    InvalidShareId(String),

    /// `share_data` saw the same name registered with a different value.
    #[error("Duplicate shareId '{0}'")]
    DuplicateShareId(String),

    /// An incoming call targeted a name that is not a method.
    #[error("'{0}' is not a function")]
    NoSuchMethod(String),

    /// A method stub was invoked after its proxy closed, or the remote
    /// target was already gone.
    #[error("Cannot call method '{method}' of closed proxy")]
    ClosedProxy { method: String },

    /// A return referenced a call this peer never issued (or has dropped).
    #[error("Invalid callId {0}")]
    InvalidCallId(CallId),

    /// A change record referenced an object this peer has no proxy for.
    #[error("Invalid localId {0}")]
    InvalidLocalId(LocalId),

    /// An envelope's raw tree did not match its map.
    #[error("Expected {expected} at {path}")]
    Mismatch {
        expected: &'static str,
        path: String,
    },

    /// A rejection produced by the other peer.
    #[error("{0}")]
    Remote(ErrorData),

    /// The bridge was closed; no further traffic flows.
    #[error("Bridge closed")]
    BridgeClosed,

    /// The peer disappeared while a call was outstanding.
    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The wire error class this kind packs as when it must cross the
    /// bridge (TypeError-like, RangeError-like, or generic).
    pub fn base(&self) -> Option<ErrorBase> {
        match self {
            Error::Unsupported { .. }
            | Error::ClosedObject { .. }
            | Error::NoSuchMethod(_)
            | Error::ClosedProxy { .. }
            | Error::Mismatch { .. } => Some(ErrorBase::Type),
            Error::InvalidPackedId { .. }
            | Error::InvalidShareId(_)
            | Error::InvalidCallId(_)
            | Error::InvalidLocalId(_) => Some(ErrorBase::Range),
            Error::Remote(data) => data.base,
            _ => None,
        }
    }

    /// Returns the remote payload if this is a remote rejection.
    pub fn remote_data(&self) -> Option<&ErrorData> {
        match self {
            Error::Remote(data) => Some(data),
            _ => None,
        }
    }
}
