//! Wire types for the tether object-bridge protocol.
//!
//! This crate contains the serde-serializable types exchanged between two
//! bridge peers. These types represent the "protocol layer" - the shapes of
//! data as they appear on the wire, after binary blobs have been converted
//! to base64 and live object references have been replaced by packed ids.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **1:1 with protocol**: Match the wire shapes exactly
//! - **Stable**: Changes only when the wire protocol changes
//!
//! The live half of the system (object registries, codecs, proxies) is built
//! on top of these types in `tether-runtime`.

pub mod data_map;
pub mod message;
pub mod packed;

pub use data_map::{DataMap, Tag};
pub use message::{
    CallRecord, ChangeRecord, CreateRecord, EventRecord, Message, ReturnRecord,
};
pub use packed::{PackedData, PackedError};

/// Identifier of an object within its originating peer.
///
/// Issued monotonically by a process-wide counter; never zero (zero is
/// reserved for the bridge root in event records).
pub type LocalId = u64;

/// Identifier correlating a call with its return, unique per bridge peer.
pub type CallId = u64;

/// Signed object id as it appears on the wire.
///
/// Positive means "an object owned by the sender" (the receiver stores it as
/// a proxy under that id); negative means "an object owned by the receiver"
/// (a proxy the sender holds, whose remote id is `-packed_id`).
pub type PackedId = i64;
