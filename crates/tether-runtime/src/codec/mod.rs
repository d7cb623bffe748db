//! Depth-first pack/unpack of values and object snapshots.

pub mod data;
pub mod object;

pub use data::{pack_data, pack_throw, unpack_data};
pub use object::{diff_object, make_proxy, pack_object, update_object_props, CacheSlot, ValueCache};
