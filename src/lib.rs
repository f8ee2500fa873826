//! Serialize structured data described by declarative layouts.
//!
//! # Overview
//!
//! A binary codec in which the byte-level shape of a message is a *layout
//! value*: a plain data structure built from numeric, bytes, array, and
//! switch items. From one layout the crate mechanically derives three
//! services, with no code generation step:
//!
//! - a serializer ([encode]): value → bytes
//! - a deserializer ([decode]): bytes → value
//! - a discriminator ([Discriminator]): bytes → index of the matching
//!   layout in a fixed set
//!
//! Layouts are immutable once constructed and may be shared freely across
//! threads; the only mutable state of a call is the caller's byte buffer.
//!
//! # Example
//!
//! ```
//! use binlayout::{decode, encode, Item, Layout, Value};
//! use bytes::Bytes;
//!
//! // A 2-byte big-endian port after a fixed header.
//! let layout = Layout::structure([
//!     ("header", Item::bytes(2).constant_bytes(vec![0u8, 42]).omit()),
//!     ("port", Item::uint(2)),
//! ]);
//!
//! let data = Value::structure([("port", Value::U64(80))]);
//! let wire = encode(&layout, &data).unwrap();
//! assert_eq!(wire.as_ref(), &[0, 42, 0, 80]);
//!
//! let decoded = decode(&layout, wire).unwrap();
//! assert_eq!(decoded, data);
//! ```

pub mod decode;
pub mod discriminator;
pub mod encode;
pub mod endianness;
pub mod error;
pub mod layout;
mod num;
pub mod partition;
pub mod size;
pub mod util;
pub mod value;

// Re-export the public surface.
pub use decode::{decode, decode_prefix};
pub use discriminator::Discriminator;
pub use encode::{encode, encode_into};
pub use endianness::with_endianness;
pub use error::Error;
pub use layout::{
    named, ArrayItem, BytesCustom, BytesItem, Conversion, Endianness, Item, Layout, NamedItem,
    NumCustom, NumItem, SwitchId, SwitchItem,
};
pub use partition::{add_fixed_values, dynamic_items, fixed_items};
pub use size::{encode_size, static_size};
pub use value::Value;
