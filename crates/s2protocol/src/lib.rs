//! Decoding of SC2 replay substreams.
//!
//! A replay is a container of independently encoded substreams: a header,
//! game details, lobby init data, attribute events and three event
//! streams. Each substream is interpreted against a build-specific schema
//! (a numbered table of type descriptors) and decodes into a tree of
//! dynamically-typed [`Value`]s.
//!
//! Two wire formats share that schema:
//!
//! - **bit-packed**: dense, no per-value framing; used for init data and
//!   the game/message event streams;
//! - **versioned**: self-describing, every value preceded by a one-byte
//!   field-type tag so unknown struct fields can be skipped; used for the
//!   header, details and tracker events.
//!
//! Schemas for known base builds are embedded; [`protocol`] resolves a
//! build number to its (cached, shared) [`Protocol`].
//!
//! # Quick start
//!
//! ```no_run
//! let header_blob: Vec<u8> = unimplemented!("user data from the container");
//! let details_blob: Vec<u8> = unimplemented!("replay.details from the container");
//!
//! let header = s2protocol::decode_header(&header_blob).unwrap();
//! let base_build = header.int(&["version", "baseBuild"]) as u32;
//!
//! let protocol = s2protocol::protocol(base_build).expect("unsupported build");
//! let details = protocol.decode_details(&details_blob).unwrap();
//! println!("map: {}", details.text(&["title"]));
//! ```

mod bitpacked;
mod builds;
mod decoder;
mod error;
mod protocol;
mod registry;
mod schema;
mod source;
mod types;
mod value;
mod versioned;

pub use error::DecodeError;
pub use protocol::{decode_header, Event, EvtType, Protocol};
pub use registry::{default_protocol, known_base_builds, protocol};
pub use schema::SchemaError;
pub use source::{
    protocol_for, ReplaySource, ATTRIBUTES_EVENTS_FILE, DETAILS_FILE, GAME_EVENTS_FILE,
    INIT_DATA_FILE, MESSAGE_EVENTS_FILE, TRACKER_EVENTS_FILE,
};
pub use value::{BitArray, Struct, Value};
