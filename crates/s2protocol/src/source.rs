//! The interface to the replay container.
//!
//! The outer archive format is a separate concern; this crate only needs
//! byte blobs addressed by the logical file names below, plus the
//! container's user-data blob for the header.

use std::sync::Arc;

use crate::error::DecodeError;
use crate::protocol::{decode_header, Protocol};
use crate::registry;

/// Game details substream (versioned).
pub const DETAILS_FILE: &str = "replay.details";
/// Lobby init data substream (bit-packed).
pub const INIT_DATA_FILE: &str = "replay.initData";
/// Attribute events substream (little-endian, not schema-driven).
pub const ATTRIBUTES_EVENTS_FILE: &str = "replay.attributes.events";
/// Game events substream (bit-packed).
pub const GAME_EVENTS_FILE: &str = "replay.game.events";
/// Message events substream (bit-packed).
pub const MESSAGE_EVENTS_FILE: &str = "replay.message.events";
/// Tracker events substream (versioned); absent in old replays.
pub const TRACKER_EVENTS_FILE: &str = "replay.tracker.events";

/// A provider of raw replay blobs, typically backed by an archive parser.
pub trait ReplaySource {
    /// The container's user-data blob, which carries the replay header.
    fn user_data(&self) -> &[u8];

    /// Raw bytes of the named substream, or `None` when the container
    /// does not have it.
    fn file(&self, name: &str) -> Option<&[u8]>;
}

/// Decodes the header of the given container and returns the protocol
/// matching the replay's base build.
pub fn protocol_for(source: &dyn ReplaySource) -> Result<Arc<Protocol>, DecodeError> {
    let header = decode_header(source.user_data())?;
    let base_build = header.int(&["version", "baseBuild"]) as u32;
    registry::protocol(base_build).ok_or(DecodeError::UnknownBuild(base_build))
}
