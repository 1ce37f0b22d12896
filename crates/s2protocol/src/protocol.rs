//! The per-build protocol: type table, event tables and decode entry
//! points for every replay substream.

use s2protocol_buffers::{BitBuffer, BufferError, ByteOrder};

use crate::bitpacked::BitPackedDecoder;
use crate::decoder::Decoder;
use crate::error::DecodeError;
use crate::registry;
use crate::schema::{self, SchemaError};
use crate::types::TypeInfo;
use crate::value::{Struct, Value};
use crate::versioned::VersionedDecoder;

/// Attribute events carry a `source` byte from this base build on.
const ATTR_SOURCE_BASE_BUILD: u32 = 17326;

/// A named event data structure type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvtType {
    /// Event id, the index into the protocol's event table.
    pub id: i64,
    /// Event name with the schema's namespace prefix and kind suffix
    /// stripped, e.g. `UnitBorn`.
    pub name: String,
    /// Type id of the event's data structure.
    pub typeid: usize,
}

/// A decoded event from one of the three event streams.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// The decoded event body plus the framing annotations `id`, `name`,
    /// `loop` and (for game and message events) `userid`.
    pub fields: Struct,
}

impl Event {
    pub fn id(&self) -> i64 {
        self.fields.int(&["id"])
    }

    pub fn name(&self) -> &str {
        self.fields.text(&["name"])
    }

    /// The cumulative gameloop (time) position of the event.
    pub fn gameloop(&self) -> i64 {
        self.fields.int(&["loop"])
    }

    /// The id of the user that issued the event.
    pub fn user_id(&self) -> i64 {
        self.fields.int(&["userid", "userId"])
    }
}

/// Decoding rules for one base build: the type-descriptor table, the
/// event tables and the well-known root type ids.
///
/// Immutable once parsed; the registry shares one instance per base
/// build across all decodes.
#[derive(Debug, Clone)]
pub struct Protocol {
    pub(crate) base_build: u32,
    pub(crate) has_tracker_events: bool,
    pub(crate) type_infos: Vec<TypeInfo>,
    pub(crate) game_evt_types: Vec<Option<EvtType>>,
    pub(crate) game_eventid_typeid: usize,
    pub(crate) message_evt_types: Vec<Option<EvtType>>,
    pub(crate) message_eventid_typeid: usize,
    pub(crate) tracker_evt_types: Vec<Option<EvtType>>,
    pub(crate) tracker_eventid_typeid: usize,
    pub(crate) svaruint32_typeid: usize,
    pub(crate) replay_userid_typeid: usize,
    pub(crate) replay_header_typeid: usize,
    pub(crate) game_details_typeid: usize,
    pub(crate) replay_initdata_typeid: usize,
}

impl Protocol {
    /// Parses a protocol from a schema dump.
    pub fn parse(src: &str, base_build: u32) -> Result<Protocol, SchemaError> {
        schema::parse(src, base_build)
    }

    pub fn base_build(&self) -> u32 {
        self.base_build
    }

    /// Whether replays of this build carry a tracker event stream.
    pub fn has_tracker_events(&self) -> bool {
        self.has_tracker_events
    }

    pub(crate) fn with_base_build(&self, base_build: u32) -> Protocol {
        let mut p = self.clone();
        p.base_build = base_build;
        p
    }

    /// Decodes the game details (versioned).
    pub fn decode_details(&self, contents: &[u8]) -> Result<Struct, DecodeError> {
        let mut d = VersionedDecoder::new(contents, &self.type_infos);
        into_struct(d.instance(self.game_details_typeid)?)
    }

    /// Decodes the lobby init data (bit-packed).
    pub fn decode_init_data(&self, contents: &[u8]) -> Result<Struct, DecodeError> {
        let mut d = BitPackedDecoder::new(contents, &self.type_infos);
        into_struct(d.instance(self.replay_initdata_typeid)?)
    }

    /// Decodes the attribute events.
    ///
    /// This substream is not schema-driven and is the only little-endian
    /// one. Attributes are grouped as
    /// `scopes[attrscope][attrid] = {namespace, attrid, value}`.
    pub fn decode_attributes_events(&self, contents: &[u8]) -> Result<Struct, DecodeError> {
        let mut s = Struct::new();
        if contents.is_empty() {
            return Ok(s);
        }

        let mut buf = BitBuffer::new(contents, ByteOrder::Little);

        // The source field only exists from 1.2 onward.
        if self.base_build >= ATTR_SOURCE_BASE_BUILD {
            s.set("source", Value::Int(buf.read_bits(8)?));
        }
        s.set("mapNamespace", Value::Int(buf.read_bits(32)?));

        buf.read_bits(32)?; // attribute count; the loop runs to EOF instead

        let mut scopes = Struct::new();
        while !buf.eof() {
            let mut attr = Struct::with_capacity(3);
            attr.set("namespace", Value::Int(buf.read_bits(32)?));
            let attrid = buf.read_bits(32)?;
            attr.set("attrid", Value::Int(attrid));
            let attrscope = buf.read_bits(8)?;

            // The value arrives reversed; drop leading zero bytes after
            // turning it around.
            let mut value: Vec<u8> = buf.read_aligned(4)?.iter().rev().copied().collect();
            let zeros = value.iter().take_while(|&&b| b == 0).count();
            value.drain(..zeros);
            attr.set("value", Value::Str(String::from_utf8_lossy(&value).into_owned()));

            let scope_key = attrscope.to_string();
            if scopes.get(&scope_key).is_none() {
                scopes.set(scope_key.clone(), Value::Struct(Struct::new()));
            }
            if let Some(Value::Struct(scope)) = scopes.get_mut(&scope_key) {
                scope.set(attrid.to_string(), Value::Struct(attr));
            }
        }
        s.set("scopes", Value::Struct(scopes));

        Ok(s)
    }

    /// Decodes the game events (bit-packed).
    ///
    /// On a decoding error the events decoded so far are still returned,
    /// together with the error.
    pub fn decode_game_events(&self, contents: &[u8]) -> (Vec<Event>, Option<DecodeError>) {
        let mut d = BitPackedDecoder::new(contents, &self.type_infos);
        self.decode_events(&mut d, self.game_eventid_typeid, &self.game_evt_types, true)
    }

    /// Decodes the message events (bit-packed).
    ///
    /// On a decoding error the events decoded so far are still returned,
    /// together with the error.
    pub fn decode_message_events(&self, contents: &[u8]) -> (Vec<Event>, Option<DecodeError>) {
        let mut d = BitPackedDecoder::new(contents, &self.type_infos);
        self.decode_events(
            &mut d,
            self.message_eventid_typeid,
            &self.message_evt_types,
            true,
        )
    }

    /// Decodes the tracker events (versioned; no per-event user id).
    ///
    /// On a decoding error the events decoded so far are still returned,
    /// together with the error.
    pub fn decode_tracker_events(&self, contents: &[u8]) -> (Vec<Event>, Option<DecodeError>) {
        let mut d = VersionedDecoder::new(contents, &self.type_infos);
        self.decode_events(
            &mut d,
            self.tracker_eventid_typeid,
            &self.tracker_evt_types,
            false,
        )
    }

    /// Decodes a series of events with the shared framing: gameloop delta,
    /// optional user id, event id, event body, then byte alignment.
    fn decode_events(
        &self,
        d: &mut dyn Decoder,
        eventid_typeid: usize,
        evt_types: &[Option<EvtType>],
        decode_user_id: bool,
    ) -> (Vec<Event>, Option<DecodeError>) {
        let mut events = Vec::with_capacity(256);
        let mut gameloop: i64 = 0;

        while !d.eof() {
            match self.decode_event(d, eventid_typeid, evt_types, decode_user_id, &mut gameloop) {
                Ok(event) => {
                    events.push(event);
                    // The next event is byte-aligned.
                    d.byte_align();
                }
                Err(err) => {
                    tracing::debug!(
                        error = %err,
                        decoded = events.len(),
                        "event stream decode failed"
                    );
                    return (events, Some(err));
                }
            }
        }

        (events, None)
    }

    fn decode_event(
        &self,
        d: &mut dyn Decoder,
        eventid_typeid: usize,
        evt_types: &[Option<EvtType>],
        decode_user_id: bool,
        gameloop: &mut i64,
    ) -> Result<Event, DecodeError> {
        // The delta is a one-field choice; its sole entry is the delta.
        let delta = d.instance(self.svaruint32_typeid)?;
        let delta = delta.as_struct().ok_or(DecodeError::UnexpectedValue {
            expected: "a gameloop delta struct",
        })?;
        for (_, v) in delta.iter() {
            *gameloop += v.as_int().ok_or(DecodeError::UnexpectedValue {
                expected: "an integer gameloop delta",
            })?;
        }

        let userid = if decode_user_id {
            Some(d.instance(self.replay_userid_typeid)?)
        } else {
            None
        };

        let event_id = d
            .instance(eventid_typeid)?
            .as_int()
            .ok_or(DecodeError::UnexpectedValue {
                expected: "an integer event id",
            })?;
        let evt_type = usize::try_from(event_id)
            .ok()
            .and_then(|id| evt_types.get(id))
            .and_then(Option::as_ref)
            .ok_or(DecodeError::UnknownEventId(event_id))?;

        let body = d.instance(evt_type.typeid)?;
        let Value::Struct(mut fields) = body else {
            return Err(DecodeError::UnexpectedValue {
                expected: "a struct event body",
            });
        };

        // Duplicate the framing data into the struct so a rendered event
        // is self-contained.
        fields.set("id", Value::Int(evt_type.id));
        fields.set("name", Value::Str(evt_type.name.clone()));
        fields.set("loop", Value::Int(*gameloop));
        if let Some(userid) = userid {
            fields.set("userid", userid);
        }

        Ok(Event { fields })
    }
}

/// Decodes the replay header blob from the container's user data, using
/// the default (latest known) protocol.
pub fn decode_header(contents: &[u8]) -> Result<Struct, DecodeError> {
    let p = registry::default_protocol().ok_or(DecodeError::NoDefaultProtocol)?;

    // The first 4 bytes belong to the container's user-data framing.
    let contents = contents.get(4..).ok_or(BufferError::EndOfBuffer)?;

    let mut d = VersionedDecoder::new(contents, &p.type_infos);
    into_struct(d.instance(p.replay_header_typeid)?)
}

fn into_struct(value: Value) -> Result<Struct, DecodeError> {
    match value {
        Value::Struct(s) => Ok(s),
        _ => Err(DecodeError::UnexpectedValue {
            expected: "a struct root value",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal schema exercising the whole loader surface: the usual
    /// first typeids (uint variants, the gameloop delta choice, the user
    /// id struct) plus one game event, one message event and one tracker
    /// event.
    pub(crate) const TEST_SCHEMA: &str = "\
typeinfos = [
    ('_int',[(0,7)]),  #0
    ('_int',[(0,4)]),  #1
    ('_int',[(0,5)]),  #2
    ('_int',[(0,6)]),  #3
    ('_int',[(0,14)]),  #4
    ('_int',[(0,22)]),  #5
    ('_int',[(0,32)]),  #6
    ('_choice',[(0,2),{0:('m_uint6',3),1:('m_uint14',4),2:('m_uint22',5),3:('m_uint32',6)}]),  #7
    ('_struct',[[('m_userId',2,-1)]]),  #8
    ('_blob',[(0,8)]),  #9
    ('_int',[(0,8)]),  #10
    ('_struct',[[('m_flags',10,0)]]),  #11
    ('_bool',[]),  #12
    ('_struct',[[('m_progress',6,-1)]]),  #13
    ('_struct',[[('m_recipient',1,-2),('m_string',9,-1)]]),  #14
    ('_struct',[[('m_playerId',2,0),('m_upkeepPlayerId',2,1)]]),  #15
    ('_struct',[[('m_version',10,0),('m_elapsedGameLoops',6,1)]]),  #16
    ('_struct',[[('m_title',9,0),('m_isBlizzardMap',12,1)]]),  #17
    ('_struct',[[('m_lobby',11,-1)]]),  #18
]

game_event_types = {
    5: (11, 'NNet.Game.SUserFinishedLoadingSyncEvent'),
}

game_eventid_typeid = 0

message_event_types = {
    0: (14, 'NNet.Game.SChatMessage'),
    2: (13, 'NNet.Game.SLoadingProgressMessage'),
}

message_eventid_typeid = 1

tracker_event_types = {
    1: (15, 'NNet.Replay.Tracker.SPlayerSetupEvent'),
}

tracker_eventid_typeid = 2

svaruint32_typeid = 7

replay_userid_typeid = 8

replay_header_typeid = 16

game_details_typeid = 17

replay_initdata_typeid = 18
";

    pub(crate) fn test_protocol() -> Protocol {
        Protocol::parse(TEST_SCHEMA, 80949).unwrap()
    }

    #[test]
    fn schema_loads_event_tables_and_typeids() {
        let p = test_protocol();
        assert_eq!(p.base_build(), 80949);
        assert!(p.has_tracker_events());

        // Dense table: ids 0..4 empty, id 5 present, names stripped.
        assert_eq!(p.game_evt_types.len(), 6);
        assert!(p.game_evt_types[0].is_none());
        let loading = p.game_evt_types[5].as_ref().unwrap();
        assert_eq!(loading.name, "UserFinishedLoadingSync");
        assert_eq!(loading.typeid, 11);

        let chat = p.message_evt_types[0].as_ref().unwrap();
        assert_eq!(chat.name, "Chat");
        let progress = p.message_evt_types[2].as_ref().unwrap();
        assert_eq!(progress.name, "LoadingProgress");
        let setup = p.tracker_evt_types[1].as_ref().unwrap();
        assert_eq!(setup.name, "PlayerSetup");

        assert_eq!(p.svaruint32_typeid, 7);
        assert_eq!(p.replay_header_typeid, 16);
        assert!(matches!(
            p.type_infos[p.game_details_typeid],
            TypeInfo::Struct(_)
        ));
    }

    #[test]
    fn old_builds_use_player_id_and_have_no_tracker_events() {
        let schema = TEST_SCHEMA.replace("replay_userid_typeid", "replay_playerid_typeid");
        let p = Protocol::parse(&schema, 15405).unwrap();
        assert!(!p.has_tracker_events());
        assert_eq!(p.replay_userid_typeid, 8);
        assert!(p.tracker_evt_types.is_empty());
    }

    #[test]
    fn game_events_accumulate_gameloop_deltas() {
        let p = test_protocol();

        // Two SUserFinishedLoadingSync events, deltas 3 and 5, user ids 1
        // and 2. Bit layout per event: 2-bit delta tag (0), 6-bit delta,
        // 5-bit user id, 7-bit event id (5), 8-bit flags; then byte
        // alignment.
        let mut w = BitWriter::default();
        for (delta, uid, flags) in [(3i64, 1i64, 0x2au8), (5, 2, 0x17)] {
            w.put(0, 2); // delta choice tag -> m_uint6
            w.put(delta as u64, 6);
            w.put(uid as u64, 5); // user id struct: single 5-bit int
            w.put(5, 7); // event id
            w.put(u64::from(flags), 8);
            w.align();
        }
        let contents = w.finish();

        let (events, err) = p.decode_game_events(&contents);
        assert_eq!(err, None);
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].gameloop(), 3);
        assert_eq!(events[1].gameloop(), 8, "deltas accumulate");
        assert_eq!(events[0].name(), "UserFinishedLoadingSync");
        assert_eq!(events[0].id(), 5);
        assert_eq!(events[0].user_id(), 1);
        assert_eq!(events[1].user_id(), 2);
        assert_eq!(events[0].fields.int(&["flags"]), 0x2a);
        assert_eq!(events[1].fields.int(&["flags"]), 0x17);
    }

    #[test]
    fn unknown_event_id_returns_partial_events() {
        let p = test_protocol();

        let mut w = BitWriter::default();
        w.put(0, 2);
        w.put(1, 6);
        w.put(0, 5);
        w.put(5, 7); // known event id
        w.put(0, 8);
        w.align();
        w.put(0, 2);
        w.put(1, 6);
        w.put(0, 5);
        w.put(3, 7); // id 3 has no descriptor
        w.put(0, 8);
        w.align();
        let contents = w.finish();

        let (events, err) = p.decode_game_events(&contents);
        assert_eq!(events.len(), 1);
        assert_eq!(err, Some(DecodeError::UnknownEventId(3)));
    }

    #[test]
    fn truncated_stream_returns_partial_events() {
        let p = test_protocol();

        let mut w = BitWriter::default();
        w.put(0, 2);
        w.put(1, 6);
        w.put(0, 5);
        w.put(5, 7);
        w.put(0x2a, 8);
        w.align();
        let mut contents = w.finish();
        contents.push(0x01); // a lone spare byte: delta + partial garbage

        let (events, err) = p.decode_game_events(&contents);
        assert_eq!(events.len(), 1);
        assert!(matches!(err, Some(DecodeError::EndOfInput(_))));
    }

    #[test]
    fn tracker_events_skip_user_id() {
        let p = test_protocol();

        // Versioned framing: delta (choice), event id (int), body
        // (struct 15: playerId tag 0, upkeepPlayerId tag 1).
        let contents = [
            0x03, 0x02, 0x09, 0x08, // delta: choice tag 1 -> varint 4
            0x09, 0x02, // event id 1
            0x05, 0x04, // struct, 2 entries
            0x00, 0x09, 0x04, // tag 0: playerId = 2
            0x02, 0x09, 0x06, // tag 1: upkeepPlayerId = 3
        ];

        let (events, err) = p.decode_tracker_events(&contents);
        assert_eq!(err, None);
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.name(), "PlayerSetup");
        assert_eq!(e.gameloop(), 4);
        assert_eq!(e.fields.int(&["playerId"]), 2);
        assert_eq!(e.fields.int(&["upkeepPlayerId"]), 3);
        assert_eq!(e.fields.value(&["userid"]), None);
    }

    #[test]
    fn details_root_must_be_a_struct() {
        let p = test_protocol();
        // details typeid 17 is a struct; feed it a truncated stream.
        assert!(p.decode_details(&[]).is_err());

        // A valid minimal details blob: struct with title only.
        let contents = [
            0x05, 0x02, // struct, 1 entry
            0x00, 0x02, 0x06, b'L', b'T', b'D', // tag 0: blob "LTD"
        ];
        let details = p.decode_details(&contents).unwrap();
        assert_eq!(details.text(&["title"]), "LTD");
        assert_eq!(details.value(&["isBlizzardMap"]), None);
    }

    #[test]
    fn init_data_decodes_bit_packed_root() {
        let p = test_protocol();
        // initdata: struct 18 { lobby: struct 11 { flags: 8-bit int } }.
        let init = p.decode_init_data(&[0x42]).unwrap();
        assert_eq!(init.int(&["lobby", "flags"]), 0x42);
    }

    #[test]
    fn attribute_events_group_by_scope_and_id() {
        let p = test_protocol();

        let mut contents = Vec::new();
        contents.push(4u8); // source
        contents.extend_from_slice(&999u32.to_le_bytes()); // mapNamespace
        contents.extend_from_slice(&2u32.to_le_bytes()); // count (ignored)

        // Attribute 1: namespace 999, id 500, scope 16, value "Humn".
        contents.extend_from_slice(&999u32.to_le_bytes());
        contents.extend_from_slice(&500u32.to_le_bytes());
        contents.push(16);
        contents.extend_from_slice(b"nmuH"); // reversed on the wire

        // Attribute 2: value with zero padding -> "Ter".
        contents.extend_from_slice(&999u32.to_le_bytes());
        contents.extend_from_slice(&3000u32.to_le_bytes());
        contents.push(16);
        contents.extend_from_slice(b"reT\0");

        let attrs = p.decode_attributes_events(&contents).unwrap();
        assert_eq!(attrs.int(&["source"]), 4);
        assert_eq!(attrs.int(&["mapNamespace"]), 999);
        assert_eq!(attrs.text(&["scopes", "16", "500", "value"]), "Humn");
        assert_eq!(attrs.int(&["scopes", "16", "500", "attrid"]), 500);
        assert_eq!(attrs.text(&["scopes", "16", "3000", "value"]), "Ter");
    }

    #[test]
    fn attribute_events_empty_input_yields_empty_struct() {
        let p = test_protocol();
        let attrs = p.decode_attributes_events(&[]).unwrap();
        assert!(attrs.is_empty());
    }

    /// Tiny big-endian bit writer for building bit-packed test streams,
    /// the inverse of the buffer's read order: each `put` appends `bits`
    /// of `value` to the low end of the current byte's unwritten bits.
    #[derive(Default)]
    pub(crate) struct BitWriter {
        bytes: Vec<u8>,
        bit_pos: u8,
    }

    impl BitWriter {
        pub fn put(&mut self, value: u64, bits: u8) {
            // Emit most-significant group first so reads that stack
            // earlier bits above later ones see the original value.
            let mut remaining = bits;
            while remaining > 0 {
                if self.bit_pos == 0 {
                    self.bytes.push(0);
                }
                let free = 8 - self.bit_pos;
                let take = free.min(remaining);
                let group = (value >> (remaining - take)) as u8 & ((1u16 << take) - 1) as u8;
                let last = self.bytes.last_mut().expect("pushed above");
                *last |= group << self.bit_pos;
                self.bit_pos = (self.bit_pos + take) % 8;
                remaining -= take;
            }
        }

        pub fn align(&mut self) {
            self.bit_pos = 0;
        }

        pub fn finish(self) -> Vec<u8> {
            self.bytes
        }
    }
}
