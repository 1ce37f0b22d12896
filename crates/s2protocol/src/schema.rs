//! Loader for per-build protocol schemas.
//!
//! A schema is a textual dump: a `typeinfos` list with one tuple-literal
//! type descriptor per line, three event-id tables, and a handful of named
//! type ids. The loader turns one dump into a [`Protocol`]. Malformed
//! schema text is a build-time defect of the embedded data, not a runtime
//! input condition; the registry maps a loader failure to "build unknown".

use thiserror::Error;

use crate::protocol::{EvtType, Protocol};
use crate::types::{Field, IntBounds, TypeInfo};

/// User ids replaced player ids in event framing from this base build on.
pub(crate) const USERID_BASE_BUILD: u32 = 24764;

/// Tracker events exist from this base build on.
pub(crate) const TRACKER_BASE_BUILD: u32 = 24944;

/// Errors raised while parsing a protocol schema dump.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A named section (e.g. `typeinfos`, `game_event_types`) never
    /// appeared.
    #[error("missing schema section {0:?}")]
    MissingSection(&'static str),

    /// A line did not match the shape its section requires.
    #[error("malformed schema line: {0:?}")]
    Malformed(String),
}

fn malformed(line: &str) -> SchemaError {
    SchemaError::Malformed(line.trim().to_owned())
}

/// Parses one schema dump into a protocol for the given base build.
pub(crate) fn parse(src: &str, base_build: u32) -> Result<Protocol, SchemaError> {
    let has_tracker_events = base_build >= TRACKER_BASE_BUILD;
    let mut lines = LineCursor::new(src);

    lines.seek("typeinfos")?;
    let mut type_infos = Vec::with_capacity(256);
    while let Some(line) = lines.next_line() {
        if line.trim_end() == "]" {
            break;
        }
        type_infos.push(parse_type_info(line)?);
    }

    lines.seek("game_event_types")?;
    let game_evt_types = parse_evt_types(&mut lines, "NNet.Game.S", "Event")?;
    let game_eventid_typeid = parse_named_int(lines.seek("game_eventid_typeid")?)?;

    lines.seek("message_event_types")?;
    let message_evt_types = parse_evt_types(&mut lines, "NNet.Game.S", "Message")?;
    let message_eventid_typeid = parse_named_int(lines.seek("message_eventid_typeid")?)?;

    let (tracker_evt_types, tracker_eventid_typeid) = if has_tracker_events {
        lines.seek("tracker_event_types")?;
        let types = parse_evt_types(&mut lines, "NNet.Replay.Tracker.S", "Event")?;
        let typeid = parse_named_int(lines.seek("tracker_eventid_typeid")?)?;
        (types, typeid)
    } else {
        (Vec::new(), 0)
    };

    let svaruint32_typeid = parse_named_int(lines.seek("svaruint32_typeid")?)?;

    // Before user ids existed, the same framing slot carried a player id.
    let userid_section = if base_build >= USERID_BASE_BUILD {
        "replay_userid_typeid"
    } else {
        "replay_playerid_typeid"
    };
    let replay_userid_typeid = parse_named_int(lines.seek(userid_section)?)?;

    let replay_header_typeid = parse_named_int(lines.seek("replay_header_typeid")?)?;
    let game_details_typeid = parse_named_int(lines.seek("game_details_typeid")?)?;
    let replay_initdata_typeid = parse_named_int(lines.seek("replay_initdata_typeid")?)?;

    Ok(Protocol {
        base_build,
        has_tracker_events,
        type_infos,
        game_evt_types,
        game_eventid_typeid,
        message_evt_types,
        message_eventid_typeid,
        tracker_evt_types,
        tracker_eventid_typeid,
        svaruint32_typeid,
        replay_userid_typeid,
        replay_header_typeid,
        game_details_typeid,
        replay_initdata_typeid,
    })
}

// -----------------------------------------------------------------------
// Line cursor
// -----------------------------------------------------------------------

struct LineCursor<'a> {
    lines: std::str::Lines<'a>,
}

impl<'a> LineCursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { lines: src.lines() }
    }

    fn next_line(&mut self) -> Option<&'a str> {
        self.lines.next()
    }

    /// Advances to the next line starting with `prefix` and returns it.
    fn seek(&mut self, prefix: &'static str) -> Result<&'a str, SchemaError> {
        self.lines
            .by_ref()
            .find(|line| line.starts_with(prefix))
            .ok_or(SchemaError::MissingSection(prefix))
    }
}

/// Parses the trailing integer of a `name = value` line.
fn parse_named_int(line: &str) -> Result<usize, SchemaError> {
    let (_, value) = line.rsplit_once('=').ok_or_else(|| malformed(line))?;
    value.trim().parse().map_err(|_| malformed(line))
}

// -----------------------------------------------------------------------
// Event tables
// -----------------------------------------------------------------------

/// Parses an event table body: `id: (typeid, 'Qualified.Name'),` lines up
/// to the closing `}`. Names lose the given prefix and suffix. The result
/// is dense, indexed by event id, with gaps left empty.
fn parse_evt_types(
    lines: &mut LineCursor<'_>,
    strip_prefix: &str,
    strip_suffix: &str,
) -> Result<Vec<Option<EvtType>>, SchemaError> {
    let mut entries: Vec<EvtType> = Vec::new();
    let mut max_id: i64 = -1;

    while let Some(line) = lines.next_line() {
        if line.trim_end() == "}" {
            break;
        }
        let (id_text, rest) = line.split_once(':').ok_or_else(|| malformed(line))?;
        let id: i64 = id_text.trim().parse().map_err(|_| malformed(line))?;
        usize::try_from(id).map_err(|_| malformed(line))?;

        let (_, rest) = rest.split_once('(').ok_or_else(|| malformed(line))?;
        let (typeid_text, rest) = rest.split_once(',').ok_or_else(|| malformed(line))?;
        let typeid: usize = typeid_text.trim().parse().map_err(|_| malformed(line))?;

        let (_, rest) = rest.split_once('\'').ok_or_else(|| malformed(line))?;
        let (qualified, _) = rest.split_once('\'').ok_or_else(|| malformed(line))?;
        let name = qualified.strip_prefix(strip_prefix).unwrap_or(qualified);
        let name = name.strip_suffix(strip_suffix).unwrap_or(name);

        max_id = max_id.max(id);
        entries.push(EvtType {
            id,
            name: name.to_owned(),
            typeid,
        });
    }

    let mut table: Vec<Option<EvtType>> = Vec::new();
    table.resize_with((max_id + 1) as usize, || None);
    for e in entries {
        let id = e.id as usize;
        table[id] = Some(e);
    }
    Ok(table)
}

// -----------------------------------------------------------------------
// Type descriptor lines
// -----------------------------------------------------------------------

/// Parses one `typeinfos` line, e.g.:
///
/// ```text
/// ('_struct',[[('m_name',71,-3),('m_type',6,-2),('m_data',20,-1)]]),  #73
/// ```
fn parse_type_info(line: &str) -> Result<TypeInfo, SchemaError> {
    let mut scan = Scan::new(line);
    scan.skip_past('\'').map_err(|_| malformed(line))?;
    let name = scan.take_until('\'').map_err(|_| malformed(line))?;
    scan.skip_past('[').map_err(|_| malformed(line))?;

    let info = match name {
        "_int" => TypeInfo::Int(parse_bounds(&mut scan).map_err(|_| malformed(line))?),
        "_struct" => TypeInfo::Struct(parse_struct_fields(&mut scan).map_err(|_| malformed(line))?),
        "_choice" => {
            let bounds = parse_bounds(&mut scan).map_err(|_| malformed(line))?;
            let fields = parse_choice_fields(&mut scan).map_err(|_| malformed(line))?;
            TypeInfo::Choice { bounds, fields }
        }
        "_array" => {
            let bounds = parse_bounds(&mut scan).map_err(|_| malformed(line))?;
            scan.skip_past(',').map_err(|_| malformed(line))?;
            let element = scan
                .take_until(']')
                .ok()
                .and_then(|t| t.trim().parse().ok())
                .ok_or_else(|| malformed(line))?;
            TypeInfo::Array { bounds, element }
        }
        "_bitarray" => TypeInfo::BitArray(parse_bounds(&mut scan).map_err(|_| malformed(line))?),
        "_blob" => TypeInfo::Blob(parse_bounds(&mut scan).map_err(|_| malformed(line))?),
        "_optional" => {
            let inner = scan
                .take_until(']')
                .ok()
                .and_then(|t| t.trim().parse().ok())
                .ok_or_else(|| malformed(line))?;
            TypeInfo::Optional { inner }
        }
        "_bool" => TypeInfo::Bool,
        "_fourcc" => TypeInfo::FourCc,
        "_null" => TypeInfo::Null,
        _ => return Err(malformed(line)),
    };
    Ok(info)
}

/// Parses an `(offset, bits)` pair positioned at or before its `(`.
fn parse_bounds(scan: &mut Scan<'_>) -> Result<IntBounds, ()> {
    scan.skip_past('(')?;
    let offset: i64 = scan.take_until(',')?.trim().parse().map_err(|_| ())?;
    let bits: u8 = scan.take_until(')')?.trim().parse().map_err(|_| ())?;
    Ok(IntBounds { offset, bits })
}

/// Parses struct fields: `('m_name',typeid,tag)` triples until the list
/// runs out of quotes. `m_` prefixes are dropped; a `__parent` name marks
/// the field as a splice directive.
fn parse_struct_fields(scan: &mut Scan<'_>) -> Result<Vec<Field>, ()> {
    let mut fields = Vec::new();
    while scan.skip_past('\'').is_ok() {
        let raw_name = scan.take_until('\'')?;
        let is_name_parent = raw_name == "__parent";
        let name = raw_name.strip_prefix("m_").unwrap_or(raw_name);
        scan.skip_past(',')?;
        let typeid: usize = scan.take_until(',')?.trim().parse().map_err(|_| ())?;
        let tag: i64 = scan.take_until(')')?.trim().parse().map_err(|_| ())?;
        fields.push(Field {
            name: name.to_owned(),
            typeid,
            tag,
            is_name_parent,
        });
    }
    Ok(fields)
}

/// Parses choice variants: a `{tag: ('Name',typeid), ...}` mapping. The
/// result is ordered; the decoders index it by the decoded tag.
fn parse_choice_fields(scan: &mut Scan<'_>) -> Result<Vec<Field>, ()> {
    scan.skip_past('{')?;
    let mut fields = Vec::new();
    loop {
        let rest = scan.rest();
        let close = rest.find('}').ok_or(())?;
        match rest.find(':') {
            Some(colon) if colon < close => {}
            _ => break,
        }

        let tag_text = scan.take_until(':')?;
        let tag: i64 = tag_text
            .trim_matches(|c: char| !(c.is_ascii_digit() || c == '-'))
            .parse()
            .map_err(|_| ())?;
        scan.skip_past('\'')?;
        let name = scan.take_until('\'')?;
        scan.skip_past(',')?;
        let typeid: usize = scan.take_until(')')?.trim().parse().map_err(|_| ())?;
        fields.push(Field {
            name: name.to_owned(),
            typeid,
            tag,
            is_name_parent: false,
        });
    }
    Ok(fields)
}

/// A cursor over a single schema line.
struct Scan<'a> {
    s: &'a str,
}

impl<'a> Scan<'a> {
    fn new(s: &'a str) -> Self {
        Self { s }
    }

    fn rest(&self) -> &'a str {
        self.s
    }

    /// Advances just past the next occurrence of `c`.
    fn skip_past(&mut self, c: char) -> Result<(), ()> {
        let i = self.s.find(c).ok_or(())?;
        self.s = &self.s[i + c.len_utf8()..];
        Ok(())
    }

    /// Returns everything before the next occurrence of `c` and advances
    /// past it.
    fn take_until(&mut self, c: char) -> Result<&'a str, ()> {
        let i = self.s.find(c).ok_or(())?;
        let taken = &self.s[..i];
        self.s = &self.s[i + c.len_utf8()..];
        Ok(taken)
    }
}
