//! Embedded per-build schema dumps.
//!
//! `BUILDS` maps a base build to its schema text. When several game
//! patches shipped byte-identical schemas, only the oldest build's dump is
//! embedded and the newer builds alias it through `DUPLICATES`.

/// Schema dumps, keyed by base build. Oldest first.
pub(crate) static BUILDS: &[(u32, &str)] = &[
    (15405, include_str!("builds/data/base15405.txt")),
    (24944, include_str!("builds/data/base24944.txt")),
    (80949, include_str!("builds/data/base80949.txt")),
];

/// Aliased builds: key shipped the same schema as the (older) value.
/// Values always point at a build present in `BUILDS`, never at another
/// alias.
pub(crate) static DUPLICATES: &[(u32, u32)] = &[
    (16561, 15405),
    (16605, 15405),
    (16755, 15405),
    (16939, 15405),
    (25604, 24944),
    (81009, 80949),
    (81102, 80949),
    (81433, 80949),
];

pub(crate) fn schema_source(base_build: u32) -> Option<&'static str> {
    BUILDS
        .iter()
        .find(|(build, _)| *build == base_build)
        .map(|(_, src)| *src)
}

pub(crate) fn duplicate_of(base_build: u32) -> Option<u32> {
    DUPLICATES
        .iter()
        .find(|(build, _)| *build == base_build)
        .map(|(_, older)| *older)
}

/// The highest base build with an embedded schema.
pub(crate) fn latest_base_build() -> u32 {
    BUILDS
        .iter()
        .map(|(build, _)| *build)
        .max()
        .unwrap_or_default()
}
