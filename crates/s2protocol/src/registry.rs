//! Process-wide protocol registry.
//!
//! Protocols are parsed lazily, once per base build, and shared by
//! reference afterwards. Failures are cached too: a build whose schema
//! failed to parse is treated as unknown and never re-attempted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::builds;
use crate::protocol::Protocol;
use crate::schema;

type Cache = Mutex<HashMap<u32, Option<Arc<Protocol>>>>;

static PROTOCOLS: OnceLock<Cache> = OnceLock::new();

/// Returns the protocol for the given base build, or `None` when the
/// build is unknown or its schema failed to parse.
pub fn protocol(base_build: u32) -> Option<Arc<Protocol>> {
    let cache = PROTOCOLS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    resolve(&mut cache, base_build)
}

fn resolve(
    cache: &mut HashMap<u32, Option<Arc<Protocol>>>,
    base_build: u32,
) -> Option<Arc<Protocol>> {
    if let Some(cached) = cache.get(&base_build) {
        // A cached None means an earlier lookup already failed.
        return cached.clone();
    }

    let resolved = if let Some(src) = builds::schema_source(base_build) {
        match schema::parse(src, base_build) {
            Ok(p) => Some(Arc::new(p)),
            Err(error) => {
                tracing::warn!(base_build, %error, "failed to parse protocol schema");
                None
            }
        }
    } else if let Some(older) = builds::duplicate_of(base_build) {
        // An aliased build: decode with the oldest identical schema,
        // stamped with the requested build number.
        resolve(cache, older).map(|orig| Arc::new(orig.with_base_build(base_build)))
    } else {
        None
    };

    cache.insert(base_build, resolved.clone());
    resolved
}

/// The protocol used to decode replay headers: the latest known base
/// build (any build can decode the version-bearing header).
pub fn default_protocol() -> Option<Arc<Protocol>> {
    protocol(builds::latest_base_build())
}

/// All base builds this crate can decode, in ascending order. Includes
/// aliased builds.
pub fn known_base_builds() -> Vec<u32> {
    let mut all: Vec<u32> = builds::BUILDS
        .iter()
        .map(|(build, _)| *build)
        .chain(builds::DUPLICATES.iter().map(|(build, _)| *build))
        .collect();
    all.sort_unstable();
    all
}
