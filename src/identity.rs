//! Content-addressed identifiers shared by the build-time and run-time phases
//!
//! The catalog (build time) and the runtime aggregator (run time) never talk
//! to each other. They agree on which record belongs to which function or
//! region only because both derive the identifier from the same content with
//! the same digest. Changing anything here (digest, byte window, content
//! layout) silently breaks every blob produced by an older build.
//!
//! - Functions: the linkage (mangled) name alone.
//! - Regions: `file:start:end` followed by `:counter` for every requested
//!   counter, in request order.
//!
//! Collisions are not detected; two entities hashing to the same identifier
//! share one measurement unit.

use std::fmt::Write as _;

/// First digest byte packed into the identifier.
const WINDOW_START: usize = 3;

/// Number of digest bytes in an identifier.
const WINDOW_LEN: usize = 8;

/// Which content rule produced an identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Function,
    Region,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Function => write!(f, "function"),
            EntityKind::Region => write!(f, "region"),
        }
    }
}

/// Derive a 64-bit identifier from arbitrary content
///
/// Computes the MD5 digest of `content` and packs digest bytes `3..11`
/// most-significant first.
///
/// # Example
/// ```
/// use hwcprobe::identity::identify;
///
/// let a = identify("_Z7computev");
/// let b = identify("_Z7computev");
/// assert_eq!(a, b);
/// assert_ne!(a, identify("_Z7computei"));
/// ```
pub fn identify(content: &str) -> u64 {
    let digest = md5::compute(content.as_bytes());
    digest.0[WINDOW_START..WINDOW_START + WINDOW_LEN]
        .iter()
        .fold(0u64, |id, byte| (id << 8) | u64::from(*byte))
}

/// Identifier of a function, keyed by its linkage name
pub fn function_id(linkage_name: &str) -> u64 {
    identify(linkage_name)
}

/// Build the canonical content string for a region
pub fn region_content<'a, I>(file: &str, start_line: u32, end_line: u32, counters: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut content = format!("{}:{}:{}", file, start_line, end_line);
    for name in counters {
        // Writing into a String cannot fail
        let _ = write!(content, ":{}", name);
    }
    content
}

/// Identifier of a source region
///
/// `counters` are the counter names requested for the region; they take part
/// in the identity so two regions spanning the same lines but recording
/// different counters do not merge.
pub fn region_id<'a, I>(file: &str, start_line: u32, end_line: u32, counters: I) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    identify(&region_content(file, start_line, end_line, counters))
}
