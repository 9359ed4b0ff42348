//! Stable paper identifiers derived from URLs

use lazy_static::lazy_static;
use regex::Regex;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

lazy_static! {
    /// Google Scholar appends a per-session token that would make the same
    /// paper fingerprint differently on every visit.
    static ref SESSION_TOKEN: Regex = Regex::new(r"(?i)[?|&]casa_token=\S+").unwrap();
}

/// FNV-1a 32-bit hash over the UTF-16 code units of `input`.
///
/// Hashing code units rather than bytes keeps ids identical to the ones the
/// browser extension already stored.
pub fn fnv1a_utf16(input: &str) -> u32 {
    input.encode_utf16().fold(FNV_OFFSET_BASIS, |hash, unit| {
        (hash ^ u32::from(unit)).wrapping_mul(FNV_PRIME)
    })
}

/// Paper id for a URL: `p_` followed by 8 lowercase hex digits.
pub fn paper_fingerprint(url: &str) -> String {
    format!("p_{:08x}", fnv1a_utf16(url))
}

/// Strip session tokens so a link fingerprints the same across visits.
pub fn canonical_url(url: &str) -> String {
    SESSION_TOKEN.replace(url, "").into_owned()
}
