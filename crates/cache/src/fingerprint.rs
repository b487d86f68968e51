//! Content fingerprints for rendered pages.
//!
//! A rendered page is identified by the document it came from, its page index
//! and the pixel width it was rendered at. The three are joined into
//! `"{document}_{page}_{width}"` and hashed with MD5; the 128-bit digest is the
//! cache key and its hex form is the storage key on disk.

use std::fmt;

const DIGEST_LEN: usize = 16;
const HEX_SEPARATOR: char = '_';

/// Fingerprint of a (document, page, width) render.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; DIGEST_LEN]);

impl CacheKey {
    /// Derive the key for `page` of `document` rendered `width` pixels wide.
    pub fn derive(document: &str, page: usize, width: u32) -> Self {
        let key_string = format!("{document}_{page}_{width}");
        Self(md5::compute(key_string.as_bytes()).0)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Storage key: each digest byte as two lowercase hex digits, joined by `_`.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(DIGEST_LEN * 3 - 1);
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(HEX_SEPARATOR);
            }
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    /// Parse a storage key produced by [`CacheKey::to_hex`].
    pub fn from_hex(hex: &str) -> Option<Self> {
        let mut digest = [0u8; DIGEST_LEN];
        let mut parts = hex.split(HEX_SEPARATOR);

        for slot in digest.iter_mut() {
            let part = parts.next()?;
            if part.len() != 2 {
                return None;
            }
            *slot = u8::from_str_radix(part, 16).ok()?;
        }

        if parts.next().is_some() {
            return None;
        }
        Some(Self(digest))
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.to_hex())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
