//! FNV-1a (32-bit) name hashing
//!
//! Module and export names are never compared as strings. Both sides are
//! reduced to a 32-bit FNV-1a hash, optionally after folding `A`..`Z` to
//! lowercase, and the hashes are compared instead.

/// FNV-1a 32-bit offset basis
pub const FNV_OFFSET_BASIS: u32 = 0x811C_9DC5;
/// FNV-1a 32-bit prime
pub const FNV_PRIME: u32 = 0x0100_0193;

#[inline]
const fn fold(c: u32, lowercase: bool) -> u32 {
    if lowercase && c >= b'A' as u32 && c <= b'Z' as u32 {
        c + (b'a' - b'A') as u32
    } else {
        c
    }
}

/// Continues a hash from `seed` over `bytes`, stopping at the first NUL.
pub const fn fnv1a_continue(seed: u32, bytes: &[u8], lowercase: bool) -> u32 {
    let mut hash = seed;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == 0 {
            break;
        }
        hash = (hash ^ fold(bytes[i] as u32, lowercase)).wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Case-sensitive hash of a narrow name. Empty input hashes to 0.
pub const fn fnv1a(bytes: &[u8]) -> u32 {
    if bytes.is_empty() {
        return 0;
    }
    fnv1a_continue(FNV_OFFSET_BASIS, bytes, false)
}

/// Hash of a narrow name with `A`..`Z` folded to lowercase. Empty input hashes to 0.
pub const fn fnv1a_lower(bytes: &[u8]) -> u32 {
    if bytes.is_empty() {
        return 0;
    }
    fnv1a_continue(FNV_OFFSET_BASIS, bytes, true)
}

/// `&str` convenience for [`fnv1a`] / [`fnv1a_lower`], usable in const context.
pub const fn fnv1a_str(name: &str, lowercase: bool) -> u32 {
    if lowercase {
        fnv1a_lower(name.as_bytes())
    } else {
        fnv1a(name.as_bytes())
    }
}

/// Hash of a UTF-16 name as stored in loader entries.
///
/// Each code unit is mixed in whole, so for ASCII names this equals the
/// narrow hash of the same text.
pub fn fnv1a_wide(units: &[u16], lowercase: bool) -> u32 {
    if units.is_empty() {
        return 0;
    }
    let mut hash = FNV_OFFSET_BASIS;
    for &unit in units {
        if unit == 0 {
            break;
        }
        hash = (hash ^ fold(unit as u32, lowercase)).wrapping_mul(FNV_PRIME);
    }
    hash
}

/// A hash is usable as a lookup key unless it is 0 or the untouched offset basis.
#[inline]
pub const fn is_valid(hash: u32) -> bool {
    hash != 0 && hash != FNV_OFFSET_BASIS
}

/// Compile-time case-sensitive hash of a string literal.
#[macro_export]
macro_rules! fnv1a {
    ($name:literal) => {
        const { $crate::hash::fnv1a($name.as_bytes()) }
    };
}

/// Compile-time lowercase hash of a string literal.
#[macro_export]
macro_rules! fnv1a_lower {
    ($name:literal) => {
        const { $crate::hash::fnv1a_lower($name.as_bytes()) }
    };
}
