//! Typed keys for the balanced-tree indices.
//!
//! Scalar keys are stored inline in the tree node. String keys keep an
//! 8-byte prefix inline and spill the remainder into an externally
//! allocated backing; the collation transform happens once at the border,
//! after which comparison is byte-wise.

use std::cmp::Ordering;

use crate::alloc::Allocator;
use crate::error::Result;
use crate::region::pm;
use crate::tx::TransactionImpl;

/// A key the AVL tree can store, compare, copy into persistent memory, and
/// tear down.
pub(crate) trait TreeKey: Copy {
    /// Total order among keys of this type.
    fn cmp_key(&self, other: &Self) -> Ordering;

    /// Produces the persistent form of this key (deep copy of any external
    /// backing). Scalars are themselves.
    fn store(&self, _tx: &TransactionImpl, _allocator: &Allocator) -> Result<Self> {
        Ok(*self)
    }

    /// Releases any external backing of a persistent key.
    fn destroy(&self, _tx: &TransactionImpl, _allocator: &Allocator) {}

    /// Bytes held outside the tree node (string remainders).
    fn extra_bytes(&self) -> u64 {
        0
    }
}

impl TreeKey for i64 {
    fn cmp_key(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl TreeKey for bool {
    fn cmp_key(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl TreeKey for f64 {
    fn cmp_key(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

const PREFIX_LEN: usize = 8;

/// String index key: inline prefix plus external remainder.
#[repr(C)]
#[derive(Copy, Clone)]
pub(crate) struct StringKey {
    prefix: [u8; PREFIX_LEN],
    remainder: u64,
    len: u32,
    _pad: u32,
}

impl StringKey {
    fn remainder_len(&self) -> usize {
        (self.len as usize).saturating_sub(PREFIX_LEN)
    }

    fn prefix_bytes(&self) -> &[u8] {
        &self.prefix[..(self.len as usize).min(PREFIX_LEN)]
    }

    fn remainder_bytes(&self) -> &'static [u8] {
        if self.remainder_len() == 0 {
            &[]
        } else {
            pm::bytes(self.remainder, self.remainder_len())
        }
    }
}

impl TreeKey for StringKey {
    fn cmp_key(&self, other: &Self) -> Ordering {
        match self.prefix_bytes().cmp(other.prefix_bytes()) {
            Ordering::Equal => self.remainder_bytes().cmp(other.remainder_bytes()),
            ord => ord,
        }
    }

    fn store(&self, tx: &TransactionImpl, allocator: &Allocator) -> Result<Self> {
        let mut key = *self;
        let rlen = self.remainder_len();
        if rlen > 0 {
            let backing = allocator.alloc(tx, rlen as u64)?;
            pm::copy_in(backing, self.remainder_bytes());
            tx.flush(backing, rlen as u64);
            key.remainder = backing;
        }
        Ok(key)
    }

    fn destroy(&self, tx: &TransactionImpl, allocator: &Allocator) {
        let rlen = self.remainder_len();
        if rlen > 0 {
            allocator.free(tx, self.remainder, rlen as u64);
        }
    }

    fn extra_bytes(&self) -> u64 {
        self.remainder_len() as u64
    }
}

/// A probe key built from a caller string. The remainder points into a
/// DRAM buffer owned here, never into persistent memory, so it must not be
/// stored; `TreeKey::store` makes the persistent copy.
pub(crate) struct TransientStringKey {
    // Kept alive for the remainder pointer inside `key`.
    _buf: Vec<u8>,
    key: StringKey,
}

impl TransientStringKey {
    /// Applies the locale's collation transform and builds the probe key.
    /// The supported locales collate bytewise, so the transform is the
    /// identity; this is the single border where a collation table would
    /// apply.
    pub(crate) fn new(s: &str, _locale: &str) -> TransientStringKey {
        let buf: Vec<u8> = s.as_bytes().to_vec();
        let mut prefix = [0u8; PREFIX_LEN];
        let n = buf.len().min(PREFIX_LEN);
        prefix[..n].copy_from_slice(&buf[..n]);
        let remainder = if buf.len() > PREFIX_LEN {
            buf[PREFIX_LEN..].as_ptr() as u64
        } else {
            0
        };
        TransientStringKey {
            key: StringKey {
                prefix,
                remainder,
                len: buf.len() as u32,
                _pad: 0,
            },
            _buf: buf,
        }
    }

    pub(crate) fn key(&self) -> StringKey {
        self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strings_compare_by_prefix() {
        let a = TransientStringKey::new("abc", "");
        let b = TransientStringKey::new("abd", "");
        assert_eq!(a.key().cmp_key(&b.key()), Ordering::Less);
        assert_eq!(a.key().cmp_key(&a.key()), Ordering::Equal);
    }

    #[test]
    fn long_strings_compare_by_remainder() {
        let a = TransientStringKey::new("prefix00aaa", "");
        let b = TransientStringKey::new("prefix00aab", "");
        assert_eq!(a.key().cmp_key(&b.key()), Ordering::Less);
        let c = TransientStringKey::new("prefix00", "");
        assert_eq!(c.key().cmp_key(&a.key()), Ordering::Less);
    }

    #[test]
    fn float_keys_total_order() {
        assert_eq!((-0.0f64).cmp_key(&0.0), Ordering::Less);
        assert_eq!(1.5f64.cmp_key(&1.5), Ordering::Equal);
    }
}
