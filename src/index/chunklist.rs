//! Occupancy-bitmap chunked map.
//!
//! A bounded list of key/value pairs per chunk, chained forward. Holes left
//! by removals are refilled before the list grows; an emptied chunk is
//! returned to the allocator unless it is the head. Used for the index
//! directory and edge adjacency: small maps, rarely mutated, traversed in
//! full.

use std::marker::PhantomData;
use std::mem::offset_of;

use crate::alloc::Allocator;
use crate::error::Result;
use crate::region::pm;
use crate::tx::{LockDomain, TransactionImpl};

/// Embedded persistent head of a chunk list.
#[repr(C)]
#[derive(Copy, Clone)]
pub(crate) struct ChunkListHead {
    head: u64,
    num_elems: u64,
}

/// Size of an embedded chunk-list head.
pub(crate) const CHUNKLIST_HEAD_SIZE: u64 = std::mem::size_of::<ChunkListHead>() as u64;

#[derive(Copy, Clone)]
#[repr(C)]
struct ChunkHdr {
    next: u64,
    occupants: u16,
    num_elems: u8,
    _pad: [u8; 5],
}

const CHUNK_HDR_SIZE: u64 = std::mem::size_of::<ChunkHdr>() as u64;

/// One key/value pair as laid out in a chunk.
#[allow(dead_code)] // accessed through field offsets
#[repr(C)]
#[derive(Copy, Clone)]
pub(crate) struct KvPair<K, V> {
    key: K,
    value: V,
}

/// Handle to a chunk list whose head is embedded at `addr`. `CHUNK_BYTES`
/// bounds each chunk; entries per chunk derive from the pair size.
pub(crate) struct ChunkList<K, V, const CHUNK_BYTES: u32> {
    addr: u64,
    _kv: PhantomData<(K, V)>,
}

impl<K: Copy + PartialEq, V: Copy, const CHUNK_BYTES: u32> ChunkList<K, V, CHUNK_BYTES> {
    const MAX_PER_CHUNK: u32 =
        (CHUNK_BYTES - CHUNK_HDR_SIZE as u32) / std::mem::size_of::<KvPair<K, V>>() as u32;

    pub(crate) fn at(addr: u64) -> ChunkList<K, V, CHUNK_BYTES> {
        debug_assert!(Self::MAX_PER_CHUNK > 0 && Self::MAX_PER_CHUNK <= 16);
        ChunkList {
            addr,
            _kv: PhantomData,
        }
    }

    /// Zeroes a freshly embedded head. Flushed with the owning record.
    pub(crate) fn init(addr: u64) {
        pm::write(
            addr,
            ChunkListHead {
                head: pm::NULL,
                num_elems: 0,
            },
        );
    }

    fn head(&self) -> u64 {
        pm::read(self.addr + offset_of!(ChunkListHead, head) as u64)
    }

    pub(crate) fn num_elems(&self, tx: &TransactionImpl) -> Result<u64> {
        tx.acquire_lock(LockDomain::Index, self.addr, false)?;
        Ok(pm::read(
            self.addr + offset_of!(ChunkListHead, num_elems) as u64,
        ))
    }

    fn slot_addr(chunk: u64, slot: u32) -> u64 {
        chunk + CHUNK_HDR_SIZE + slot as u64 * std::mem::size_of::<KvPair<K, V>>() as u64
    }

    fn key_at(chunk: u64, slot: u32) -> K {
        pm::read(Self::slot_addr(chunk, slot) + offset_of!(KvPair<K, V>, key) as u64)
    }

    fn value_addr(chunk: u64, slot: u32) -> u64 {
        Self::slot_addr(chunk, slot) + offset_of!(KvPair<K, V>, value) as u64
    }

    fn occupants(chunk: u64) -> u16 {
        pm::read(chunk + offset_of!(ChunkHdr, occupants) as u64)
    }

    fn chunk_count(chunk: u64) -> u8 {
        pm::read(chunk + offset_of!(ChunkHdr, num_elems) as u64)
    }

    fn chunk_next(chunk: u64) -> u64 {
        pm::read(chunk + offset_of!(ChunkHdr, next) as u64)
    }

    /// Returns the value-slot address for `key`, inserting a zeroed entry
    /// when absent. The first hole anywhere in the chain is preferred over
    /// appending.
    pub(crate) fn add(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        key: K,
    ) -> Result<u64> {
        tx.acquire_lock(LockDomain::Index, self.addr, false)?;

        let mut prev = pm::NULL;
        let mut curr = self.head();
        let mut empty_chunk = pm::NULL;
        let mut empty_slot = 0u32;

        while curr != pm::NULL {
            // Chunk-level locking: a change rewrites the chunk's bitmap.
            tx.acquire_lock(LockDomain::Index, curr, false)?;

            let occupants = Self::occupants(curr);
            let count = Self::chunk_count(curr) as u32;
            let mut seen = 0u32;
            let mut slot = 0u32;
            while seen < count {
                if occupants & (1 << slot) != 0 {
                    if Self::key_at(curr, slot) == key {
                        return Ok(Self::value_addr(curr, slot));
                    }
                    seen += 1;
                } else if empty_chunk == pm::NULL {
                    // A hole from an earlier removal; remember it but keep
                    // looking for the key.
                    empty_chunk = curr;
                    empty_slot = slot;
                }
                slot += 1;
            }
            if count < Self::MAX_PER_CHUNK && empty_chunk == pm::NULL {
                empty_chunk = curr;
                empty_slot = slot;
            }

            prev = curr;
            curr = Self::chunk_next(curr);
        }

        // Key not found; the element count is about to change.
        tx.acquire_lock(LockDomain::Index, self.addr, true)?;

        let (chunk, slot) = if empty_chunk != pm::NULL {
            tx.acquire_lock(LockDomain::Index, empty_chunk, true)?;
            // occupants and num_elems are adjacent.
            tx.log(empty_chunk + offset_of!(ChunkHdr, occupants) as u64, 3)?;
            pm::write(
                empty_chunk + offset_of!(ChunkHdr, num_elems) as u64,
                Self::chunk_count(empty_chunk) + 1,
            );
            pm::write(
                empty_chunk + offset_of!(ChunkHdr, occupants) as u64,
                Self::occupants(empty_chunk) | (1 << empty_slot),
            );
            (empty_chunk, empty_slot)
        } else {
            let chunk = allocator.alloc(tx, CHUNK_BYTES as u64)?;
            pm::write(
                chunk,
                ChunkHdr {
                    next: pm::NULL,
                    occupants: 1,
                    num_elems: 1,
                    _pad: [0; 5],
                },
            );
            tx.flush(chunk, CHUNK_HDR_SIZE);

            if prev == pm::NULL {
                tx.write(self.addr + offset_of!(ChunkListHead, head) as u64, chunk)?;
            } else {
                tx.acquire_lock(LockDomain::Index, prev, true)?;
                tx.write(prev + offset_of!(ChunkHdr, next) as u64, chunk)?;
            }
            (chunk, 0)
        };

        let total = pm::read::<u64>(self.addr + offset_of!(ChunkListHead, num_elems) as u64);
        tx.write(
            self.addr + offset_of!(ChunkListHead, num_elems) as u64,
            total + 1,
        )?;

        let slot_addr = Self::slot_addr(chunk, slot);
        pm::write(slot_addr + offset_of!(KvPair<K, V>, key) as u64, key);
        pm::zero(
            Self::value_addr(chunk, slot),
            std::mem::size_of::<V>(),
        );
        tx.flush(slot_addr, std::mem::size_of::<KvPair<K, V>>() as u64);

        Ok(Self::value_addr(chunk, slot))
    }

    /// Removes `key` if present. An emptied chunk past the head is freed.
    pub(crate) fn remove(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        key: K,
    ) -> Result<()> {
        tx.acquire_lock(LockDomain::Index, self.addr, false)?;

        let mut prev = pm::NULL;
        let mut curr = self.head();
        while curr != pm::NULL {
            tx.acquire_lock(LockDomain::Index, curr, false)?;

            let occupants = Self::occupants(curr);
            let count = Self::chunk_count(curr) as u32;
            let mut seen = 0u32;
            let mut slot = 0u32;
            while seen < count {
                if occupants & (1 << slot) != 0 {
                    if Self::key_at(curr, slot) == key {
                        // Same lock order as insertion.
                        tx.acquire_lock(LockDomain::Index, self.addr, true)?;
                        tx.acquire_lock(LockDomain::Index, curr, true)?;
                        tx.log(curr + offset_of!(ChunkHdr, occupants) as u64, 3)?;
                        pm::write(
                            curr + offset_of!(ChunkHdr, num_elems) as u64,
                            Self::chunk_count(curr) - 1,
                        );
                        pm::write(
                            curr + offset_of!(ChunkHdr, occupants) as u64,
                            Self::occupants(curr) & !(1 << slot),
                        );

                        let total = pm::read::<u64>(
                            self.addr + offset_of!(ChunkListHead, num_elems) as u64,
                        );
                        tx.write(
                            self.addr + offset_of!(ChunkListHead, num_elems) as u64,
                            total - 1,
                        )?;

                        // An emptied chunk past the head is unlinked and
                        // freed; the head chunk stays for reuse.
                        if Self::chunk_count(curr) == 0 && prev != pm::NULL {
                            tx.acquire_lock(LockDomain::Index, prev, true)?;
                            tx.write(
                                prev + offset_of!(ChunkHdr, next) as u64,
                                Self::chunk_next(curr),
                            )?;
                            allocator.free(tx, curr, CHUNK_BYTES as u64);
                        }
                        return Ok(());
                    }
                    seen += 1;
                }
                slot += 1;
            }

            prev = curr;
            curr = Self::chunk_next(curr);
        }
        Ok(())
    }

    /// Linear scan for `key`; returns the value-slot address.
    pub(crate) fn find(&self, tx: &TransactionImpl, key: K) -> Result<Option<u64>> {
        tx.acquire_lock(LockDomain::Index, self.addr, false)?;

        let mut curr = self.head();
        while curr != pm::NULL {
            tx.acquire_lock(LockDomain::Index, curr, false)?;
            let occupants = Self::occupants(curr);
            let count = Self::chunk_count(curr) as u32;
            let mut seen = 0u32;
            let mut slot = 0u32;
            while seen < count {
                if occupants & (1 << slot) != 0 {
                    if Self::key_at(curr, slot) == key {
                        return Ok(Some(Self::value_addr(curr, slot)));
                    }
                    seen += 1;
                }
                slot += 1;
            }
            curr = Self::chunk_next(curr);
        }
        Ok(None)
    }

    /// Every (key, value-slot address), in chain order.
    pub(crate) fn entries(&self, tx: &TransactionImpl) -> Result<Vec<(K, u64)>> {
        tx.acquire_lock(LockDomain::Index, self.addr, false)?;

        let mut out = Vec::new();
        let mut curr = self.head();
        while curr != pm::NULL {
            tx.acquire_lock(LockDomain::Index, curr, false)?;
            let occupants = Self::occupants(curr);
            let count = Self::chunk_count(curr) as u32;
            let mut seen = 0u32;
            let mut slot = 0u32;
            while seen < count {
                if occupants & (1 << slot) != 0 {
                    out.push((Self::key_at(curr, slot), Self::value_addr(curr, slot)));
                    seen += 1;
                }
                slot += 1;
            }
            curr = Self::chunk_next(curr);
        }
        Ok(out)
    }

    /// Number of chunks in the chain.
    pub(crate) fn total_chunks(&self, tx: &TransactionImpl) -> Result<u64> {
        tx.acquire_lock(LockDomain::Index, self.addr, false)?;
        let mut total = 0u64;
        let mut curr = self.head();
        while curr != pm::NULL {
            tx.acquire_lock(LockDomain::Index, curr, false)?;
            total += 1;
            curr = Self::chunk_next(curr);
        }
        Ok(total)
    }

    /// Occupancy of the chain as a percentage.
    pub(crate) fn health(&self, tx: &TransactionImpl) -> Result<u64> {
        let chunks = self.total_chunks(tx)?;
        if chunks == 0 {
            return Ok(100);
        }
        Ok(100 * self.num_elems(tx)? / (chunks * Self::MAX_PER_CHUNK as u64))
    }

    /// Bytes the chain occupies, head included.
    pub(crate) fn size_bytes(&self, tx: &TransactionImpl) -> Result<u64> {
        Ok(self.total_chunks(tx)? * CHUNK_BYTES as u64 + CHUNKLIST_HEAD_SIZE)
    }

    /// Bytes of one chunk.
    pub(crate) fn chunk_size_bytes(&self) -> u64 {
        CHUNK_BYTES as u64
    }

    /// Frees every chunk in the chain; for tearing the owning structure
    /// down once its entries are gone.
    pub(crate) fn drain_chunks(&self, tx: &TransactionImpl, allocator: &Allocator) -> Result<()> {
        tx.acquire_lock(LockDomain::Index, self.addr, true)?;
        let mut curr = self.head();
        while curr != pm::NULL {
            let next = Self::chunk_next(curr);
            allocator.free(tx, curr, CHUNK_BYTES as u64);
            curr = next;
        }
        tx.write(self.addr + offset_of!(ChunkListHead, head) as u64, pm::NULL)?;
        Ok(())
    }
}
