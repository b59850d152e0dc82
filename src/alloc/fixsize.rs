//! Fixed-size allocation over 4 KiB small chunks.
//!
//! Objects of the six fixed sizes live inside 4 KiB chunks whose header
//! carries a next-chunk link, owning lane, free count, a next-free hint,
//! and an occupancy bitmap. `FlexFixedAllocator` carves the 4 KiB chunks
//! themselves out of 2 MiB pool chunks on demand.

use std::collections::{HashMap, HashSet};
use std::mem::offset_of;

use crate::config::{CHUNK_SIZE, SMALL_CHUNK_SIZE};
use crate::error::Result;
use crate::region::pm;
use crate::tx::{IndependentTransaction, TransactionImpl};

use super::fixed::FixedAllocator;
use super::variable::VariableAllocator;
use super::{Allocator, DramRestoreTarget};

const SMALL_CHUNK_MASK: u64 = !(SMALL_CHUNK_SIZE - 1);
const CHUNK_MASK: u64 = !(CHUNK_SIZE - 1);
const BITS_PER_INT: u32 = 32;

/// Fixed part of a small chunk's header; the occupancy bitmap follows.
#[derive(Copy, Clone)]
#[repr(C)]
struct FixedChunkHdr {
    next_chunk: u64,
    my_id: u32,
    free_spots: u32,
    next_index: u32,
    _pad: u32,
}

const HDR_FIXED: u64 = std::mem::size_of::<FixedChunkHdr>() as u64;
const _: () = assert!(HDR_FIXED == 24);

fn bitmap_ints(obj_size: u32) -> u32 {
    let bits = obj_size * BITS_PER_INT;
    (SMALL_CHUNK_SIZE as u32 + bits - 1) / bits
}

fn alloc_offset(bitints: u32, obj_size: u32) -> u64 {
    // Round up to a multiple of the object size; the sizes are all
    // multiples of 8 but not all powers of two.
    let raw = HDR_FIXED + bitints as u64 * 4;
    raw.div_ceil(obj_size as u64) * obj_size as u64
}

fn max_spots(obj_size: u32) -> u32 {
    ((SMALL_CHUNK_SIZE - alloc_offset(bitmap_ints(obj_size), obj_size)) / obj_size as u64) as u32
}

#[derive(Copy, Clone)]
struct SmallChunk {
    base: u64,
}

impl SmallChunk {
    fn next_chunk(self) -> u64 {
        pm::read(self.base + offset_of!(FixedChunkHdr, next_chunk) as u64)
    }

    fn next_link_addr(self) -> u64 {
        self.base + offset_of!(FixedChunkHdr, next_chunk) as u64
    }

    fn free_spots(self) -> u32 {
        pm::read(self.base + offset_of!(FixedChunkHdr, free_spots) as u64)
    }

    fn next_index(self) -> u32 {
        pm::read(self.base + offset_of!(FixedChunkHdr, next_index) as u64)
    }

    fn occupants_addr(self, main_idx: u32) -> u64 {
        self.base + HDR_FIXED + main_idx as u64 * 4
    }

    /// Writes a fresh header and bitmap; slots past `max_spots` are marked
    /// unavailable so the bitmap scan never hands them out.
    fn init(self, tx: &TransactionImpl, alloc_id: u32, bitints: u32, spots: u32) {
        pm::write(
            self.base,
            FixedChunkHdr {
                next_chunk: pm::NULL,
                my_id: alloc_id,
                free_spots: spots,
                next_index: 0,
                _pad: 0,
            },
        );
        for i in 0..bitints {
            pm::write::<u32>(self.occupants_addr(i), 0);
        }
        // Bits past the last usable slot are marked unavailable.
        let main_idx = spots / BITS_PER_INT;
        let sub_idx = spots % BITS_PER_INT;
        if main_idx < bitints {
            let mask = if sub_idx == 0 {
                !0u32
            } else {
                !((1u32 << sub_idx) - 1)
            };
            pm::write::<u32>(self.occupants_addr(main_idx), mask);
        }
        tx.flush(self.base, HDR_FIXED + bitints as u64 * 4);
    }

    /// Claims one slot, preferring the `next_index` hint.
    fn alloc(self, tx: &TransactionImpl, obj_size: u32, bitints: u32) -> Result<u64> {
        debug_assert!(self.free_spots() > 0);
        let spots = max_spots(obj_size);

        let mut found = None;
        let mut index = self.next_index();
        while index < spots {
            let main_idx = index / BITS_PER_INT;
            let sub_idx = index % BITS_PER_INT;
            let word: u32 = pm::read(self.occupants_addr(main_idx));
            if word & (1 << sub_idx) == 0 {
                found = Some((index, main_idx, sub_idx));
                break;
            }
            index += 1;
        }
        if found.is_none() {
            // Restart from the beginning; guaranteed to find a hole.
            'outer: for main_idx in 0..bitints {
                let word: u32 = pm::read(self.occupants_addr(main_idx));
                for sub_idx in 0..BITS_PER_INT {
                    if word & (1 << sub_idx) == 0 {
                        found = Some((main_idx * BITS_PER_INT + sub_idx, main_idx, sub_idx));
                        break 'outer;
                    }
                }
            }
        }
        let (index, main_idx, sub_idx) = found.expect("chunk with free_spots > 0 has a hole");

        // free_spots and next_index sit together for one log call.
        tx.log(self.base + offset_of!(FixedChunkHdr, free_spots) as u64, 8)?;
        tx.log(self.occupants_addr(main_idx), 4)?;
        pm::write(
            self.base + offset_of!(FixedChunkHdr, free_spots) as u64,
            self.free_spots() - 1,
        );
        let word: u32 = pm::read(self.occupants_addr(main_idx));
        pm::write(self.occupants_addr(main_idx), word | (1 << sub_idx));
        pm::write(
            self.base + offset_of!(FixedChunkHdr, next_index) as u64,
            index + 1,
        );

        Ok(self.base + alloc_offset(bitints, obj_size) + (obj_size as u64 * index as u64))
    }

    fn free(self, tx: &TransactionImpl, addr: u64, obj_size: u32, bitints: u32) -> Result<()> {
        let alloc_base = self.base + alloc_offset(bitints, obj_size);
        debug_assert!(addr >= alloc_base && addr < self.base + SMALL_CHUNK_SIZE);
        debug_assert_eq!((addr - alloc_base) % obj_size as u64, 0);
        let addr_idx = ((addr - alloc_base) / obj_size as u64) as u32;

        let main_idx = addr_idx / BITS_PER_INT;
        let sub_idx = addr_idx % BITS_PER_INT;

        tx.log(self.base + offset_of!(FixedChunkHdr, free_spots) as u64, 8)?;
        tx.log(self.occupants_addr(main_idx), 4)?;
        let word: u32 = pm::read(self.occupants_addr(main_idx));
        pm::write(self.occupants_addr(main_idx), word & !(1 << sub_idx));

        if self.free_spots() == 0 {
            pm::write(
                self.base + offset_of!(FixedChunkHdr, next_index) as u64,
                addr_idx,
            );
        }
        pm::write(
            self.base + offset_of!(FixedChunkHdr, free_spots) as u64,
            self.free_spots() + 1,
        );
        Ok(())
    }
}

/// Persistent region header of one size lane: head of its chunk chain.
#[repr(C)]
pub(crate) struct FixSizeHdr {
    start_chunk: u64,
}

/// Allocator for one of the fixed sizes within one lane.
pub(crate) struct FixSizeAllocator {
    hdr: u64,
    obj_size: u32,
    bitints: u32,
    spots: u32,
    my_id: u32,
    free_chunks: HashSet<u64>,
    chunk_to_scan: u64,
    last_chunk_scanned: u64,
}

impl FixSizeAllocator {
    pub(crate) fn new(hdr: u64, obj_size: u32, alloc_id: u32, create: bool) -> FixSizeAllocator {
        if create {
            pm::write(hdr + offset_of!(FixSizeHdr, start_chunk) as u64, pm::NULL);
        }
        FixSizeAllocator {
            hdr,
            obj_size,
            bitints: bitmap_ints(obj_size),
            spots: max_spots(obj_size),
            my_id: alloc_id,
            free_chunks: HashSet::new(),
            chunk_to_scan: pm::read(hdr + offset_of!(FixSizeHdr, start_chunk) as u64),
            last_chunk_scanned: pm::NULL,
        }
    }

    pub(crate) fn hdr_addr(&self) -> u64 {
        self.hdr
    }

    fn start_chunk_addr(&self) -> u64 {
        self.hdr + offset_of!(FixSizeHdr, start_chunk) as u64
    }

    fn start_chunk(&self) -> u64 {
        pm::read(self.start_chunk_addr())
    }

    /// The lane owning the small chunk containing `addr`.
    pub(crate) fn owning_lane(addr: u64) -> u32 {
        let base = addr & SMALL_CHUNK_MASK;
        pm::read(base + offset_of!(FixedChunkHdr, my_id) as u64)
    }

    pub(crate) fn alloc(
        &mut self,
        tx: &TransactionImpl,
        parent: &Allocator,
        flex: &mut FlexFixedAllocator,
        variable: &mut VariableAllocator,
    ) -> Result<u64> {
        // Known-space chunks first.
        if let Some(&base) = self.free_chunks.iter().next() {
            let chunk = SmallChunk { base };
            let addr = chunk.alloc(tx, self.obj_size, self.bitints)?;
            if chunk.free_spots() == 0 {
                // An abort must put this chunk back in the available set.
                parent.register_dram_restore(
                    tx,
                    self.my_id,
                    DramRestoreTarget::FixSize(self.obj_size),
                    self.hdr,
                    base,
                    false,
                );
                self.free_chunks.remove(&base);
            }
            return Ok(addr);
        }

        // Extend the scanned prefix of the persistent chain.
        while self.chunk_to_scan != pm::NULL {
            let chunk = SmallChunk {
                base: self.chunk_to_scan,
            };
            self.last_chunk_scanned = self.chunk_to_scan;
            self.chunk_to_scan = chunk.next_chunk();

            if chunk.free_spots() > 0 {
                let addr = chunk.alloc(tx, self.obj_size, self.bitints)?;
                if chunk.free_spots() > 0 {
                    self.free_chunks.insert(chunk.base);
                } else {
                    parent.register_dram_restore(
                        tx,
                        self.my_id,
                        DramRestoreTarget::FixSize(self.obj_size),
                        self.hdr,
                        chunk.base,
                        false,
                    );
                }
                return Ok(addr);
            }
        }

        // Need a fresh small chunk. The pool bookkeeping must be permanent
        // regardless of the outer transaction's fate, so it happens inside
        // an inner independent transaction.
        let base;
        {
            let inner = IndependentTransaction::begin(tx.db())?;
            base = flex.alloc(inner.tx(), parent, variable)?;
            let chunk = SmallChunk { base };
            chunk.init(inner.tx(), self.my_id, self.bitints, self.spots);

            if self.start_chunk() == pm::NULL {
                inner.tx().write(self.start_chunk_addr(), base)?;
            } else {
                debug_assert_ne!(self.last_chunk_scanned, pm::NULL);
                let link = SmallChunk {
                    base: self.last_chunk_scanned,
                }
                .next_link_addr();
                inner.tx().write(link, base)?;
            }
            inner.commit()?;
        }
        self.last_chunk_scanned = base;

        let chunk = SmallChunk { base };
        let addr = chunk.alloc(tx, self.obj_size, self.bitints)?;
        // A whole chunk was claimed for one object, so it has space, and
        // its linkage cannot be rolled back.
        self.free_chunks.insert(base);
        Ok(addr)
    }

    /// Commit-time free of one object.
    pub(crate) fn free(
        &mut self,
        tx: &TransactionImpl,
        parent: &Allocator,
        flex: &mut FlexFixedAllocator,
        variable: &mut VariableAllocator,
        addr: u64,
    ) -> Result<()> {
        let base = addr & SMALL_CHUNK_MASK;
        let chunk = SmallChunk { base };

        let space_before = chunk.free_spots();
        debug_assert!(space_before < self.spots);
        chunk.free(tx, addr, self.obj_size, self.bitints)?;

        if chunk.free_spots() == self.spots {
            // Entirely empty: return the 4 KiB chunk to its pool.
            parent.register_dram_restore(
                tx,
                self.my_id,
                DramRestoreTarget::FixSize(self.obj_size),
                self.hdr,
                base,
                false,
            );
            self.free_chunks.remove(&base);

            let mut prev = pm::NULL;
            let mut temp = self.start_chunk();
            if temp == base {
                tx.write(self.start_chunk_addr(), chunk.next_chunk())?;
            } else {
                while temp != pm::NULL {
                    if temp == base {
                        let link = SmallChunk { base: prev }.next_link_addr();
                        tx.write(link, chunk.next_chunk())?;
                        break;
                    }
                    prev = temp;
                    temp = SmallChunk { base: temp }.next_chunk();
                }
            }

            if self.last_chunk_scanned == base {
                self.last_chunk_scanned = prev;
            }
            if self.chunk_to_scan == base {
                self.chunk_to_scan = chunk.next_chunk();
            }

            // A rollback must restore the whole header.
            tx.log(base, HDR_FIXED as usize)?;
            flex.free(tx, parent, variable, base)?;
        } else if space_before == 0 {
            parent.register_dram_restore(
                tx,
                self.my_id,
                DramRestoreTarget::FixSize(self.obj_size),
                self.hdr,
                base,
                true,
            );
            self.free_chunks.insert(base);
        }
        Ok(())
    }

    pub(crate) fn restore_dram_chunk(&mut self, chunk: u64) {
        if self.start_chunk() != pm::NULL && self.last_chunk_scanned == pm::NULL {
            let mut prev = self.start_chunk();
            let mut temp = SmallChunk { base: prev }.next_chunk();
            while temp != pm::NULL {
                if temp == chunk {
                    break;
                }
                prev = temp;
                temp = SmallChunk { base: temp }.next_chunk();
            }
            self.last_chunk_scanned = prev;
        }

        if (SmallChunk { base: chunk }).free_spots() > 0 {
            self.free_chunks.insert(chunk);
        }
    }

    pub(crate) fn remove_dram_chunk(&mut self, chunk: u64) {
        if (SmallChunk { base: chunk }).free_spots() == 0 {
            self.free_chunks.remove(&chunk);
        }
    }

    pub(crate) fn used_bytes(&self) -> u64 {
        let mut free_spots = 0u64;
        let mut chunks = 0u64;
        let mut curr = self.start_chunk();
        while curr != pm::NULL {
            free_spots += SmallChunk { base: curr }.free_spots() as u64;
            chunks += 1;
            curr = SmallChunk { base: curr }.next_chunk();
        }
        chunks * SMALL_CHUNK_SIZE - free_spots * self.obj_size as u64
    }
}

/// Persistent header of one 2 MiB pool of small chunks.
#[allow(dead_code)] // accessed through field offsets
#[repr(C)]
pub(crate) struct FlexPoolHdr {
    pool_base: u64,
    next_pool_hdr: u64,
    fa_hdr: [u8; super::fixed::FIXED_HDR_SIZE as usize],
}

/// Size of a pool header as allocated from the variable allocator.
pub(crate) const FLEX_POOL_HDR_SIZE: u64 = std::mem::size_of::<FlexPoolHdr>() as u64;

#[derive(Copy, Clone)]
struct FaInfo {
    fa: FixedAllocator,
    hdr: u64,
    prev: u64,
    num_allocated: i64,
}

/// Lazily grows a chain of 2 MiB pools, each sub-allocated into 4 KiB
/// small chunks by an embedded fixed allocator.
pub(crate) struct FlexFixedAllocator {
    pm: u64,
    obj_size: u32,
    pool_size: u64,
    max_objs_per_pool: i64,
    fa_pools: HashMap<u64, FaInfo>,
    last_hdr_scanned: u64,
}

fn pool_base_of(hdr: u64) -> u64 {
    pm::read(hdr + offset_of!(FlexPoolHdr, pool_base) as u64)
}

fn next_pool_of(hdr: u64) -> u64 {
    pm::read(hdr + offset_of!(FlexPoolHdr, next_pool_hdr) as u64)
}

fn fa_hdr_of(hdr: u64) -> u64 {
    hdr + offset_of!(FlexPoolHdr, fa_hdr) as u64
}

impl FlexFixedAllocator {
    /// The first pool's header lives in the lane's region header; later
    /// pools get theirs from the variable allocator.
    pub(crate) fn new(
        pool_addr: u64,
        hdr_addr: u64,
        obj_size: u32,
        pool_size: u64,
        create: bool,
        flusher: &dyn crate::tx::FlushCtx,
    ) -> FlexFixedAllocator {
        debug_assert_eq!(pool_addr & (CHUNK_SIZE - 1), 0);

        let max_objs_per_pool = (pool_size / obj_size as u64) as i64;
        let num_allocated;
        if create {
            pm::write(hdr_addr + offset_of!(FlexPoolHdr, pool_base) as u64, pool_addr);
            pm::write(hdr_addr + offset_of!(FlexPoolHdr, next_pool_hdr) as u64, pm::NULL);
            num_allocated = 0;
        } else {
            num_allocated = FixedAllocator::num_allocated_at(fa_hdr_of(hdr_addr));
        }

        let mut flex = FlexFixedAllocator {
            pm: hdr_addr,
            obj_size,
            pool_size,
            max_objs_per_pool,
            fa_pools: HashMap::new(),
            last_hdr_scanned: hdr_addr,
        };

        if num_allocated < max_objs_per_pool {
            let fa = FixedAllocator::new(
                pool_addr,
                fa_hdr_of(hdr_addr),
                obj_size,
                pool_size,
                create,
                flusher,
            );
            flex.fa_pools.insert(
                pool_addr,
                FaInfo {
                    fa,
                    hdr: hdr_addr,
                    prev: pm::NULL,
                    num_allocated: fa.num_allocated(),
                },
            );
        }
        flex
    }

    pub(crate) fn hdr_addr(&self) -> u64 {
        self.pm
    }

    /// Returns one small chunk. The caller wraps this in an inner
    /// independent transaction, so all writes here commit with it.
    pub(crate) fn alloc(
        &mut self,
        tx: &TransactionImpl,
        parent: &Allocator,
        variable: &mut VariableAllocator,
    ) -> Result<u64> {
        let first = self.fa_pools.iter().next().map(|(&k, &v)| (k, v));
        if let Some((pool_base, mut info)) = first {
            let addr = info.fa.alloc(tx)?;
            info.num_allocated = info.fa.num_allocated();
            if info.num_allocated == self.max_objs_per_pool {
                // Full pool leaves DRAM tracking; this runs inside an inner
                // transaction that commits, so no restore is needed.
                self.fa_pools.remove(&pool_base);
            } else {
                self.fa_pools.insert(pool_base, info);
            }
            return Ok(addr);
        }

        // Scan forward through the persistent pool chain.
        loop {
            let hdr = next_pool_of(self.last_hdr_scanned);
            if hdr == pm::NULL {
                break;
            }
            let prev = self.last_hdr_scanned;
            self.last_hdr_scanned = hdr;

            let num_allocated = FixedAllocator::num_allocated_at(fa_hdr_of(hdr));
            if num_allocated < self.max_objs_per_pool {
                let fa = FixedAllocator::new(
                    pool_base_of(hdr),
                    fa_hdr_of(hdr),
                    self.obj_size,
                    self.pool_size,
                    false,
                    tx,
                );
                let addr = fa.alloc(tx)?;
                let num_allocated = fa.num_allocated();
                if num_allocated < self.max_objs_per_pool {
                    self.fa_pools.insert(
                        pool_base_of(hdr),
                        FaInfo {
                            fa,
                            hdr,
                            prev,
                            num_allocated,
                        },
                    );
                }
                return Ok(addr);
            }
        }

        let info = self.add_new_pool(tx, parent, variable)?;
        let addr = info.fa.alloc(tx)?;
        let mut info = info;
        info.num_allocated = info.fa.num_allocated();
        self.fa_pools.insert(pool_base_of(info.hdr), info);
        Ok(addr)
    }

    fn add_new_pool(
        &mut self,
        tx: &TransactionImpl,
        parent: &Allocator,
        variable: &mut VariableAllocator,
    ) -> Result<FaInfo> {
        // The header comes from the free-form allocator; the pool itself is
        // a fresh 2 MiB chunk.
        let hdr = variable.alloc(tx, parent, FLEX_POOL_HDR_SIZE)?;
        let pool_addr = parent.alloc_chunks_locked(tx, 1)?;

        pm::write(hdr + offset_of!(FlexPoolHdr, pool_base) as u64, pool_addr);
        pm::write(hdr + offset_of!(FlexPoolHdr, next_pool_hdr) as u64, pm::NULL);
        let fa = FixedAllocator::new(pool_addr, fa_hdr_of(hdr), self.obj_size, self.pool_size, true, tx);
        tx.flush(hdr, FLEX_POOL_HDR_SIZE);

        let link = self.last_hdr_scanned + offset_of!(FlexPoolHdr, next_pool_hdr) as u64;
        tx.write(link, hdr)?;

        let info = FaInfo {
            fa,
            hdr,
            prev: self.last_hdr_scanned,
            num_allocated: 0,
        };
        self.last_hdr_scanned = hdr;
        Ok(info)
    }

    /// Commit-time free of one small chunk. Empties whole pools back to the
    /// chunk pool, except the first pool whose header is not dynamically
    /// allocated.
    pub(crate) fn free(
        &mut self,
        tx: &TransactionImpl,
        parent: &Allocator,
        variable: &mut VariableAllocator,
        addr: u64,
    ) -> Result<()> {
        let pool_base = addr & CHUNK_MASK;

        let (hdr, prev, fa, num_allocated) = match self.fa_pools.get(&pool_base) {
            Some(info) => (
                info.hdr,
                info.prev,
                Some(info.fa),
                FixedAllocator::num_allocated_at(fa_hdr_of(info.hdr)) - 1,
            ),
            None => {
                // Walk the persistent chain for the owning pool.
                let mut prev = pm::NULL;
                let mut hdr = self.pm;
                while hdr != pm::NULL {
                    if pool_base_of(hdr) == pool_base {
                        break;
                    }
                    prev = hdr;
                    hdr = next_pool_of(hdr);
                }
                debug_assert_ne!(hdr, pm::NULL);
                (
                    hdr,
                    prev,
                    None,
                    FixedAllocator::num_allocated_at(fa_hdr_of(hdr)) - 1,
                )
            }
        };

        if num_allocated == 0 && hdr != self.pm {
            // The whole 2 MiB pool empties; no need to free the 4 KiB
            // chunk individually.
            tx.write(prev + offset_of!(FlexPoolHdr, next_pool_hdr) as u64, next_pool_of(hdr))?;

            let next = next_pool_of(hdr);
            if next != pm::NULL {
                let next_pool = pool_base_of(next);
                if let Some(info) = self.fa_pools.get_mut(&next_pool) {
                    info.prev = prev;
                }
            }
            if self.last_hdr_scanned == hdr {
                self.last_hdr_scanned = prev;
            }

            parent.free_chunks_locked(tx, pool_base, 1)?;
            variable.free(tx, parent, hdr, FLEX_POOL_HDR_SIZE)?;

            // Restoring this DRAM entry on a late abort would need the full
            // info rebuilt; aborts at this stage are rare, so the pool is
            // simply dropped from tracking.
            self.fa_pools.remove(&pool_base);
        } else {
            let fa = match fa {
                Some(fa) => fa,
                None => FixedAllocator::new(
                    pool_base,
                    fa_hdr_of(hdr),
                    self.obj_size,
                    self.pool_size,
                    false,
                    tx,
                ),
            };
            fa.free_contiguous(tx, addr, 1)?;
            if !self.fa_pools.contains_key(&pool_base) {
                parent.register_dram_restore(
                    tx,
                    FixSizeAllocator::owning_lane(addr),
                    DramRestoreTarget::Flex,
                    self.pm,
                    pool_base,
                    true,
                );
                self.fa_pools.insert(
                    pool_base,
                    FaInfo {
                        fa,
                        hdr,
                        prev,
                        num_allocated,
                    },
                );
            } else if let Some(info) = self.fa_pools.get_mut(&pool_base) {
                info.num_allocated = num_allocated;
            }
        }
        Ok(())
    }

    pub(crate) fn remove_dram_pool(&mut self, pool_base: u64) {
        self.fa_pools.remove(&pool_base);
    }

    pub(crate) fn reserved_bytes(&self) -> u64 {
        let mut pools = 0u64;
        let mut hdr = self.pm;
        while hdr != pm::NULL {
            pools += 1;
            hdr = next_pool_of(hdr);
        }
        pools * self.pool_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_geometry() {
        assert_eq!(bitmap_ints(16), 8);
        assert_eq!(alloc_offset(8, 16), 64);
        assert_eq!(max_spots(16), 252);
        assert_eq!(bitmap_ints(64), 2);
        assert_eq!(alloc_offset(2, 64), 64);
        assert_eq!(max_spots(64), 63);
    }
}
