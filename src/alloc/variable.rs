//! Variable-size allocator over 2 MiB chunks.
//!
//! Each chunk carries a 24-byte header and a singly-linked list of free
//! spans threaded through the spans themselves. The header caches the
//! largest contiguous span so scans can skip chunks that cannot satisfy a
//! request. Requests larger than a chunk take a dedicated multi-chunk path;
//! near-chunk ("borderline") sizes bypass this allocator entirely and go
//! straight to the chunk pool.

use std::collections::HashSet;
use std::mem::offset_of;

use crate::config::CHUNK_SIZE;
use crate::error::Result;
use crate::region::pm;
use crate::tx::{IndependentTransaction, TransactionImpl};

use super::{Allocator, DramRestoreTarget};

/// Chunk-header size.
pub(crate) const HEADER_SIZE: u64 = 24;
/// Smallest serviced request; also the free-span bookkeeping size.
pub(crate) const MIN_ALLOC_BYTES: u64 = 8;

const CHUNK_MASK: u64 = !(CHUNK_SIZE - 1);

/// Persistent per-chunk header.
#[derive(Copy, Clone)]
#[repr(C)]
struct FreeFormChunk {
    next_chunk: u64,
    free_space: u32,
    free_list: u32,
    max_cont_space: u32,
    my_id: u32,
}

const _: () = assert!(std::mem::size_of::<FreeFormChunk>() as u64 == HEADER_SIZE);

/// First 8 bytes of every free span: offset of the next span and the size
/// of this one.
#[repr(C)]
#[derive(Copy, Clone)]
struct FreeSpot {
    next: u32,
    size: u32,
}

/// Persistent region header: head of the chunk list.
#[repr(C)]
pub(crate) struct VariableHdr {
    start_chunk: u64,
}

#[derive(Copy, Clone)]
struct Chunk {
    base: u64,
}

impl Chunk {
    fn f(self, off: usize) -> u64 {
        self.base + off as u64
    }

    fn next_chunk(self) -> u64 {
        pm::read(self.f(offset_of!(FreeFormChunk, next_chunk)))
    }

    fn free_space(self) -> u32 {
        pm::read(self.f(offset_of!(FreeFormChunk, free_space)))
    }

    fn free_list(self) -> u32 {
        pm::read(self.f(offset_of!(FreeFormChunk, free_list)))
    }

    fn max_cont_space(self) -> u32 {
        pm::read(self.f(offset_of!(FreeFormChunk, max_cont_space)))
    }

    fn spot_addr(self, offset: u32) -> u64 {
        self.base + offset as u64
    }

    fn has_space(self) -> bool {
        self.max_cont_space() as u64 >= MIN_ALLOC_BYTES
    }

    /// Initialises a fresh chunk with one free span covering everything
    /// past the header, less `used` bytes claimed at the tail.
    fn init(self, tx: &TransactionImpl, alloc_id: u32, used: u32) {
        let free_space = (CHUNK_SIZE - HEADER_SIZE) as u32 - used;
        pm::write(
            self.base,
            FreeFormChunk {
                next_chunk: pm::NULL,
                free_space,
                free_list: HEADER_SIZE as u32,
                max_cont_space: free_space,
                my_id: alloc_id,
            },
        );
        pm::write(
            self.spot_addr(HEADER_SIZE as u32),
            FreeSpot {
                next: 0,
                size: free_space,
            },
        );
        tx.flush(self.base, HEADER_SIZE + std::mem::size_of::<FreeSpot>() as u64);
    }

    /// Recomputes the cached maximum contiguous span from the free list.
    fn find_max_cont_space(self, tx: &TransactionImpl) -> Result<()> {
        let mut space = 0u32;
        let mut offset = self.free_list();
        while offset != 0 {
            let spot: FreeSpot = pm::read(self.spot_addr(offset));
            if spot.size > space {
                space = spot.size;
            }
            offset = spot.next;
        }
        if self.max_cont_space() != space {
            tx.write(self.f(offset_of!(FreeFormChunk, max_cont_space)), space)?;
        }
        Ok(())
    }

    /// Carves `sz` bytes out of this chunk, preferring the tail of a span
    /// so the free-list head stays untouched.
    fn alloc(self, tx: &TransactionImpl, sz: u64) -> Result<Option<u64>> {
        if sz > self.max_cont_space() as u64 {
            return Ok(None);
        }
        let sz32 = sz as u32;
        let mut prev_spot_addr = self.f(offset_of!(FreeFormChunk, free_list));
        let mut offset = self.free_list();

        loop {
            debug_assert_ne!(offset, 0);
            let spot_addr = self.spot_addr(offset);
            let spot: FreeSpot = pm::read(spot_addr);
            if (spot.size as u64) < sz {
                prev_spot_addr = spot_addr;
                offset = spot.next;
                continue;
            }

            let addr;
            if spot.size as u64 - sz >= MIN_ALLOC_BYTES {
                // Allocate at the end of the span; only its size changes.
                let new_offset = offset + (spot.size - sz32);
                addr = self.spot_addr(new_offset);
                tx.write(
                    spot_addr + offset_of!(FreeSpot, size) as u64,
                    spot.size - sz32,
                )?;
            } else {
                // The span is consumed whole; unlink it. Its first 8 bytes
                // held our free-list record, so log them before handing the
                // space to the caller.
                addr = spot_addr;
                tx.write(prev_spot_addr, spot.next)?;
                tx.log(spot_addr, std::mem::size_of::<FreeSpot>())?;
            }

            let free_space = self.free_space() - sz32;
            tx.write(self.f(offset_of!(FreeFormChunk, free_space)), free_space)?;
            if spot.size == self.max_cont_space() {
                self.find_max_cont_space(tx)?;
            }
            return Ok(Some(addr));
        }
    }

    /// Returns a span, coalescing with the free-list head when adjacent.
    fn free(self, tx: &TransactionImpl, addr: u64, sz: u64) -> Result<()> {
        // free_space, free_list, and max_cont_space sit together.
        tx.log(self.f(offset_of!(FreeFormChunk, free_space)), 12)?;

        let addr_idx = (addr - self.base) as u32;
        let sz32 = sz as u32;
        let free_list = self.free_list();

        if free_list == 0 {
            // Previously full chunk.
            pm::write(self.f(offset_of!(FreeFormChunk, free_list)), addr_idx);
            let spot_addr = self.spot_addr(addr_idx);
            tx.log(spot_addr, std::mem::size_of::<FreeSpot>())?;
            pm::write(spot_addr, FreeSpot { next: 0, size: sz32 });
            pm::write(self.f(offset_of!(FreeFormChunk, max_cont_space)), sz32);
        } else if addr_idx + sz32 == free_list {
            // The freed span abuts the head; coalesce.
            let head: FreeSpot = pm::read(self.spot_addr(free_list));
            let new_size = head.size + sz32;
            pm::write(self.f(offset_of!(FreeFormChunk, free_list)), addr_idx);
            let spot_addr = self.spot_addr(addr_idx);
            tx.log(spot_addr, std::mem::size_of::<FreeSpot>())?;
            pm::write(
                spot_addr,
                FreeSpot {
                    next: head.next,
                    size: new_size,
                },
            );
            if new_size > self.max_cont_space() {
                pm::write(self.f(offset_of!(FreeFormChunk, max_cont_space)), new_size);
            }
        } else {
            // Push to the front of the free list.
            let spot_addr = self.spot_addr(addr_idx);
            tx.log(spot_addr, std::mem::size_of::<FreeSpot>())?;
            pm::write(
                spot_addr,
                FreeSpot {
                    next: free_list,
                    size: sz32,
                },
            );
            pm::write(self.f(offset_of!(FreeFormChunk, free_list)), addr_idx);
            if sz32 > self.max_cont_space() {
                pm::write(self.f(offset_of!(FreeFormChunk, max_cont_space)), sz32);
            }
        }

        pm::write(
            self.f(offset_of!(FreeFormChunk, free_space)),
            self.free_space() + sz32,
        );
        tx.flush(self.base, HEADER_SIZE);
        Ok(())
    }
}

/// DRAM state of one lane's variable allocator.
pub(crate) struct VariableAllocator {
    hdr: u64,
    my_id: u32,
    free_chunks: HashSet<u64>,
    chunk_to_scan: u64,
    last_chunk_scanned: u64,
}

impl VariableAllocator {
    pub(crate) fn new(hdr: u64, alloc_id: u32, create: bool) -> VariableAllocator {
        if create {
            pm::write(hdr + offset_of!(VariableHdr, start_chunk) as u64, pm::NULL);
        }
        VariableAllocator {
            hdr,
            my_id: alloc_id,
            free_chunks: HashSet::new(),
            chunk_to_scan: pm::read(hdr + offset_of!(VariableHdr, start_chunk) as u64),
            last_chunk_scanned: pm::NULL,
        }
    }

    pub(crate) fn hdr_addr(&self) -> u64 {
        self.hdr
    }

    fn start_chunk_addr(&self) -> u64 {
        self.hdr + offset_of!(VariableHdr, start_chunk) as u64
    }

    fn start_chunk(&self) -> u64 {
        pm::read(self.start_chunk_addr())
    }

    /// The lane that owns the chunk containing `addr`.
    pub(crate) fn owning_lane(addr: u64) -> u32 {
        let chunk_base = addr & CHUNK_MASK;
        pm::read(chunk_base + offset_of!(FreeFormChunk, my_id) as u64)
    }

    /// Acquires a fresh chunk inside an inner independent transaction so
    /// the list linkage is permanent regardless of the outer transaction.
    fn alloc_chunk(&mut self, tx: &TransactionImpl, parent: &Allocator) -> Result<Chunk> {
        let inner = IndependentTransaction::begin(tx.db())?;
        let base = parent.alloc_chunks_locked(inner.tx(), 1)?;
        let chunk = Chunk { base };
        chunk.init(inner.tx(), self.my_id, 0);

        if self.start_chunk() == pm::NULL {
            inner.tx().write(self.start_chunk_addr(), base)?;
        } else {
            debug_assert_ne!(self.last_chunk_scanned, pm::NULL);
            let link = self.last_chunk_scanned + offset_of!(FreeFormChunk, next_chunk) as u64;
            inner.tx().write(link, base)?;
        }
        self.last_chunk_scanned = base;

        inner.commit()?;
        Ok(chunk)
    }

    /// Contiguous multi-chunk allocation for the oversized path. Runs in
    /// the outer transaction: a user abort must return these chunks.
    fn alloc_chunks(
        &mut self,
        tx: &TransactionImpl,
        parent: &Allocator,
        num: u64,
        used: u32,
    ) -> Result<Chunk> {
        debug_assert!(num > 1 && used > 0);
        let base = parent.alloc_chunks_locked(tx, num)?;
        let chunk = Chunk { base };
        chunk.init(tx, self.my_id, used);

        // Catch the scan cursor up so the list link lands at the true tail.
        while self.chunk_to_scan != pm::NULL {
            let c = Chunk {
                base: self.chunk_to_scan,
            };
            if c.has_space() {
                self.free_chunks.insert(c.base);
            }
            self.last_chunk_scanned = self.chunk_to_scan;
            self.chunk_to_scan = c.next_chunk();
        }

        if self.start_chunk() == pm::NULL {
            tx.write(self.start_chunk_addr(), base)?;
        } else {
            debug_assert_ne!(self.last_chunk_scanned, pm::NULL);
            let link = self.last_chunk_scanned + offset_of!(FreeFormChunk, next_chunk) as u64;
            tx.write(link, base)?;
        }
        self.last_chunk_scanned = base;
        Ok(chunk)
    }

    fn alloc_large(&mut self, tx: &TransactionImpl, parent: &Allocator, sz: u64) -> Result<u64> {
        let tot_size = pm::align_up(sz, CHUNK_SIZE);
        let num_chunks = tot_size / CHUNK_SIZE;
        let used = (sz - (num_chunks - 1) * CHUNK_SIZE) as u32;

        let chunk = self.alloc_chunks(tx, parent, num_chunks, used)?;
        self.free_chunks.insert(chunk.base);

        // If the outer transaction aborts, this chunk is gone again.
        parent.register_dram_restore(
            tx,
            self.my_id,
            DramRestoreTarget::Variable,
            self.hdr,
            chunk.base,
            true,
        );

        Ok(chunk.base + CHUNK_SIZE - used as u64)
    }

    pub(crate) fn alloc(
        &mut self,
        tx: &TransactionImpl,
        parent: &Allocator,
        sz: u64,
    ) -> Result<u64> {
        if sz > CHUNK_SIZE {
            return self.alloc_large(tx, parent, sz);
        }

        // Known-space chunks first.
        let candidates: Vec<u64> = self.free_chunks.iter().copied().collect();
        for base in candidates {
            let chunk = Chunk { base };
            if let Some(addr) = chunk.alloc(tx, sz)? {
                if !chunk.has_space() {
                    parent.register_dram_restore(
                        tx,
                        self.my_id,
                        DramRestoreTarget::Variable,
                        self.hdr,
                        base,
                        false,
                    );
                    self.free_chunks.remove(&base);
                }
                return Ok(addr);
            }
        }

        // Extend the scanned prefix of the persistent list.
        while self.chunk_to_scan != pm::NULL {
            let chunk = Chunk {
                base: self.chunk_to_scan,
            };
            if chunk.has_space() {
                parent.register_dram_restore(
                    tx,
                    self.my_id,
                    DramRestoreTarget::Variable,
                    self.hdr,
                    chunk.base,
                    false,
                );
            }

            let addr = chunk.alloc(tx, sz)?;
            if chunk.has_space() {
                self.free_chunks.insert(chunk.base);
            }
            self.last_chunk_scanned = self.chunk_to_scan;
            self.chunk_to_scan = chunk.next_chunk();
            if let Some(addr) = addr {
                return Ok(addr);
            }
        }

        // Everything scanned; take a fresh chunk.
        let chunk = self.alloc_chunk(tx, parent)?;
        parent.register_dram_restore(
            tx,
            self.my_id,
            DramRestoreTarget::Variable,
            self.hdr,
            chunk.base,
            false,
        );
        let addr = chunk.alloc(tx, sz)?.expect("fresh chunk must satisfy request");
        if chunk.has_space() {
            self.free_chunks.insert(chunk.base);
        }
        Ok(addr)
    }

    /// Commit-time free. Whole-chunk reclamation returns the chunk to the
    /// pool; the pool lock is already held by the commit callback.
    pub(crate) fn free(
        &mut self,
        tx: &TransactionImpl,
        parent: &Allocator,
        addr: u64,
        sz: u64,
    ) -> Result<()> {
        let chunk_base = addr & CHUNK_MASK;
        let mut sz = sz;

        if sz > CHUNK_SIZE {
            let tot_size = pm::align_up(sz, CHUNK_SIZE);
            let num_chunks = tot_size / CHUNK_SIZE;
            // Chunks past the first go straight back to the pool.
            parent.free_chunks_locked(tx, chunk_base + CHUNK_SIZE, num_chunks - 1)?;
            sz -= (num_chunks - 1) * CHUNK_SIZE;
        }

        let chunk = Chunk { base: chunk_base };
        let was_full = chunk.free_list() == 0;
        chunk.free(tx, addr, sz)?;

        if chunk.free_space() as u64 == CHUNK_SIZE - HEADER_SIZE {
            parent.register_dram_restore(
                tx,
                self.my_id,
                DramRestoreTarget::Variable,
                self.hdr,
                chunk_base,
                false,
            );
            self.free_chunks.remove(&chunk_base);
            self.unlink(tx, chunk_base)?;

            // Preserve the list link for rollback of this free.
            tx.log(chunk_base + offset_of!(FreeFormChunk, next_chunk) as u64, 8)?;
            parent.free_chunks_locked(tx, chunk_base, 1)?;
        } else if was_full {
            parent.register_dram_restore(
                tx,
                self.my_id,
                DramRestoreTarget::Variable,
                self.hdr,
                chunk_base,
                true,
            );
            self.free_chunks.insert(chunk_base);
        }
        Ok(())
    }

    fn unlink(&mut self, tx: &TransactionImpl, target: u64) -> Result<()> {
        let mut prev = pm::NULL;
        let mut temp = self.start_chunk();
        if temp == target {
            tx.write(self.start_chunk_addr(), Chunk { base: target }.next_chunk())?;
        } else {
            while temp != pm::NULL {
                if temp == target {
                    let link = prev + offset_of!(FreeFormChunk, next_chunk) as u64;
                    tx.write(link, Chunk { base: target }.next_chunk())?;
                    break;
                }
                prev = temp;
                temp = Chunk { base: temp }.next_chunk();
            }
        }

        if self.last_chunk_scanned == target {
            self.last_chunk_scanned = prev;
        }
        if self.chunk_to_scan == target {
            self.chunk_to_scan = Chunk { base: target }.next_chunk();
        }
        Ok(())
    }

    /// Abort-path restore of a chunk into the has-space set.
    pub(crate) fn restore_dram_chunk(&mut self, chunk: u64) {
        // If the removal that emptied the scan state is rolled back, the
        // scan cursors must point at something real again.
        if self.start_chunk() != pm::NULL && self.last_chunk_scanned == pm::NULL {
            let mut prev = self.start_chunk();
            let mut temp = Chunk { base: prev }.next_chunk();
            while temp != pm::NULL {
                if temp == chunk {
                    break;
                }
                prev = temp;
                temp = Chunk { base: temp }.next_chunk();
            }
            self.last_chunk_scanned = prev;
        }

        if (Chunk { base: chunk }).has_space() {
            self.free_chunks.insert(chunk);
        }
    }

    /// Abort-path removal of a chunk from the has-space set.
    pub(crate) fn remove_dram_chunk(&mut self, chunk: u64) {
        if self.last_chunk_scanned == chunk {
            let mut prev = self.start_chunk();
            let mut temp = self.start_chunk();
            while temp != pm::NULL {
                if temp == chunk {
                    break;
                }
                prev = temp;
                temp = Chunk { base: temp }.next_chunk();
            }
            self.last_chunk_scanned = prev;
        }
        self.free_chunks.remove(&chunk);
    }

    pub(crate) fn reserved_bytes(&self) -> u64 {
        let mut chunks = 0u64;
        let mut curr = self.start_chunk();
        while curr != pm::NULL {
            chunks += 1;
            curr = Chunk { base: curr }.next_chunk();
        }
        chunks * CHUNK_SIZE
    }

    pub(crate) fn used_bytes(&self) -> u64 {
        let mut free_space = 0u64;
        let mut chunks = 0u64;
        let mut curr = self.start_chunk();
        while curr != pm::NULL {
            free_space += Chunk { base: curr }.free_space() as u64;
            chunks += 1;
            curr = Chunk { base: curr }.next_chunk();
        }
        chunks * CHUNK_SIZE - free_space
    }
}

/// Whether a request is "borderline": so close to a whole number of chunks
/// that the variable allocator would waste the remainder. These go straight
/// through the chunk pool.
pub(crate) fn is_borderline(sz: u64) -> bool {
    const THRESHOLD: u64 = CHUNK_SIZE - (HEADER_SIZE + MIN_ALLOC_BYTES);
    let m = sz % CHUNK_SIZE;
    m == 0 || m > THRESHOLD
}

/// Direct chunk-pool allocation for borderline sizes. No inner transaction:
/// a user abort must leave no trace of the pages.
pub(crate) fn chunk_alloc(tx: &TransactionImpl, parent: &Allocator, sz: u64) -> Result<u64> {
    let tot_size = pm::align_up(sz, CHUNK_SIZE);
    parent.alloc_chunks_locked(tx, tot_size / CHUNK_SIZE)
}

/// Commit-time free of a borderline allocation.
pub(crate) fn chunk_free(
    tx: &TransactionImpl,
    parent: &Allocator,
    addr: u64,
    sz: u64,
) -> Result<()> {
    debug_assert_eq!(addr % CHUNK_SIZE, 0);
    let tot_size = pm::align_up(sz, CHUNK_SIZE);
    parent.free_chunks_locked(tx, addr, tot_size / CHUNK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borderline_detection() {
        assert!(is_borderline(CHUNK_SIZE));
        assert!(is_borderline(2 * CHUNK_SIZE));
        assert!(is_borderline(CHUNK_SIZE - 8));
        assert!(!is_borderline(CHUNK_SIZE - 32));
        assert!(!is_borderline(1024));
        assert!(is_borderline(CHUNK_SIZE + CHUNK_SIZE - 16));
    }
}
