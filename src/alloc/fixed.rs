//! Fixed-size object allocator.
//!
//! A contiguous region filled by a bump pointer, with a free list threaded
//! through the first word of each freed object. The low bit of that word is
//! set on free so linear scanners can tell freed slots from live ones.

use std::cell::RefCell;
use std::mem::offset_of;
use std::rc::Rc;

use crate::error::{GraphError, Result};
use crate::region::pm;
use crate::tx::{FlushCtx, TransactionImpl};

/// Tag bit distinguishing freelisted slots from live objects.
pub(crate) const FREE_BIT: u64 = 0x1;

/// Persistent header of one fixed allocator.
#[derive(Copy, Clone)]
#[repr(C)]
pub(crate) struct FixedHdr {
    tail: u64,
    free_ptr: u64,
    num_allocated: i64,
    max_addr: u64,
    size: u32,
}

/// Size reserved for the header when it lives at the start of the pool.
pub(crate) const FIXED_HDR_SIZE: u64 = std::mem::size_of::<FixedHdr>() as u64;

fn alloc_offset(object_size: u64) -> u64 {
    pm::align_up(FIXED_HDR_SIZE, object_size)
}

/// DRAM handle to a fixed allocator whose header and pool live in mapped
/// persistent memory. Copyable so deferred-free callbacks can capture it.
#[derive(Copy, Clone, Debug)]
pub(crate) struct FixedAllocator {
    hdr: u64,
    pool_addr: u64,
    offset: u64,
}

impl FixedAllocator {
    /// Header at `hdr_addr`, object pool at `pool_addr`. When the two are
    /// equal the objects start past the (aligned) header.
    pub(crate) fn new(
        pool_addr: u64,
        hdr_addr: u64,
        object_size: u32,
        pool_size: u64,
        create: bool,
        flusher: &dyn FlushCtx,
    ) -> FixedAllocator {
        let inline_hdr = hdr_addr == pool_addr;
        let offset = if inline_hdr {
            let sz = if create {
                object_size
            } else {
                pm::read::<u32>(hdr_addr + offset_of!(FixedHdr, size) as u64)
            };
            alloc_offset(sz as u64)
        } else {
            0
        };

        if create {
            debug_assert!(object_size as usize >= std::mem::size_of::<u64>());
            debug_assert!(object_size & (object_size - 1) == 0);
            debug_assert!(pool_addr & (object_size as u64 - 1) == 0);

            pm::write(
                hdr_addr,
                FixedHdr {
                    tail: pool_addr + offset,
                    free_ptr: pm::NULL,
                    num_allocated: 0,
                    max_addr: pool_addr + pool_size,
                    size: object_size,
                },
            );
            flusher.flush_range(hdr_addr, FIXED_HDR_SIZE);
        }

        FixedAllocator {
            hdr: hdr_addr,
            pool_addr,
            offset,
        }
    }

    pub(crate) fn hdr_addr(&self) -> u64 {
        self.hdr
    }

    fn tail_addr(&self) -> u64 {
        self.hdr + offset_of!(FixedHdr, tail) as u64
    }

    fn free_addr(&self) -> u64 {
        self.hdr + offset_of!(FixedHdr, free_ptr) as u64
    }

    fn num_addr(&self) -> u64 {
        self.hdr + offset_of!(FixedHdr, num_allocated) as u64
    }

    fn tail(&self) -> u64 {
        pm::read(self.tail_addr())
    }

    fn free_ptr(&self) -> u64 {
        pm::read(self.free_addr())
    }

    pub(crate) fn object_size(&self) -> u32 {
        pm::read(self.hdr + offset_of!(FixedHdr, size) as u64)
    }

    fn max_addr(&self) -> u64 {
        pm::read(self.hdr + offset_of!(FixedHdr, max_addr) as u64)
    }

    pub(crate) fn num_allocated(&self) -> i64 {
        pm::read(self.num_addr())
    }

    /// Allocation count read straight from a header, without a handle.
    pub(crate) fn num_allocated_at(hdr_addr: u64) -> i64 {
        pm::read(hdr_addr + offset_of!(FixedHdr, num_allocated) as u64)
    }

    /// Returns an uninitialised object, reusing the freelist head first.
    pub(crate) fn alloc(&self, tx: &TransactionImpl) -> Result<u64> {
        // tail, free_ptr, and num_allocated sit together for one log call.
        tx.log(self.tail_addr(), 24)?;

        let size = self.object_size() as u64;
        let p;
        if self.free_ptr() != pm::NULL {
            p = self.free_ptr();
            // The freelist link occupies the object's first word.
            tx.log(p, 8)?;
            let word: u64 = pm::read(p);
            pm::write(p, word & !FREE_BIT);
            pm::write(self.free_addr(), word & !FREE_BIT);
        } else {
            if self.tail() + size > self.max_addr() {
                return Err(GraphError::BadAlloc);
            }
            p = self.tail();
            pm::write(self.tail_addr(), p + size);
        }

        pm::write(self.num_addr(), self.num_allocated() + 1);
        Ok(p)
    }

    /// Allocates `num` contiguous objects. Served only from the bump tail;
    /// the free list may hold non-contiguous slots.
    pub(crate) fn alloc_contiguous(&self, tx: &TransactionImpl, num: u64) -> Result<u64> {
        if num == 1 {
            return self.alloc(tx);
        }
        let size = self.object_size() as u64;
        if self.tail() + num * size > self.max_addr() {
            return Err(GraphError::BadAlloc);
        }
        let p = self.tail();
        tx.write(self.tail_addr(), p + num * size)?;
        tx.write(self.num_addr(), self.num_allocated() + num as i64)?;
        Ok(p)
    }

    /// Schedules `addr` to be pushed onto the free list at commit time.
    pub(crate) fn free(&self, tx: &TransactionImpl, addr: u64) {
        debug_assert!(addr >= self.pool_addr + self.offset && addr < self.tail());
        debug_assert!(addr % self.object_size() as u64 == 0);
        delayed_free(tx, *self, addr);
    }

    /// Pushes previously scheduled objects onto the free list, in free
    /// order, so the most recently freed object is reallocated first.
    pub(crate) fn clean_free_list(&self, tx: &TransactionImpl, list: &[u64]) -> Result<()> {
        tx.log(self.free_addr(), 16)?;
        let mut num_allocated = self.num_allocated();
        let mut free_ptr = self.free_ptr();

        for &p in list {
            pm::write(p, free_ptr | FREE_BIT);
            tx.flush(p, 8);
            free_ptr = p;
            num_allocated -= 1;
        }

        pm::write(self.free_addr(), free_ptr);
        pm::write(self.num_addr(), num_allocated);
        Ok(())
    }

    /// Commit-time free of `num` contiguous objects, preferring to retreat
    /// the bump tail when the span abuts it.
    pub(crate) fn free_contiguous(&self, tx: &TransactionImpl, addr: u64, num: u64) -> Result<()> {
        let size = self.object_size() as u64;
        debug_assert!(addr >= self.pool_addr + self.offset);
        debug_assert!(addr + size * num <= self.tail());
        debug_assert!(addr % size == 0);

        if addr + size * num == self.tail() {
            tx.write(self.tail_addr(), addr)?;
            tx.write(self.num_addr(), self.num_allocated() - num as i64)?;
        } else {
            tx.log(self.free_addr(), 16)?;
            let mut free_ptr = self.free_ptr();
            let mut p = addr;
            for _ in 0..num {
                pm::write(p, free_ptr | FREE_BIT);
                tx.flush(p, 8);
                free_ptr = p;
                p += size;
            }
            pm::write(self.free_addr(), free_ptr);
            pm::write(self.num_addr(), self.num_allocated() - num as i64);
        }
        Ok(())
    }

    // Linear iteration support for the node and edge table scans. Not
    // serialized; callers hold the table stripe lock.

    pub(crate) fn begin(&self) -> u64 {
        self.pool_addr + self.offset
    }

    pub(crate) fn end(&self) -> u64 {
        self.tail()
    }

    pub(crate) fn next(&self, curr: u64) -> u64 {
        curr + self.object_size() as u64
    }

    pub(crate) fn is_free(&self, curr: u64) -> bool {
        pm::read::<u64>(curr) & FREE_BIT != 0
    }

    /// 1-based ordinal of an object in this pool.
    pub(crate) fn get_id(&self, obj: u64) -> u64 {
        (obj - self.begin()) / self.object_size() as u64 + 1
    }

    /// Object address for a 1-based ordinal; `None` past the tail.
    pub(crate) fn by_id(&self, id: u64) -> Option<u64> {
        if id == 0 {
            return None;
        }
        let addr = self.begin() + (id - 1) * self.object_size() as u64;
        (addr < self.tail()).then_some(addr)
    }

    pub(crate) fn used_bytes(&self) -> u64 {
        self.object_size() as u64 * self.num_allocated().max(0) as u64
    }

    pub(crate) fn region_size(&self) -> u64 {
        self.max_addr() - self.pool_addr
    }

    pub(crate) fn occupancy(&self) -> u32 {
        let region = self.region_size();
        if region == 0 {
            100
        } else {
            (100 * self.used_bytes() / region) as u32
        }
    }

    pub(crate) fn health(&self) -> u32 {
        let spanned = self.tail() - self.pool_addr - self.offset;
        if spanned == 0 {
            100
        } else {
            (100 * self.used_bytes() / spanned) as u32
        }
    }
}

struct FixedFreeState {
    allocator: FixedAllocator,
    list: RefCell<Vec<u64>>,
}

fn delayed_free(tx: &TransactionImpl, allocator: FixedAllocator, addr: u64) {
    let key = allocator.hdr;
    if let Some(state) = tx.lookup_commit_state(key) {
        let state = state
            .downcast::<FixedFreeState>()
            .ok()
            .expect("commit callback key collision");
        state.list.borrow_mut().push(addr);
        return;
    }

    let state = Rc::new(FixedFreeState {
        allocator,
        list: RefCell::new(vec![addr]),
    });
    let cb_state = Rc::clone(&state);
    tx.register_commit_callback(
        key,
        state,
        Box::new(move |_db, tx| {
            let list = cb_state.list.borrow();
            cb_state.allocator.clean_free_list(tx, &list)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        assert_eq!(offset_of!(FixedHdr, tail), 0);
        assert_eq!(offset_of!(FixedHdr, free_ptr), 8);
        assert_eq!(offset_of!(FixedHdr, num_allocated), 16);
        assert_eq!(FIXED_HDR_SIZE, 40);
        assert_eq!(alloc_offset(32), 64);
        assert_eq!(alloc_offset(64), 64);
    }
}
