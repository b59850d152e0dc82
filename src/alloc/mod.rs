//! The allocator stack.
//!
//! A 2 MiB chunk pool feeds `num_allocators` independent lanes
//! (`AllocatorUnit`), each composing a variable-size allocator, a set of
//! fixed-size allocators, and a direct chunk path. A transaction binds to
//! one lane for its lifetime via a per-lane try-lock; frees are deferred to
//! commit and routed back to the owning lane.

#![allow(unsafe_code)]

pub(crate) mod fixed;
pub(crate) mod fixsize;
pub(crate) mod variable;

use std::cell::{RefCell, UnsafeCell};
use std::collections::{BTreeMap, HashMap};
use std::mem::offset_of;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::{CHUNK_SIZE, MAX_ALLOCATORS};
use crate::error::{GraphError, Result};
use crate::region::pm;
use crate::tx::{FlushCtx, IndependentTransaction, TransactionImpl};

use fixed::FixedAllocator;
use fixsize::{FixSizeAllocator, FlexFixedAllocator};
use variable::VariableAllocator;

/// The object sizes served by dedicated fixed-size lanes.
pub(crate) const FIXED_SIZES: [u32; 6] = [16, 24, 32, 40, 48, 64];
const NUM_FIXED_SIZES: usize = FIXED_SIZES.len();

fn fixed_size_index(size: u64) -> Option<usize> {
    FIXED_SIZES.iter().position(|&s| s as u64 == size)
}

/// Persistent header of one allocator lane, stored in the graph header (or
/// allocated from lane 0 for the other lanes).
#[allow(dead_code)] // accessed through field offsets
#[repr(C)]
pub(crate) struct UnitHdr {
    my_id: u32,
    _pad: u32,
    pm_base: u64,
    freeform_hdr: variable::VariableHdr,
    flex_hdr: fixsize::FlexPoolHdr,
    fixsize_hdr: [fixsize::FixSizeHdr; NUM_FIXED_SIZES],
}

/// Size of a lane header as allocated from lane 0.
pub(crate) const UNIT_HDR_SIZE: u64 = std::mem::size_of::<UnitHdr>() as u64;

/// Persistent header of the whole allocator, embedded in the graph header.
#[allow(dead_code)] // accessed through field offsets
#[repr(C)]
pub(crate) struct AllocatorHdr {
    chunks_hdr: [u8; fixed::FIXED_HDR_SIZE as usize],
    num_instances: u32,
    _pad: u32,
    unit_hdr0: UnitHdr,
    unit_hdrs: [u64; MAX_ALLOCATORS as usize],
}

/// One allocator lane: dispatches a request to the right sub-allocator.
pub(crate) struct AllocatorUnit {
    variable: VariableAllocator,
    flex: FlexFixedAllocator,
    fixsize: Vec<FixSizeAllocator>,
}

impl AllocatorUnit {
    fn new(
        pool_addr: u64,
        hdr_addr: u64,
        alloc_id: u32,
        create: bool,
        flusher: &dyn FlushCtx,
    ) -> AllocatorUnit {
        if create {
            pm::write(hdr_addr + offset_of!(UnitHdr, my_id) as u64, alloc_id);
            pm::write(hdr_addr + offset_of!(UnitHdr, pm_base) as u64, pool_addr);
            flusher.flush_range(hdr_addr, UNIT_HDR_SIZE);
        }
        debug_assert_eq!(
            pm::read::<u32>(hdr_addr + offset_of!(UnitHdr, my_id) as u64),
            alloc_id
        );
        let pm_base: u64 = pm::read(hdr_addr + offset_of!(UnitHdr, pm_base) as u64);

        let variable = VariableAllocator::new(
            hdr_addr + offset_of!(UnitHdr, freeform_hdr) as u64,
            alloc_id,
            create,
        );
        let flex = FlexFixedAllocator::new(
            pm_base,
            hdr_addr + offset_of!(UnitHdr, flex_hdr) as u64,
            crate::config::SMALL_CHUNK_SIZE as u32,
            CHUNK_SIZE,
            create,
            flusher,
        );
        let fixsize = FIXED_SIZES
            .iter()
            .enumerate()
            .map(|(i, &sz)| {
                FixSizeAllocator::new(
                    hdr_addr
                        + offset_of!(UnitHdr, fixsize_hdr) as u64
                        + (i * std::mem::size_of::<fixsize::FixSizeHdr>()) as u64,
                    sz,
                    alloc_id,
                    create,
                )
            })
            .collect();

        AllocatorUnit {
            variable,
            flex,
            fixsize,
        }
    }

    fn alloc(&mut self, tx: &TransactionImpl, parent: &Allocator, size: u64) -> Result<u64> {
        let size = size.max(variable::MIN_ALLOC_BYTES);

        if let Some(idx) = fixed_size_index(size) {
            let (fs, flex, var) = (&mut self.fixsize[idx], &mut self.flex, &mut self.variable);
            return fs.alloc(tx, parent, flex, var);
        }
        if variable::is_borderline(size) {
            return variable::chunk_alloc(tx, parent, size);
        }
        self.variable.alloc(tx, parent, size)
    }

    /// Recovers which lane owns an allocation, from the chunk headers.
    /// `None` means a borderline allocation owned by the chunk pool.
    fn owning_lane(addr: u64, size: u64) -> Option<u32> {
        let size = size.max(variable::MIN_ALLOC_BYTES);
        if fixed_size_index(size).is_some() {
            return Some(FixSizeAllocator::owning_lane(addr));
        }
        if variable::is_borderline(size) {
            return None;
        }
        Some(VariableAllocator::owning_lane(addr))
    }

    /// Commit-time drain of this lane's deferred frees.
    fn clean_free_list(
        &mut self,
        tx: &TransactionImpl,
        parent: &Allocator,
        list: &[FreeInfo],
    ) -> Result<()> {
        for info in list {
            let size = info.size.max(variable::MIN_ALLOC_BYTES);
            if let Some(idx) = fixed_size_index(size) {
                let (fs, flex, var) =
                    (&mut self.fixsize[idx], &mut self.flex, &mut self.variable);
                fs.free(tx, parent, flex, var, info.addr)?;
            } else if variable::is_borderline(size) {
                variable::chunk_free(tx, parent, info.addr, size)?;
            } else {
                self.variable.free(tx, parent, info.addr, size)?;
            }
        }
        Ok(())
    }

    fn used_bytes(&self) -> u64 {
        let mut used = 0u64;
        for fs in &self.fixsize {
            used += fs.used_bytes();
        }
        used + self.variable.used_bytes()
    }

    fn reserved_bytes(&self) -> u64 {
        self.variable.reserved_bytes() + self.flex.reserved_bytes()
    }

    fn health(&self) -> u32 {
        let mut used = 0u64;
        for fs in &self.fixsize {
            used += fs.used_bytes();
        }
        used += self.variable.used_bytes();
        let total = self.reserved_bytes();
        if total == 0 {
            100
        } else {
            (100 * used / total) as u32
        }
    }
}

/// Which DRAM set an abort callback must repair.
#[derive(Copy, Clone, Debug)]
pub(crate) enum DramRestoreTarget {
    /// The has-space set of the fixed-size lane for this object size.
    FixSize(u32),
    /// The has-space set of the variable allocator.
    Variable,
    /// The pool map of the flex allocator (removal only).
    Flex,
}

struct RestoreState {
    unit_id: u32,
    target: DramRestoreTarget,
    to_fix: RefCell<HashMap<u64, bool>>,
}

/// One deferred free: address plus the size the caller allocated with.
#[derive(Copy, Clone, Debug)]
struct FreeInfo {
    addr: u64,
    size: u64,
}

struct MultiFreeState {
    // Keyed by lane id; BTreeMap iteration gives the ascending lock order.
    per_lane: RefCell<BTreeMap<u32, Vec<FreeInfo>>>,
}

/// Try-lock binding a lane (or the chunk pool) to one transaction for the
/// transaction's lifetime.
struct OwnerLock {
    owner: AtomicU64,
}

const LOCK_ATTEMPTS: u32 = 3;
const ALLOC_BACKOFF: Duration = Duration::from_micros(1000);

impl OwnerLock {
    fn new() -> OwnerLock {
        OwnerLock {
            owner: AtomicU64::new(0),
        }
    }

    fn try_lock(&self, tx: &TransactionImpl) -> bool {
        let me = tx as *const TransactionImpl as u64;
        let old = self.owner.load(Ordering::Acquire);
        if old == me {
            return true;
        }
        if old == 0
            && self
                .owner
                .compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            // Released when the transaction finalizes, commit or abort.
            let key = self as *const OwnerLock as u64;
            let lock_addr = key;
            tx.register_finalize_callback(
                key,
                Rc::new(()),
                Box::new(move |_db, _tx| {
                    let lock = unsafe { &*(lock_addr as *const OwnerLock) };
                    lock.owner.store(0, Ordering::Release);
                    Ok(())
                }),
            );
            return true;
        }
        false
    }

    fn lock(&self, tx: &TransactionImpl) -> Result<()> {
        for _ in 0..LOCK_ATTEMPTS {
            if self.try_lock(tx) {
                return Ok(());
            }
            std::thread::sleep(ALLOC_BACKOFF);
        }
        Err(GraphError::LockTimeout)
    }
}

struct UnitSlot {
    lock: OwnerLock,
    unit: UnsafeCell<Option<AllocatorUnit>>,
}

/// The top-level allocator: the 2 MiB chunk pool plus the lane array.
pub(crate) struct Allocator {
    pm_base: u64,
    size: u64,
    hdr: u64,
    chunks: FixedAllocator,
    chunks_lock: OwnerLock,
    units: Vec<UnitSlot>,
}

// Lane state is only ever touched by the transaction that holds the lane's
// owner lock; the chunk pool is serialized the same way.
unsafe impl Sync for Allocator {}
unsafe impl Send for Allocator {}

impl Allocator {
    pub(crate) fn new(
        pool_addr: u64,
        pool_size: u64,
        hdr_addr: u64,
        instances: u32,
        params: &crate::tx::InitParams,
    ) -> Allocator {
        let chunks = FixedAllocator::new(
            pool_addr + CHUNK_SIZE,
            hdr_addr + offset_of!(AllocatorHdr, chunks_hdr) as u64,
            CHUNK_SIZE as u32,
            pool_size - CHUNK_SIZE,
            params.create,
            params,
        );

        let num_instances = if params.create {
            instances
        } else {
            pm::read(hdr_addr + offset_of!(AllocatorHdr, num_instances) as u64)
        };

        let mut units = Vec::with_capacity(num_instances as usize);
        for _ in 0..num_instances {
            units.push(UnitSlot {
                lock: OwnerLock::new(),
                unit: UnsafeCell::new(None),
            });
        }

        let allocator = Allocator {
            pm_base: pool_addr,
            size: pool_size,
            hdr: hdr_addr,
            chunks,
            chunks_lock: OwnerLock::new(),
            units,
        };

        let hdr0 = hdr_addr + offset_of!(AllocatorHdr, unit_hdr0) as u64;
        if params.create {
            pm::write(
                hdr_addr + offset_of!(AllocatorHdr, num_instances) as u64,
                instances,
            );
            pm::write(allocator.unit_hdr_slot(0), hdr0);
            params.flush(hdr_addr + offset_of!(AllocatorHdr, num_instances) as u64, 8);

            // Lane 0 seeds itself from the region's first chunk; the other
            // lanes are created by `init_extra_units` once the graph can
            // run a transaction.
            let unit0 = AllocatorUnit::new(pool_addr, hdr0, 0, true, params);
            unsafe { *allocator.units[0].unit.get() = Some(unit0) };
        } else {
            for i in 0..num_instances {
                let unit_hdr: u64 = pm::read(allocator.unit_hdr_slot(i));
                let pm_base: u64 = pm::read(unit_hdr + offset_of!(UnitHdr, pm_base) as u64);
                let unit = AllocatorUnit::new(pm_base, unit_hdr, i, false, params);
                unsafe { *allocator.units[i as usize].unit.get() = Some(unit) };
            }
        }

        allocator
    }

    fn unit_hdr_slot(&self, i: u32) -> u64 {
        self.hdr + offset_of!(AllocatorHdr, unit_hdrs) as u64 + i as u64 * 8
    }

    /// Creates lanes 1..n at graph-create time. Runs its own independent
    /// transaction; lane 0 must already exist.
    pub(crate) fn init_extra_units(&self, db: &crate::graph::GraphImpl) -> Result<()> {
        if self.units.len() <= 1 {
            return Ok(());
        }
        let inner = IndependentTransaction::begin(db)?;
        let tx = inner.tx();
        for i in 1..self.units.len() as u32 {
            // Lane headers past the first cannot live in the fixed-size
            // graph header; they come from lane 0's free-form space.
            let hdr = self.alloc(tx, UNIT_HDR_SIZE)?;
            tx.write(self.unit_hdr_slot(i), hdr)?;
            let pool = self.alloc_chunks_locked(tx, 1)?;
            let unit = AllocatorUnit::new(pool, hdr, i, true, tx);
            unsafe { *self.units[i as usize].unit.get() = Some(unit) };
        }
        inner.commit()
    }

    fn unit_mut(&self, id: u32) -> &mut AllocatorUnit {
        // Caller holds the lane's owner lock (or is single-threaded graph
        // bring-up); the lock protocol makes this exclusive.
        unsafe { (*self.units[id as usize].unit.get()).as_mut() }
            .expect("allocator lane not initialised")
    }

    fn get_allocator(&self, tx: &TransactionImpl) -> Result<u32> {
        for _ in 0..LOCK_ATTEMPTS {
            for (id, slot) in self.units.iter().enumerate() {
                if slot.lock.try_lock(tx) {
                    return Ok(id as u32);
                }
            }
            std::thread::sleep(ALLOC_BACKOFF);
        }
        Err(GraphError::LockTimeout)
    }

    /// Serves any size. Binds the transaction to a lane on first use.
    pub(crate) fn alloc(&self, tx: &TransactionImpl, size: u64) -> Result<u64> {
        let mut unit_id = tx.alloc_unit();
        if unit_id == -1 {
            unit_id = self.get_allocator(tx)? as i32;
            tx.set_alloc_unit(unit_id);
        }
        self.unit_mut(unit_id as u32).alloc(tx, self, size)
    }

    /// Defers the free to commit time, keyed to the owning lane recovered
    /// from the allocation's chunk header.
    pub(crate) fn free(&self, tx: &TransactionImpl, addr: u64, size: u64) {
        if addr == pm::NULL || size == 0 {
            return;
        }
        debug_assert!(addr >= self.pm_base && addr < self.pm_base + self.size);

        let lane = AllocatorUnit::owning_lane(addr, size);
        let key = self.hdr;
        let state = match tx.lookup_commit_state(key) {
            Some(state) => state
                .downcast::<MultiFreeState>()
                .ok()
                .expect("commit callback key collision"),
            None => {
                let state = Rc::new(MultiFreeState {
                    per_lane: RefCell::new(BTreeMap::new()),
                });
                let cb_state = Rc::clone(&state);
                tx.register_commit_callback(
                    key,
                    state.clone(),
                    Box::new(move |db, tx| {
                        db.allocator().clean_free_list(tx, &cb_state)
                    }),
                );
                state
            }
        };

        let mut per_lane = state.per_lane.borrow_mut();
        // Borderline frees have no lane of their own; ride along with any
        // lane already being cleaned, or lane 0.
        let lane = lane.unwrap_or_else(|| per_lane.keys().next().copied().unwrap_or(0));
        per_lane.entry(lane).or_default().push(FreeInfo { addr, size });
    }

    /// Commit callback: takes the chunk-pool lock, then each referenced
    /// lane in ascending id, then drains the per-lane lists.
    fn clean_free_list(&self, tx: &TransactionImpl, state: &MultiFreeState) -> Result<()> {
        let per_lane = state.per_lane.borrow();
        if per_lane.is_empty() {
            return Ok(());
        }
        self.chunks_lock.lock(tx)?;
        for &lane in per_lane.keys() {
            self.units[lane as usize].lock.lock(tx)?;
        }
        for (&lane, list) in per_lane.iter() {
            self.unit_mut(lane).clean_free_list(tx, self, list)?;
        }
        Ok(())
    }

    /// Allocates `num` contiguous chunks from the pool, taking the pool
    /// lock for the rest of this transaction.
    pub(crate) fn alloc_chunks_locked(&self, tx: &TransactionImpl, num: u64) -> Result<u64> {
        self.chunks_lock.lock(tx)?;
        self.chunks.alloc_contiguous(tx, num)
    }

    /// Returns chunks to the pool. The caller already holds the pool lock.
    pub(crate) fn free_chunks_locked(&self, tx: &TransactionImpl, base: u64, num: u64) -> Result<()> {
        self.chunks_lock.lock(tx)?;
        self.chunks.free_contiguous(tx, base, num)
    }

    /// Registers (once per chunk) a DRAM-set repair to run on abort.
    pub(crate) fn register_dram_restore(
        &self,
        tx: &TransactionImpl,
        unit_id: u32,
        target: DramRestoreTarget,
        key: u64,
        chunk: u64,
        remove: bool,
    ) {
        let state = match tx.lookup_abort_state(key) {
            Some(state) => state
                .downcast::<RestoreState>()
                .ok()
                .expect("abort callback key collision"),
            None => {
                let state = Rc::new(RestoreState {
                    unit_id,
                    target,
                    to_fix: RefCell::new(HashMap::new()),
                });
                let cb_state = Rc::clone(&state);
                tx.register_abort_callback(
                    key,
                    state.clone(),
                    Box::new(move |db, _tx| {
                        db.allocator().apply_dram_restore(&cb_state);
                        Ok(())
                    }),
                );
                state
            }
        };
        // If the same chunk changes several times in one transaction, the
        // rollback lands on the very first state; only record that one.
        state.to_fix.borrow_mut().entry(chunk).or_insert(remove);
    }

    fn apply_dram_restore(&self, state: &RestoreState) {
        let unit = self.unit_mut(state.unit_id);
        for (&chunk, &remove) in state.to_fix.borrow().iter() {
            match state.target {
                DramRestoreTarget::FixSize(sz) => {
                    let idx = fixed_size_index(sz as u64).expect("fixed size");
                    if remove {
                        unit.fixsize[idx].remove_dram_chunk(chunk);
                    } else {
                        unit.fixsize[idx].restore_dram_chunk(chunk);
                    }
                }
                DramRestoreTarget::Variable => {
                    if remove {
                        unit.variable.remove_dram_chunk(chunk);
                    } else {
                        unit.variable.restore_dram_chunk(chunk);
                    }
                }
                DramRestoreTarget::Flex => {
                    if remove {
                        unit.flex.remove_dram_pool(chunk);
                    }
                }
            }
        }
    }

    // ---- stats ------------------------------------------------------

    pub(crate) fn region_size(&self) -> u64 {
        self.chunks.region_size() + CHUNK_SIZE
    }

    pub(crate) fn used_bytes(&self) -> u64 {
        let mut used = self.chunks.used_bytes();
        for i in 0..self.units.len() as u32 {
            used += self.unit_mut(i).used_bytes();
        }
        used
    }

    pub(crate) fn occupancy(&self) -> u32 {
        let reserved = self.chunks.used_bytes() + CHUNK_SIZE;
        (100 * reserved / self.region_size()) as u32
    }

    pub(crate) fn health(&self) -> u32 {
        let mut health = 0u32;
        for i in 0..self.units.len() as u32 {
            health += self.unit_mut(i).health();
        }
        health / self.units.len() as u32
    }

    #[cfg(test)]
    pub(crate) fn pool_start(&self) -> u64 {
        self.pm_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::open_temp_graph;
    use crate::tx::{Transaction, TxMode};

    #[test]
    fn fixed_allocator_bump_and_lifo_reuse() {
        let (_dir, _cfg, graph) = open_temp_graph();

        // Carve a private pool out of the graph's allocator region so the
        // standalone fixed allocator lives in mapped memory.
        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        let txi = TransactionImpl::current().unwrap();
        let raw = graph.inner().allocator().alloc(txi, 1024 + 64).unwrap();
        let base = pm::align_up(raw, 32);
        let fa = FixedAllocator::new(base, base, 32, 1024, true, txi);

        // Header occupies an aligned 64 bytes; objects bump from there.
        let a1 = fa.alloc(txi).unwrap();
        let a2 = fa.alloc(txi).unwrap();
        let a3 = fa.alloc(txi).unwrap();
        assert_eq!(a1, base + 64);
        assert_eq!(a2, base + 96);
        assert_eq!(a3, base + 128);
        assert_eq!(fa.get_id(a1), 1);
        assert_eq!(fa.get_id(a3), 3);

        fa.free(txi, a1);
        fa.free(txi, a2);
        assert_eq!(fa.num_allocated(), 3, "frees are deferred to commit");
        tx.commit().unwrap();

        // The free list hands back the most recently freed object first.
        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        let txi = TransactionImpl::current().unwrap();
        assert_eq!(fa.num_allocated(), 1);
        assert_eq!(fa.alloc(txi).unwrap(), base + 96);
        assert_eq!(fa.alloc(txi).unwrap(), base + 64);
        // Freelist drained; the bump tail continues.
        assert_eq!(fa.alloc(txi).unwrap(), base + 160);
        tx.commit().unwrap();
    }

    #[test]
    fn fixed_allocator_free_slots_are_tagged() {
        let (_dir, _cfg, graph) = open_temp_graph();

        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        let txi = TransactionImpl::current().unwrap();
        let raw = graph.inner().allocator().alloc(txi, 1024 + 64).unwrap();
        let base = pm::align_up(raw, 64);
        let fa = FixedAllocator::new(base, base, 64, 1024, true, txi);

        let a1 = fa.alloc(txi).unwrap();
        let a2 = fa.alloc(txi).unwrap();
        fa.free(txi, a1);
        tx.commit().unwrap();

        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        assert!(fa.is_free(a1), "freelisted slot carries the tag bit");
        assert!(!fa.is_free(a2));
        // Live and freelisted slots tile the touched region exactly.
        let mut live = 0;
        let mut freed = 0;
        let mut cur = fa.begin();
        while cur < fa.end() {
            if fa.is_free(cur) {
                freed += 1;
            } else {
                live += 1;
            }
            cur = fa.next(cur);
        }
        assert_eq!(live, 1);
        assert_eq!(freed, 1);
        tx.commit().unwrap();
    }

    #[test]
    fn abort_returns_allocations() {
        let (_dir, _cfg, graph) = open_temp_graph();
        let allocator = graph.inner().allocator();

        // First transaction warms the lane (pools acquired through inner
        // independent transactions stay permanent).
        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        let txi = TransactionImpl::current().unwrap();
        let first = allocator.alloc(txi, 48).unwrap();
        tx.commit().unwrap();

        // An aborted allocation is rolled back and its slot reused.
        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        let txi = TransactionImpl::current().unwrap();
        let aborted = allocator.alloc(txi, 48).unwrap();
        drop(tx);

        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        let txi = TransactionImpl::current().unwrap();
        let retried = allocator.alloc(txi, 48).unwrap();
        assert_eq!(aborted, retried);
        assert_ne!(first, retried);
        tx.commit().unwrap();
    }

    #[test]
    fn variable_sizes_round_trip_through_lanes() {
        let (_dir, _cfg, graph) = open_temp_graph();
        let allocator = graph.inner().allocator();

        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        let txi = TransactionImpl::current().unwrap();
        let small = allocator.alloc(txi, 16).unwrap();
        let odd = allocator.alloc(txi, 100).unwrap();
        let large = allocator.alloc(txi, 3 * 1024 * 1024).unwrap();
        assert_eq!(AllocatorUnit::owning_lane(small, 16), Some(0));
        assert_eq!(AllocatorUnit::owning_lane(odd, 100), Some(0));
        tx.commit().unwrap();

        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        let txi = TransactionImpl::current().unwrap();
        allocator.free(txi, small, 16);
        allocator.free(txi, odd, 100);
        allocator.free(txi, large, 3 * 1024 * 1024);
        tx.commit().unwrap();

        // The small chunk that held the freed slot keeps serving its size.
        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        let txi = TransactionImpl::current().unwrap();
        let again = allocator.alloc(txi, 16).unwrap();
        assert_eq!(
            again & !(crate::config::SMALL_CHUNK_SIZE - 1),
            small & !(crate::config::SMALL_CHUNK_SIZE - 1)
        );
        tx.commit().unwrap();
    }

    #[test]
    fn borderline_sizes_use_whole_chunks() {
        let (_dir, _cfg, graph) = open_temp_graph();
        let allocator = graph.inner().allocator();

        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        let txi = TransactionImpl::current().unwrap();
        let chunk = allocator.alloc(txi, CHUNK_SIZE).unwrap();
        assert_eq!(chunk % CHUNK_SIZE, 0, "borderline allocations are chunk aligned");
        allocator.free(txi, chunk, CHUNK_SIZE);
        tx.commit().unwrap();
    }
}
