//! Transaction engine: persistent transaction table, per-transaction undo
//! journal, striped lock tracking, and the deferred callback chains that
//! coordinate allocator metadata, index mutations, and iterator
//! invalidation.

pub(crate) mod lock;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::atomic::{fence, AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::error::{GraphError, Result};
use crate::graph::{Graph, GraphImpl};
use crate::region::{pm, RangeSet};

/// Payload bytes carried by one 64-byte journal entry.
const JE_MAX_LEN: usize = 48;
/// High bit of a transaction-table slot marks the slot in use.
const ACTIVE: u64 = 1 << 63;
/// Journal entries store the low 56 bits of the transaction id.
const JE_ID_MASK: u64 = (1 << 56) - 1;

/// Transaction table entry (64 bytes in persistent memory).
#[repr(C, align(64))]
#[derive(Copy, Clone)]
struct TxSlot {
    tx_id: u64,
    jbegin: u64,
    jend: u64,
}

/// One 64-byte undo record: `{tx_id:56, len:8}`, target address, pre-image.
/// Accessed through field offsets; the type pins the layout.
#[repr(C)]
#[allow(dead_code)]
struct JournalEntry {
    id_len: u64,
    addr: u64,
    data: [u8; JE_MAX_LEN],
}

const _: () = assert!(std::mem::size_of::<TxSlot>() == 64);
const _: () = assert!(std::mem::size_of::<JournalEntry>() == 64);

#[inline]
fn je_pack(tx_id: u64, len: usize) -> u64 {
    (tx_id & JE_ID_MASK) | ((len as u64) << 56)
}

#[inline]
fn je_id(id_len: u64) -> u64 {
    id_len & JE_ID_MASK
}

#[inline]
fn je_len(id_len: u64) -> usize {
    (id_len >> 56) as usize
}

/// Flush/sync parameters shared by graph bring-up and recovery, before any
/// user transaction exists.
pub(crate) struct InitParams {
    pub(crate) create: bool,
    pub(crate) read_only: bool,
    pub(crate) msync_needed: bool,
    pub(crate) always_msync: bool,
    pub(crate) pending: RefCell<RangeSet>,
}

impl InitParams {
    pub(crate) fn flush(&self, addr: u64, len: u64) {
        flush_into(self.msync_needed, &self.pending, addr, len);
    }

    pub(crate) fn sync(&self) -> Result<()> {
        sync_pending(self.msync_needed, &self.pending)
    }
}

fn flush_into(msync_needed: bool, pending: &RefCell<RangeSet>, addr: u64, len: u64) {
    if msync_needed {
        pending.borrow_mut().add_page_span(addr, len);
    }
}

fn sync_pending(msync_needed: bool, pending: &RefCell<RangeSet>) -> Result<()> {
    if msync_needed {
        pending.borrow_mut().sync()
    } else {
        pending.borrow_mut().clear();
        Ok(())
    }
}

/// Sink for flush requests, implemented by both graph bring-up parameters
/// and live transactions so component constructors can serve either.
pub(crate) trait FlushCtx {
    /// Schedules `[addr, addr+len)` for durability at the next sync point.
    fn flush_range(&self, addr: u64, len: u64);
}

impl FlushCtx for InitParams {
    fn flush_range(&self, addr: u64, len: u64) {
        self.flush(addr, len);
    }
}

impl FlushCtx for TransactionImpl {
    fn flush_range(&self, addr: u64, len: u64) {
        self.flush(addr, len);
    }
}

/// Identity and journal extent of an allocated transaction slot.
#[derive(Copy, Clone, Debug)]
pub(crate) struct TxHandle {
    id: u64,
    index: i64,
    jbegin: u64,
    jend: u64,
}

impl TxHandle {
    fn dummy(jaddr: u64) -> TxHandle {
        // Read-only transactions get a degenerate extent so any attempted
        // log write overflows immediately.
        TxHandle {
            id: u64::MAX,
            index: -1,
            jbegin: jaddr,
            jend: jaddr,
        }
    }
}

/// Persistent transaction table plus per-transaction journal extents.
pub(crate) struct TransactionManager {
    tx_table: u64,
    journal_addr: u64,
    cur_tx_id: AtomicU64,
    max_transactions: u64,
    extent_size: u64,
}

impl TransactionManager {
    pub(crate) fn new(
        table_addr: u64,
        table_size: u64,
        journal_addr: u64,
        journal_size: u64,
        params: &InitParams,
    ) -> Result<TransactionManager> {
        let max_transactions = table_size / std::mem::size_of::<TxSlot>() as u64;
        let tm = TransactionManager {
            tx_table: table_addr,
            journal_addr,
            cur_tx_id: AtomicU64::new(0),
            max_transactions,
            extent_size: journal_size / max_transactions,
        };
        if tm.extent_size * max_transactions > journal_size {
            return Err(GraphError::InvalidConfig("journal smaller than its extents"));
        }

        if params.create {
            tm.reset_table(params);
        } else {
            tm.recover(params)?;
        }
        Ok(tm)
    }

    fn slot_addr(&self, index: u64) -> u64 {
        self.tx_table + index * std::mem::size_of::<TxSlot>() as u64
    }

    fn tx_jbegin(&self, index: u64) -> u64 {
        debug_assert!(index < self.max_transactions);
        self.journal_addr + index * self.extent_size
    }

    fn tx_jend(&self, index: u64) -> u64 {
        self.journal_addr + (index + 1) * self.extent_size
    }

    fn reset_table(&self, params: &InitParams) {
        for i in 0..self.max_transactions {
            let addr = self.slot_addr(i);
            pm::write(
                addr,
                TxSlot {
                    tx_id: 0,
                    jbegin: self.tx_jbegin(i),
                    jend: self.tx_jend(i),
                },
            );
            params.flush(addr, 64);
        }
    }

    /// Rolls back every slot left active by a crash. Runs before any user
    /// transaction. A read-only open that needs recovery fails.
    fn recover(&self, params: &InitParams) -> Result<()> {
        let mut max_tx_id = 0u64;
        for i in 0..self.max_transactions {
            let addr = self.slot_addr(i);
            let slot: TxSlot = slot_read(addr);
            let mut tx_id = slot.tx_id;

            if tx_id & ACTIVE != 0 {
                if params.read_only {
                    return Err(GraphError::ReadOnly);
                }
                tx_id &= !ACTIVE;
                debug!(tx_id, slot = i, "recovering interrupted transaction");
                let handle = TxHandle {
                    id: tx_id,
                    index: i as i64,
                    jbegin: slot.jbegin,
                    jend: slot.jend,
                };
                rollback(&handle, slot.jend, params.msync_needed, &params.pending);

                pm::atomic_u64(addr).store(tx_id, Ordering::SeqCst);
                params.flush(addr, 64);
            }

            if tx_id > max_tx_id {
                max_tx_id = tx_id;
            }
        }
        self.cur_tx_id.store(max_tx_id, Ordering::SeqCst);
        Ok(())
    }

    fn alloc_transaction(
        &self,
        read_only: bool,
        msync_needed: bool,
        pending: &RefCell<RangeSet>,
    ) -> Result<TxHandle> {
        if read_only {
            return Ok(TxHandle::dummy(self.tx_jbegin(0)));
        }

        let tx_id = self.cur_tx_id.fetch_add(1, Ordering::SeqCst) + 1;

        for i in 0..self.max_transactions {
            let addr = self.slot_addr(i);
            let word = pm::atomic_u64(addr);
            let prev = word.load(Ordering::SeqCst);
            if prev & ACTIVE == 0
                && word
                    .compare_exchange(prev, tx_id | ACTIVE, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                flush_into(msync_needed, pending, addr, 64);
                return Ok(TxHandle {
                    id: tx_id,
                    index: i as i64,
                    jbegin: self.tx_jbegin(i),
                    jend: self.tx_jend(i),
                });
            }
        }
        Err(GraphError::OutOfTransactions)
    }

    /// Clearing the ACTIVE bit is the commit linearisation point.
    fn free_transaction(
        &self,
        handle: &TxHandle,
        msync_needed: bool,
        pending: &RefCell<RangeSet>,
    ) -> Result<()> {
        if handle.index >= 0 {
            let addr = self.slot_addr(handle.index as u64);
            let word = pm::atomic_u64(addr);
            word.store(word.load(Ordering::SeqCst) & !ACTIVE, Ordering::SeqCst);
            flush_into(msync_needed, pending, addr, 64);
            sync_pending(msync_needed, pending)?;
        }
        Ok(())
    }
}

#[inline]
fn slot_read(addr: u64) -> TxSlot {
    TxSlot {
        tx_id: pm::read(addr),
        jbegin: pm::read(addr + 8),
        jend: pm::read(addr + 16),
    }
}

/// Restores pre-images newest-to-oldest for every journal entry that
/// belongs to `handle`, then issues a persistent barrier.
fn rollback(handle: &TxHandle, jend: u64, msync_needed: bool, pending: &RefCell<RangeSet>) {
    let mut valid = Vec::new();
    let mut je = handle.jbegin;
    while je < jend {
        let id_len: u64 = pm::read(je);
        if je_id(id_len) != handle.id & JE_ID_MASK {
            break;
        }
        valid.push(je);
        je += 64;
    }

    for &je in valid.iter().rev() {
        let id_len: u64 = pm::read(je);
        let len = je_len(id_len);
        let addr: u64 = pm::read(je + 8);
        if len == 0 || len > JE_MAX_LEN || addr == 0 {
            continue;
        }
        let data = pm::bytes(je + 16, len).to_vec();
        pm::copy_in(addr, &data);
        flush_into(msync_needed, pending, addr, len as u64);
    }

    if let Err(err) = sync_pending(msync_needed, pending) {
        warn!(%err, "sync failed during rollback");
    }
}

/// Which striped-lock domain an address belongs to.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) enum LockDomain {
    /// Node table and node records.
    Node = 0,
    /// Edge table and edge records.
    Edge = 1,
    /// Index structures and adjacency lists.
    Index = 2,
}

const NUM_LOCK_DOMAINS: usize = 3;

const LOCK_READ: u8 = 1;
const LOCK_WRITE: u8 = 2;

type CallbackFn = Box<dyn Fn(&GraphImpl, &TransactionImpl) -> Result<()>>;

/// Keyed callback chain: at most one entry per key, each carrying shared
/// state that later registrations can look up and extend.
#[derive(Default)]
pub(crate) struct CallbackList {
    entries: Vec<(u64, Rc<dyn Any>, CallbackFn)>,
}

impl CallbackList {
    fn register(&mut self, key: u64, state: Rc<dyn Any>, f: CallbackFn) {
        self.entries.push((key, state, f));
    }

    fn lookup(&self, key: u64) -> Option<Rc<dyn Any>> {
        self.entries
            .iter()
            .find(|(k, _, _)| *k == key)
            .map(|(_, s, _)| Rc::clone(s))
    }

    fn take(&mut self) -> Vec<(u64, Rc<dyn Any>, CallbackFn)> {
        std::mem::take(&mut self.entries)
    }
}

/// Sink notified when index structures mutate under a live iterator.
pub(crate) trait IndexIterSink {
    /// The list cell holding the iterator's current entity is going away.
    fn remove_notify(&self, list_node: u64);
    /// The tree at `tree` rebalanced; positional stacks are stale.
    fn rebalance_notify(&self, tree: u64);
}

/// Sink notified when a property record moves or disappears.
pub(crate) trait PropIterSink {
    /// `offset == 0` means the whole chunk (or list) is going away.
    fn property_notify(&self, chunk: u64, offset: u32);
}

#[derive(Default)]
struct IterRegistry {
    index_sinks: Vec<Weak<dyn IndexIterSink>>,
    prop_sinks: Vec<Weak<dyn PropIterSink>>,
}

/// A per-thread active transaction.
///
/// Interior mutability throughout: components reach the transaction through
/// the thread context and may nest (journal writes during commit callbacks,
/// lock acquisition during iterator re-seeks), so no `&mut` is ever handed
/// out.
pub(crate) struct TransactionImpl {
    db: *const GraphImpl,
    read_write: bool,
    msync_needed: bool,
    always_msync: bool,
    committed: Cell<bool>,
    handle: Cell<TxHandle>,
    jcur: Cell<u64>,
    alloc_unit: Cell<i32>,
    commit_cbs: RefCell<CallbackList>,
    abort_cbs: RefCell<CallbackList>,
    finalize_cbs: RefCell<CallbackList>,
    locks: [RefCell<HashMap<u64, u8>>; NUM_LOCK_DOMAINS],
    iters: RefCell<IterRegistry>,
    pending: RefCell<RangeSet>,
}

thread_local! {
    static TX_STACK: RefCell<Vec<*const TransactionImpl>> = const { RefCell::new(Vec::new()) };
}

impl TransactionImpl {
    fn begin(db: &GraphImpl, read_write: bool, independent: bool) -> Result<Box<TransactionImpl>> {
        if read_write {
            db.check_read_write()?;
        }

        // Nested dependent transactions are not supported.
        let nested = TX_STACK.with(|s| !s.borrow().is_empty());
        if nested && read_write && !independent {
            return Err(GraphError::NotImplemented);
        }

        let (msync_needed, always_msync) = db.msync_options();
        let tx = Box::new(TransactionImpl {
            db,
            read_write,
            msync_needed,
            always_msync,
            committed: Cell::new(false),
            handle: Cell::new(TxHandle::dummy(0)),
            jcur: Cell::new(0),
            alloc_unit: Cell::new(-1),
            commit_cbs: RefCell::new(CallbackList::default()),
            abort_cbs: RefCell::new(CallbackList::default()),
            finalize_cbs: RefCell::new(CallbackList::default()),
            locks: Default::default(),
            iters: RefCell::new(IterRegistry::default()),
            pending: RefCell::new(RangeSet::new()),
        });

        let handle =
            db.transaction_manager()
                .alloc_transaction(!read_write, msync_needed, &tx.pending)?;
        tx.handle.set(handle);
        tx.jcur.set(handle.jbegin);

        TX_STACK.with(|s| s.borrow_mut().push(&*tx as *const TransactionImpl));
        Ok(tx)
    }

    /// The innermost active transaction on this thread.
    pub(crate) fn current<'a>() -> Result<&'a TransactionImpl> {
        TX_STACK.with(|s| {
            s.borrow()
                .last()
                .copied()
                .ok_or(GraphError::NoTransaction)
        })
        // The pointer is valid for the borrow's duration: the owning
        // Transaction pops it before the allocation is released.
        .map(|p| unsafe_deref(p))
    }

    pub(crate) fn db(&self) -> &GraphImpl {
        unsafe_deref(self.db)
    }

    pub(crate) fn check_read_write(&self) -> Result<()> {
        if !self.read_write {
            return Err(GraphError::ReadOnly);
        }
        Ok(())
    }

    pub(crate) fn alloc_unit(&self) -> i32 {
        self.alloc_unit.get()
    }

    pub(crate) fn set_alloc_unit(&self, unit: i32) {
        self.alloc_unit.set(unit);
    }

    // ---- journal ----------------------------------------------------

    fn log_je(&self, src: u64, len: usize) {
        let je = self.jcur.get();
        pm::write(je + 8, src);
        let data = pm::bytes(src, len).to_vec();
        pm::copy_in(je + 16, &data);
        // The entry becomes valid only once the id word lands.
        fence(Ordering::SeqCst);
        pm::write(je, je_pack(self.handle.get().id, len));
        self.flush(je, 64);
        self.jcur.set(je + 64);
    }

    /// Records the pre-image of `[addr, addr+len)` so a rollback can
    /// restore it. Must precede the in-place write.
    pub(crate) fn log(&self, addr: u64, len: usize) -> Result<()> {
        debug_assert!(len > 0);
        let entries = len.div_ceil(JE_MAX_LEN);
        let handle = self.handle.get();

        if self.jcur.get() + (entries as u64 + 1) * 64 > handle.jend {
            return Err(if self.read_write {
                GraphError::OutOfJournalSpace
            } else {
                GraphError::ReadOnly
            });
        }

        let mut src = addr;
        let mut remaining = len;
        while remaining > JE_MAX_LEN {
            self.log_je(src, JE_MAX_LEN);
            src += JE_MAX_LEN as u64;
            remaining -= JE_MAX_LEN;
        }
        self.log_je(src, remaining);

        if self.always_msync {
            self.sync()?;
        }
        Ok(())
    }

    /// Logs the old value then writes the new one.
    pub(crate) fn write<T: Copy>(&self, addr: u64, val: T) -> Result<()> {
        self.log(addr, std::mem::size_of::<T>())?;
        pm::write(addr, val);
        Ok(())
    }

    /// Writes without logging (fresh or idempotent slots) and schedules a
    /// flush.
    pub(crate) fn write_bytes_nolog(&self, addr: u64, src: &[u8]) {
        pm::copy_in(addr, src);
        self.flush(addr, src.len() as u64);
    }

    pub(crate) fn flush(&self, addr: u64, len: u64) {
        flush_into(self.msync_needed, &self.pending, addr, len);
    }

    pub(crate) fn sync(&self) -> Result<()> {
        sync_pending(self.msync_needed, &self.pending)
    }

    // ---- locks ------------------------------------------------------

    /// Takes (or upgrades to) the requested mode on the stripe covering
    /// `addr` in `domain`, remembering it for bulk release.
    pub(crate) fn acquire_lock(&self, domain: LockDomain, addr: u64, write: bool) -> Result<()> {
        let striped = self.db().locks(domain);
        let stripe = striped.stripe_id(addr);
        let mut held = self.locks[domain as usize].borrow_mut();
        match held.get(&stripe).copied() {
            None => {
                if write {
                    striped.write_lock(stripe)?;
                    held.insert(stripe, LOCK_WRITE);
                } else {
                    striped.read_lock(stripe)?;
                    held.insert(stripe, LOCK_READ);
                }
            }
            Some(LOCK_READ) if write => {
                striped.upgrade_lock(stripe)?;
                held.insert(stripe, LOCK_WRITE);
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn unlock_all(&self) {
        for (i, domain) in [LockDomain::Node, LockDomain::Edge, LockDomain::Index]
            .into_iter()
            .enumerate()
        {
            let striped = self.db().locks(domain);
            let mut held = self.locks[i].borrow_mut();
            for (&stripe, &mode) in held.iter() {
                if mode == LOCK_WRITE {
                    striped.write_unlock(stripe);
                } else {
                    striped.read_unlock(stripe);
                }
            }
            held.clear();
        }
    }

    // ---- callback chains --------------------------------------------

    pub(crate) fn register_commit_callback(&self, key: u64, state: Rc<dyn Any>, f: CallbackFn) {
        self.commit_cbs.borrow_mut().register(key, state, f);
    }

    pub(crate) fn lookup_commit_state(&self, key: u64) -> Option<Rc<dyn Any>> {
        self.commit_cbs.borrow().lookup(key)
    }

    pub(crate) fn register_abort_callback(&self, key: u64, state: Rc<dyn Any>, f: CallbackFn) {
        self.abort_cbs.borrow_mut().register(key, state, f);
    }

    pub(crate) fn lookup_abort_state(&self, key: u64) -> Option<Rc<dyn Any>> {
        self.abort_cbs.borrow().lookup(key)
    }

    pub(crate) fn register_finalize_callback(&self, key: u64, state: Rc<dyn Any>, f: CallbackFn) {
        self.finalize_cbs.borrow_mut().register(key, state, f);
    }

    fn run_callbacks(&self, list: &RefCell<CallbackList>) -> Result<()> {
        // Entries are detached before running: callbacks may register into
        // the other chains but never into their own.
        let entries = list.borrow_mut().take();
        for (_, _, f) in &entries {
            f(self.db(), self)?;
        }
        Ok(())
    }

    // ---- iterator invalidation --------------------------------------

    pub(crate) fn register_index_iter(&self, sink: Weak<dyn IndexIterSink>) {
        if self.read_write {
            self.iters.borrow_mut().index_sinks.push(sink);
        }
    }

    pub(crate) fn register_prop_iter(&self, sink: Weak<dyn PropIterSink>) {
        if self.read_write {
            self.iters.borrow_mut().prop_sinks.push(sink);
        }
    }

    pub(crate) fn iterator_remove_notify(&self, list_node: u64) {
        let sinks: Vec<_> = {
            let mut reg = self.iters.borrow_mut();
            reg.index_sinks.retain(|w| w.strong_count() > 0);
            reg.index_sinks.clone()
        };
        for sink in sinks {
            if let Some(s) = sink.upgrade() {
                s.remove_notify(list_node);
            }
        }
    }

    pub(crate) fn iterator_rebalance_notify(&self, tree: u64) {
        let sinks: Vec<_> = {
            let mut reg = self.iters.borrow_mut();
            reg.index_sinks.retain(|w| w.strong_count() > 0);
            reg.index_sinks.clone()
        };
        for sink in sinks {
            if let Some(s) = sink.upgrade() {
                s.rebalance_notify(tree);
            }
        }
    }

    pub(crate) fn property_iterator_notify(&self, chunk: u64, offset: u32) {
        let sinks: Vec<_> = {
            let mut reg = self.iters.borrow_mut();
            reg.prop_sinks.retain(|w| w.strong_count() > 0);
            reg.prop_sinks.clone()
        };
        for sink in sinks {
            if let Some(s) = sink.upgrade() {
                s.property_notify(chunk, offset);
            }
        }
    }

    // ---- commit / abort ---------------------------------------------

    fn finalize_commit(&self) -> Result<()> {
        // Deferred work first: allocator frees, index bookkeeping. These may
        // journal further writes, which the flush loop below picks up.
        self.run_callbacks(&self.commit_cbs)?;

        // Flush dirty in-place data pointed to by the journal entries.
        let handle = self.handle.get();
        let mut je = handle.jbegin;
        while je < self.jcur.get() {
            let id_len: u64 = pm::read(je);
            let addr: u64 = pm::read(je + 8);
            let len = je_len(id_len);
            if addr != 0 && len > 0 {
                self.flush(addr, len as u64);
            }
            je += 64;
        }

        // Persistent barrier before the slot clear, so recovery never sees
        // commit-callback side effects ahead of the commit point.
        self.sync()
    }

    fn finish(&self) {
        if self.read_write {
            if !self.committed.get() {
                let handle = self.handle.get();
                debug!(tx_id = handle.id, "rolling back transaction");
                rollback(&handle, self.jcur.get(), self.msync_needed, &self.pending);
                if let Err(err) = self.run_callbacks(&self.abort_cbs) {
                    warn!(%err, "abort callback failed");
                }
            }
            self.alloc_unit.set(-1);
            if let Err(err) = self.run_callbacks(&self.finalize_cbs) {
                warn!(%err, "finalize callback failed");
            }
        }

        self.unlock_all();

        if self.read_write {
            let handle = self.handle.get();
            if let Err(err) =
                self.db()
                    .transaction_manager()
                    .free_transaction(&handle, self.msync_needed, &self.pending)
            {
                warn!(%err, "failed to release transaction slot");
            }
        }
    }
}

#[inline]
#[allow(unsafe_code)]
fn unsafe_deref<'a, T>(p: *const T) -> &'a T {
    unsafe { &*p }
}

/// Transaction mode requested by the caller.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TxMode {
    /// Reads only; any journal write fails with `ReadOnly`.
    ReadOnly,
    /// Full mutation rights.
    ReadWrite,
}

/// A unit of atomicity. Commit makes the transaction's mutations durable;
/// dropping without commit rolls every mutation back.
pub struct Transaction<'g> {
    inner: Box<TransactionImpl>,
    _graph: std::marker::PhantomData<&'g Graph>,
}

impl<'g> Transaction<'g> {
    /// Starts a transaction on this thread. At most one dependent
    /// transaction may be active per thread.
    pub fn begin(graph: &'g Graph, mode: TxMode) -> Result<Transaction<'g>> {
        let inner = TransactionImpl::begin(graph.inner(), mode == TxMode::ReadWrite, false)?;
        Ok(Transaction {
            inner,
            _graph: std::marker::PhantomData,
        })
    }

    /// Commits: runs deferred work, makes in-place data durable, and clears
    /// the persistent slot (the linearisation point). On error the
    /// transaction rolls back when dropped.
    pub fn commit(self) -> Result<()> {
        if self.inner.read_write {
            self.inner.finalize_commit()?;
        }
        self.inner.committed.set(true);
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.inner.finish();
        TX_STACK.with(|s| {
            let mut stack = s.borrow_mut();
            let top = stack.pop();
            debug_assert_eq!(top, Some(&*self.inner as *const TransactionImpl));
        });
    }
}

/// An internal transaction whose durability is independent of the enclosing
/// one; used by the allocators for bookkeeping that must survive an outer
/// abort.
pub(crate) struct IndependentTransaction {
    inner: Box<TransactionImpl>,
}

impl IndependentTransaction {
    pub(crate) fn begin(db: &GraphImpl) -> Result<IndependentTransaction> {
        let inner = TransactionImpl::begin(db, true, true)?;
        Ok(IndependentTransaction { inner })
    }

    pub(crate) fn tx(&self) -> &TransactionImpl {
        &self.inner
    }

    pub(crate) fn commit(self) -> Result<()> {
        self.inner.finalize_commit()?;
        self.inner.committed.set(true);
        Ok(())
    }
}

impl Drop for IndependentTransaction {
    fn drop(&mut self) {
        self.inner.finish();
        TX_STACK.with(|s| {
            let mut stack = s.borrow_mut();
            let top = stack.pop();
            debug_assert_eq!(top, Some(&*self.inner as *const TransactionImpl));
        });
    }
}
