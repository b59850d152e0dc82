//! Chained variable-layout property storage.
//!
//! A node or edge stores its properties inline in a chain of fixed-size
//! chunks. The first byte of a chunk holds `chunk_size - 1`; the rest is a
//! stream of self-delimiting records whose first byte packs the record size
//! and type. Values longer than 13 bytes (long strings, blobs) live in
//! external backings owned by the record.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{GraphError, Result};
use crate::index::IndexKind;
use crate::region::pm;
use crate::tx::{PropIterSink, TransactionImpl};
use crate::types::{Property, StringId, Time};

/// Size of every chunk past the first; the first chunk's size depends on
/// the node or edge record size.
pub(crate) const PROP_CHUNK_SIZE: u32 = 64;

// Record types, stored in the low nibble of a record's first byte.
const P_UNUSED: u8 = 0;
const P_END: u8 = 1;
const P_LINK: u8 = 2;
const P_NOVALUE: u8 = 3;
const P_BOOLEAN_FALSE: u8 = 4;
const P_BOOLEAN_TRUE: u8 = 5;
const P_INTEGER: u8 = 6;
const P_STRING: u8 = 7;
const P_STRING_PTR: u8 = 8;
const P_FLOAT: u8 = 9;
const P_TIME: u8 = 10;
const P_BLOB: u8 = 11;

/// Header byte + 2-byte property id.
const RECORD_OVERHEAD: u32 = 3;
/// Longest inline value; anything bigger goes external.
const MAX_INLINE: usize = 13;
/// External reference: 8-byte pointer + 4-byte size.
const BLOB_REF_SIZE: u32 = 12;
/// Inline `Time` encoding: 8-byte microseconds + 2-byte offset.
const TIME_SIZE: u32 = 10;
/// Bytes needed to embed a link: type byte + chunk pointer.
const LINK_SIZE: u32 = 9;

/// A position within a property chunk chain.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct PropertyRef {
    chunk: u64,
    offset: u32,
}

impl PropertyRef {
    pub(crate) fn new(chunk: u64) -> PropertyRef {
        PropertyRef { chunk, offset: 1 }
    }

    pub(crate) fn null() -> PropertyRef {
        PropertyRef { chunk: 0, offset: 0 }
    }

    fn chunk_size(&self) -> u32 {
        pm::read::<u8>(self.chunk) as u32 + 1
    }

    fn byte0_addr(&self) -> u64 {
        self.chunk + self.offset as u64
    }

    fn byte0(&self) -> u8 {
        pm::read(self.byte0_addr())
    }

    fn ptype(&self) -> u8 {
        if self.offset >= self.chunk_size() {
            P_END
        } else {
            self.byte0() & 0xf
        }
    }

    /// Record size minus one, from the high nibble.
    fn raw_size(&self) -> u32 {
        (self.byte0() >> 4) as u32
    }

    /// Total bytes the record occupies, header byte included.
    fn total_size(&self) -> u32 {
        self.raw_size() + 1
    }

    fn not_done(&self) -> bool {
        self.ptype() != P_END
    }

    fn skip(&mut self) {
        self.offset += self.total_size();
    }

    fn follow_link(&mut self) {
        debug_assert_eq!(self.ptype(), P_LINK);
        self.chunk = pm::read_unaligned(self.chunk + self.offset as u64 + 1);
        self.offset = 1;
    }

    /// Property id of a value record.
    fn id(&self) -> StringId {
        StringId(pm::read_unaligned(self.chunk + self.offset as u64 + 1))
    }

    fn val_addr(&self) -> u64 {
        self.chunk + self.offset as u64 + RECORD_OVERHEAD as u64
    }

    fn val_len(&self) -> u32 {
        self.total_size() - RECORD_OVERHEAD
    }

    /// Contiguous free bytes starting at this position: the run of unused
    /// records, or everything to the chunk end when at the terminator.
    fn free_space(&self) -> u32 {
        let mut p = *self;
        let mut end = self.chunk_size();
        while p.not_done() {
            if p.ptype() != P_UNUSED {
                end = p.offset;
                break;
            }
            p.skip();
        }
        end - self.offset
    }

    /// Advances to the next value record; false when the chain ends.
    fn skip_to_next(&mut self) -> bool {
        while self.not_done() {
            match self.ptype() {
                P_LINK => {
                    self.follow_link();
                    continue;
                }
                P_UNUSED => {}
                _ => return true,
            }
            self.skip();
        }
        false
    }

    fn blob_ref(&self) -> (u64, u32) {
        let ptr: u64 = pm::read_unaligned(self.val_addr());
        let size: u32 = pm::read_unaligned(self.val_addr() + 8);
        (ptr, size)
    }

    fn set_blob_ref(&self, ptr: u64, size: u32) {
        pm::write_unaligned(self.val_addr(), ptr);
        pm::write_unaligned(self.val_addr() + 8, size);
    }

    /// The value stored at this record.
    pub(crate) fn get_value(&self) -> Property {
        match self.ptype() {
            P_NOVALUE => Property::NoValue,
            P_BOOLEAN_FALSE => Property::Boolean(false),
            P_BOOLEAN_TRUE => Property::Boolean(true),
            P_INTEGER => {
                let sz = self.val_len() as usize;
                let bytes = pm::bytes(self.val_addr(), sz);
                let mut buf = [0u8; 8];
                buf[..sz].copy_from_slice(bytes);
                let shift = 64 - sz as u32 * 8;
                Property::Integer(((u64::from_le_bytes(buf) << shift) as i64) >> shift)
            }
            P_STRING => {
                let sz = self.val_len() as usize;
                let bytes = pm::bytes(self.val_addr(), sz);
                Property::String(String::from_utf8_lossy(bytes).into_owned())
            }
            P_STRING_PTR => {
                let (ptr, size) = self.blob_ref();
                let bytes = pm::bytes(ptr, size as usize);
                Property::String(String::from_utf8_lossy(bytes).into_owned())
            }
            P_FLOAT => {
                let bytes = pm::bytes(self.val_addr(), 8);
                Property::Float(f64::from_le_bytes(bytes.try_into().unwrap()))
            }
            P_TIME => {
                let bytes = pm::bytes(self.val_addr(), TIME_SIZE as usize);
                let usec = i64::from_le_bytes(bytes[..8].try_into().unwrap());
                let tz = i16::from_le_bytes(bytes[8..10].try_into().unwrap());
                Property::Time(Time {
                    usec_utc: usec,
                    tz_min: tz,
                })
            }
            P_BLOB => {
                let (ptr, size) = self.blob_ref();
                Property::Blob(pm::copy_out(ptr, size as usize))
            }
            _ => unreachable!("value accessor on control record"),
        }
    }

    /// Frees this record: notifies live property iterators, releases any
    /// external backing, and turns the slot into unused space (or the chunk
    /// terminator when nothing follows).
    fn free(&self, tx: &TransactionImpl) -> Result<()> {
        tx.property_iterator_notify(self.chunk, self.offset);

        let t = self.ptype();
        if t == P_STRING_PTR || t == P_BLOB {
            let (ptr, size) = self.blob_ref();
            tx.db().allocator().free(tx, ptr, size as u64);
        }

        let mut next = *self;
        next.skip();
        if !next.not_done() {
            tx.write::<u8>(self.byte0_addr(), P_END)
        } else {
            tx.write::<u8>(self.byte0_addr(), (self.raw_size() as u8) << 4 | P_UNUSED)
        }
    }

    /// Shrinks a found free span to `new_size`, marking the remainder as
    /// unused (or the chunk terminator when the span ran to the end).
    fn set_size(&self, old_size: u32, new_size: u32) {
        let next = PropertyRef {
            chunk: self.chunk,
            offset: self.offset + new_size,
        };
        if old_size == self.chunk_size() - self.offset {
            pm::write::<u8>(next.byte0_addr(), P_END);
        } else {
            let mut p = *self;
            let mut unused_size = 0;
            loop {
                unused_size += p.total_size();
                if unused_size >= new_size {
                    break;
                }
                p.skip();
            }
            if unused_size > new_size {
                let leftover = unused_size - new_size - 1;
                pm::write::<u8>(next.byte0_addr(), (leftover as u8) << 4 | P_UNUSED);
            }
        }
    }

    fn set_id(&self, id: StringId) {
        pm::write_unaligned(self.chunk + self.offset as u64 + 1, id.0);
    }

    /// Writes the value and the record's type/size byte. `size` is the full
    /// record size including overhead.
    fn set_value(
        &self,
        tx: &TransactionImpl,
        value: &Property,
        size: u32,
        allocator: &crate::alloc::Allocator,
    ) -> Result<()> {
        let t = match value {
            Property::NoValue => P_NOVALUE,
            Property::Boolean(false) => P_BOOLEAN_FALSE,
            Property::Boolean(true) => P_BOOLEAN_TRUE,
            Property::Integer(v) => {
                let len = (size - RECORD_OVERHEAD) as usize;
                debug_assert_eq!(len, int_len(*v) as usize);
                let bytes = v.to_le_bytes();
                pm::copy_in(self.val_addr(), &bytes[..len]);
                P_INTEGER
            }
            Property::String(s) => {
                if s.len() <= MAX_INLINE {
                    if !s.is_empty() {
                        pm::copy_in(self.val_addr(), s.as_bytes());
                    }
                    P_STRING
                } else {
                    self.set_external(tx, s.as_bytes(), allocator)?;
                    P_STRING_PTR
                }
            }
            Property::Float(v) => {
                pm::copy_in(self.val_addr(), &v.to_le_bytes());
                P_FLOAT
            }
            Property::Time(v) => {
                pm::copy_in(self.val_addr(), &v.usec_utc.to_le_bytes());
                pm::copy_in(self.val_addr() + 8, &v.tz_min.to_le_bytes());
                P_TIME
            }
            Property::Blob(b) => {
                self.set_external(tx, b, allocator)?;
                P_BLOB
            }
        };
        pm::write::<u8>(self.byte0_addr(), ((size - 1) as u8) << 4 | t);
        Ok(())
    }

    fn set_external(
        &self,
        tx: &TransactionImpl,
        bytes: &[u8],
        allocator: &crate::alloc::Allocator,
    ) -> Result<()> {
        if bytes.len() > u32::MAX as usize {
            return Err(GraphError::NotImplemented);
        }
        let p = allocator.alloc(tx, bytes.len() as u64)?;
        pm::copy_in(p, bytes);
        tx.flush(p, bytes.len() as u64);
        self.set_blob_ref(p, bytes.len() as u32);
        Ok(())
    }

    /// Embeds a link to `next_chunk`, padding any leading slack with an
    /// unused record so the link lands flush against the chunk end.
    fn set_link(&mut self, tx: &TransactionImpl, next_chunk: u64) -> Result<()> {
        let remaining = self.chunk_size() - self.offset;
        debug_assert!(remaining >= LINK_SIZE);
        let unused = remaining - LINK_SIZE;
        debug_assert!(unused < 16);
        tx.log(self.byte0_addr(), remaining as usize)?;
        if unused > 0 {
            pm::write::<u8>(self.byte0_addr(), ((unused - 1) as u8) << 4 | P_UNUSED);
            self.offset += unused;
        }
        pm::write::<u8>(self.byte0_addr(), P_LINK);
        pm::write_unaligned(self.chunk + self.offset as u64 + 1, next_chunk);
        Ok(())
    }

    /// Called when the current chunk has no room for a link: relocates the
    /// trailing records into the fresh chunk `q` to make room for one.
    /// Leaves `self` at the vacated space and `q` at the new free space.
    fn make_space(&mut self, q: &mut PropertyRef) {
        let mut p = PropertyRef {
            chunk: self.chunk,
            offset: 1,
        };
        while p.offset + p.total_size() - 1 < self.chunk_size() - LINK_SIZE {
            p.skip();
        }

        *self = p;

        while p.not_done() {
            if p.ptype() != P_UNUSED {
                let bytes = pm::copy_out(p.byte0_addr(), p.total_size() as usize);
                pm::copy_in(q.byte0_addr(), &bytes);
                q.skip();
            }
            p.skip();
        }
        pm::write::<u8>(q.byte0_addr(), P_END);
    }
}

fn int_len(v: i64) -> u32 {
    let v = if v < 0 { -v - 1 } else { v };
    if v == 0 {
        return 1;
    }
    let bsr = 63 - (v as u64).leading_zeros();
    (bsr + 1) / 8 + 1
}

/// Bytes a value needs in-record (not counting header byte and id).
fn get_space(p: &Property) -> u32 {
    match p {
        Property::NoValue => 0,
        Property::Boolean(_) => 0,
        Property::Integer(v) => int_len(*v),
        Property::String(s) => {
            if s.len() <= MAX_INLINE {
                s.len() as u32
            } else {
                BLOB_REF_SIZE
            }
        }
        Property::Float(_) => 8,
        Property::Time(_) => TIME_SIZE,
        Property::Blob(_) => BLOB_REF_SIZE,
    }
}

/// Space requirement plus, once found, a position able to hold it.
struct PropertySpace {
    req: u32,
    size: u32,
    pos: PropertyRef,
    new_chunk: bool,
}

impl PropertySpace {
    fn new(req: u32) -> PropertySpace {
        PropertySpace {
            req,
            size: 0,
            pos: PropertyRef::null(),
            new_chunk: false,
        }
    }

    fn set_pos(&mut self, pos: PropertyRef, size: u32) {
        self.pos = pos;
        self.size = size;
    }

    fn set_property(
        &self,
        tx: &TransactionImpl,
        id: StringId,
        value: &Property,
        allocator: &crate::alloc::Allocator,
    ) -> Result<()> {
        debug_assert!(self.req >= RECORD_OVERHEAD);
        debug_assert!(self.size >= self.req);
        debug_assert!(self.pos.free_space() >= self.size);

        let log_size = if self.size > self.req {
            self.req + 1
        } else {
            self.req
        };

        if !self.new_chunk {
            tx.log(self.pos.byte0_addr(), log_size as usize)?;
        }

        if self.size > self.req {
            self.pos.set_size(self.size, self.req);
        }
        self.pos.set_value(tx, value, self.req, allocator)?;
        self.pos.set_id(id);

        if self.new_chunk {
            // Flush from the chunk start; relocation and init writes are
            // covered in the same pass.
            tx.flush(self.pos.chunk, (self.pos.offset + log_size) as u64);
        }
        Ok(())
    }
}

/// Handle to one entity's property chain; `addr` is the first chunk, inline
/// in the node or edge record.
#[derive(Copy, Clone, Debug)]
pub(crate) struct PropertyList {
    addr: u64,
}

impl PropertyList {
    pub(crate) fn at(addr: u64) -> PropertyList {
        PropertyList { addr }
    }

    /// Initialises a fresh chunk. No logging; the caller flushes the
    /// containing record.
    pub(crate) fn init(&self, size: u32) {
        debug_assert!((10..=256).contains(&size));
        pm::write::<u8>(self.addr, (size - 1) as u8);
        pm::write::<u8>(self.addr + 1, P_END);
    }

    fn head(&self) -> PropertyRef {
        PropertyRef::new(self.addr)
    }

    fn find_property(&self, id: StringId, space: Option<&mut PropertySpace>) -> (bool, PropertyRef) {
        let mut space = space;
        let mut p = self.head();
        loop {
            if !p.not_done() {
                break;
            }
            match p.ptype() {
                P_LINK => {
                    p.follow_link();
                    continue;
                }
                P_UNUSED => {
                    if let Some(sp) = space.as_deref_mut() {
                        let free_space = p.free_space();
                        if free_space >= sp.req {
                            let exact = free_space == sp.req;
                            if sp.size == 0 || exact {
                                sp.set_pos(p, free_space);
                                if exact {
                                    space = None;
                                }
                            }
                        }
                    }
                }
                _ => {
                    if p.id() == id {
                        return (true, p);
                    }
                }
            }
            p.skip();
        }
        (false, p)
    }

    fn find_space(&self, space: &mut PropertySpace, start: &mut PropertyRef) -> bool {
        let mut p = *start;
        while p.not_done() {
            match p.ptype() {
                P_LINK => {
                    p.follow_link();
                    continue;
                }
                P_UNUSED => {
                    let free_space = p.free_space();
                    if free_space >= space.req {
                        space.set_pos(p, free_space);
                        return true;
                    }
                }
                _ => {}
            }
            p.skip();
        }

        // At the terminator: the tail of the chunk may still fit.
        let free_space = p.free_space();
        if free_space >= space.req {
            space.set_pos(p, free_space);
            return true;
        }

        *start = p;
        false
    }

    /// Allocates and links a fresh chunk, relocating trailing records when
    /// the link itself does not fit. `end` must be the chain terminator and
    /// is left at the new chunk's free space.
    fn add_chunk(&self, tx: &TransactionImpl, end: &mut PropertyRef) -> Result<()> {
        debug_assert!(!end.not_done());
        let allocator = tx.db().allocator();
        let chunk = allocator.alloc(tx, PROP_CHUNK_SIZE as u64)?;
        PropertyList::at(chunk).init(PROP_CHUNK_SIZE);

        let mut p = *end;
        *end = PropertyRef::new(chunk);

        if p.free_space() < LINK_SIZE {
            p.make_space(end);
        }
        p.set_link(tx, chunk)
    }

    pub(crate) fn check_property(&self, id: StringId) -> Result<Option<Property>> {
        let (found, p) = self.find_property(id, None);
        Ok(found.then(|| p.get_value()))
    }

    pub(crate) fn get_property(&self, id: StringId) -> Result<Property> {
        let (found, p) = self.find_property(id, None);
        if !found {
            return Err(GraphError::PropertyNotFound);
        }
        Ok(p.get_value())
    }

    /// Sets (or replaces) a property, keeping any matching indices in step.
    /// The index manager sees the old value before the list mutates.
    pub(crate) fn set_property(
        &self,
        kind: IndexKind,
        tag: StringId,
        obj: u64,
        id: StringId,
        new_value: &Property,
    ) -> Result<()> {
        let tx = TransactionImpl::current()?;
        let db = tx.db();
        let allocator = db.allocator();

        let mut space = PropertySpace::new(get_space(new_value) + RECORD_OVERHEAD);
        let (found, mut pos) = self.find_property(id, Some(&mut space));

        if found {
            let old = pos.get_value();
            db.index_manager()
                .update(tx, kind, tag, obj, id, Some(&old), Some(new_value))?;
            pos.free(tx)?;
        } else {
            db.index_manager()
                .update(tx, kind, tag, obj, id, None, Some(new_value))?;
        }

        if space.size == 0 && !self.find_space(&mut space, &mut pos) {
            self.add_chunk(tx, &mut pos)?;
            let free = pos.free_space();
            space.set_pos(pos, free);
            space.new_chunk = true;
        }

        space.set_property(tx, id, new_value, allocator)
    }

    /// Removes a property if present, updating indices first.
    pub(crate) fn remove_property(
        &self,
        kind: IndexKind,
        tag: StringId,
        obj: u64,
        id: StringId,
    ) -> Result<()> {
        let (found, p) = self.find_property(id, None);
        if found {
            let tx = TransactionImpl::current()?;
            let db = tx.db();
            let old = p.get_value();
            db.index_manager()
                .update(tx, kind, tag, obj, id, Some(&old), None)?;
            p.free(tx)?;
        }
        Ok(())
    }

    /// Drops every property: external backings freed, indices updated, all
    /// chunks past the first returned, and the first chunk reset.
    pub(crate) fn remove_all_properties(
        &self,
        kind: IndexKind,
        tag: StringId,
        obj: u64,
    ) -> Result<()> {
        let tx = TransactionImpl::current()?;
        let db = tx.db();
        let allocator = db.allocator();

        let mut p = self.head();
        let mut first = true;
        while p.not_done() {
            match p.ptype() {
                P_LINK => {
                    let chunk = p.chunk;
                    p.follow_link();
                    tx.property_iterator_notify(chunk, 0);
                    if !first {
                        allocator.free(tx, chunk, PROP_CHUNK_SIZE as u64);
                    }
                    first = false;
                    continue;
                }
                P_UNUSED => {}
                P_STRING_PTR => {
                    let old = p.get_value();
                    db.index_manager()
                        .update(tx, kind, tag, obj, p.id(), Some(&old), None)?;
                    let (ptr, size) = p.blob_ref();
                    allocator.free(tx, ptr, size as u64);
                }
                P_BLOB => {
                    // Blobs are never indexed.
                    let (ptr, size) = p.blob_ref();
                    allocator.free(tx, ptr, size as u64);
                }
                _ => {
                    let old = p.get_value();
                    db.index_manager()
                        .update(tx, kind, tag, obj, p.id(), Some(&old), None)?;
                }
            }
            p.skip();
        }

        tx.property_iterator_notify(p.chunk, 0);
        if !first {
            allocator.free(tx, p.chunk, PROP_CHUNK_SIZE as u64);
        }
        tx.write::<u8>(self.addr + 1, P_END)
    }

    /// A lazy iterator over the live properties.
    pub(crate) fn iter(&self) -> Result<PropertyIterator> {
        let tx = TransactionImpl::current()?;
        let mut cur = self.head();
        let live = cur.skip_to_next();
        let state = Rc::new(PropIterState {
            cur: RefCell::new(if live { Some(cur) } else { None }),
            vacant: std::cell::Cell::new(false),
        });
        if live {
            let sink: Rc<dyn PropIterSink> = state.clone();
            tx.register_prop_iter(Rc::downgrade(&sink));
        }
        Ok(PropertyIterator { state })
    }
}

struct PropIterState {
    cur: RefCell<Option<PropertyRef>>,
    vacant: std::cell::Cell<bool>,
}

impl PropIterSink for PropIterState {
    fn property_notify(&self, chunk: u64, offset: u32) {
        let matches = {
            let cur = self.cur.borrow();
            match *cur {
                Some(p) => p.chunk == chunk,
                None => false,
            }
        };
        if !matches {
            return;
        }
        let cur_pos = self.cur.borrow().unwrap();
        if offset == 0 {
            // The whole chunk is going away.
            *self.cur.borrow_mut() = None;
            self.vacant.set(true);
        } else if offset == cur_pos.offset {
            let mut next = cur_pos;
            next.skip();
            *self.cur.borrow_mut() = next.skip_to_next().then_some(next);
            self.vacant.set(true);
        }
    }
}

/// Iterator over an entity's properties. Removal of the current property
/// marks the iterator vacant; dereferencing while vacant fails.
pub struct PropertyIterator {
    state: Rc<PropIterState>,
}

impl PropertyIterator {
    /// Whether the iterator refers to a property (or a vacant slot).
    pub fn valid(&self) -> bool {
        self.state.vacant.get() || self.state.cur.borrow().is_some()
    }

    /// Property id at the current position.
    pub fn id(&self) -> Result<crate::types::StringId> {
        if self.state.vacant.get() {
            return Err(GraphError::VacantIterator);
        }
        match *self.state.cur.borrow() {
            Some(p) => Ok(p.id()),
            None => Err(GraphError::NullIterator),
        }
    }

    /// Property value at the current position.
    pub fn value(&self) -> Result<Property> {
        if self.state.vacant.get() {
            return Err(GraphError::VacantIterator);
        }
        match *self.state.cur.borrow() {
            Some(p) => Ok(p.get_value()),
            None => Err(GraphError::NullIterator),
        }
    }

    /// Advances; returns whether a property is available.
    pub fn next(&mut self) -> bool {
        if self.state.vacant.get() {
            // Already advanced by the invalidation callback.
            self.state.vacant.set(false);
            return self.valid();
        }
        let mut cur = self.state.cur.borrow_mut();
        if let Some(mut p) = cur.take() {
            p.skip();
            if p.skip_to_next() {
                *cur = Some(p);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_lengths() {
        assert_eq!(int_len(0), 1);
        assert_eq!(int_len(1), 1);
        assert_eq!(int_len(127), 1);
        assert_eq!(int_len(128), 2);
        assert_eq!(int_len(-1), 1);
        assert_eq!(int_len(-128), 1);
        assert_eq!(int_len(-129), 2);
        assert_eq!(int_len(i64::MAX), 8);
        assert_eq!(int_len(i64::MIN), 8);
    }

    #[test]
    fn space_requirements_fit_records() {
        for p in [
            Property::NoValue,
            Property::Boolean(true),
            Property::Integer(i64::MIN),
            Property::Float(1.5),
            Property::Time(Time {
                usec_utc: 0,
                tz_min: 0,
            }),
            Property::String("x".repeat(13)),
            Property::String("x".repeat(200)),
            Property::Blob(vec![0; 100]),
        ] {
            // The high nibble caps records at 16 bytes total.
            assert!(get_space(&p) + RECORD_OVERHEAD <= 16, "{p:?}");
        }
    }
}
