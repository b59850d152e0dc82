//! Property and tag indices.
//!
//! The directory maps (kind, tag, property id) to a typed balanced-tree
//! index. The reserved property id 0 under each tag holds the implicit
//! tag-only index, populated as entities are added. Updates also consult
//! the any-tag ("global") index for the property so a global index catches
//! every entity regardless of tag.

pub(crate) mod avl;
pub(crate) mod chunklist;
pub(crate) mod cursor;
pub(crate) mod keys;
pub(crate) mod list;

use std::mem::offset_of;
use std::rc::Rc;

use crate::alloc::Allocator;
use crate::error::{GraphError, Result};
use crate::region::pm;
use crate::tx::{InitParams, LockDomain, TransactionImpl};
use crate::types::{PredicateOp, Property, PropertyPredicate, PropertyType, StringId};

use avl::{AvlTree, TreePm};
use chunklist::{ChunkList, ChunkListHead};
use cursor::ObjCursor;
use keys::{StringKey, TransientStringKey, TreeKey};
use list::List;

/// Whether an index covers nodes or edges.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum IndexKind {
    /// Node indices.
    Node = 0,
    /// Edge indices.
    Edge = 1,
}

/// Aggregate statistics for one index, tag, or kind.
#[derive(Copy, Clone, Debug, Default)]
pub struct IndexStats {
    /// Distinct keys.
    pub unique_entries: u64,
    /// Indexed (key, entity) pairs.
    pub total_elements: u64,
    /// Bytes held by tree nodes, list cells, and key backings.
    pub total_size_bytes: u64,
    /// 100 when no key holds more than the average number of entities.
    pub health_factor: u64,
}

const TAGLIST_CHUNK_BYTES: u32 = 128;
const INDEXLIST_CHUNK_BYTES: u32 = 128;

type TagList = ChunkList<StringId, ChunkListHead, TAGLIST_CHUNK_BYTES>;
type IndexList = ChunkList<StringId, u64, INDEXLIST_CHUNK_BYTES>;

/// Persistent form of one index: a type tag plus the tree root.
#[allow(dead_code)] // accessed through field offsets
#[repr(C)]
struct IndexPm {
    ptype: u8,
    _pad: [u8; 7],
    tree: TreePm,
}

const INDEX_PM_SIZE: u64 = std::mem::size_of::<IndexPm>() as u64;

/// Handle to one typed index in persistent memory.
#[derive(Copy, Clone, Debug)]
pub(crate) struct IndexRef {
    addr: u64,
}

fn key_bool(p: &Property) -> Result<bool> {
    p.bool_value()
}

fn key_i64(p: &Property) -> Result<i64> {
    p.int_value()
}

fn key_f64(p: &Property) -> Result<f64> {
    p.float_value()
}

fn key_time(p: &Property) -> Result<i64> {
    Ok(p.time_value()?.usec_utc)
}

impl IndexRef {
    fn at(addr: u64) -> IndexRef {
        IndexRef { addr }
    }

    fn create(tx: &TransactionImpl, allocator: &Allocator, ptype: PropertyType) -> Result<IndexRef> {
        let addr = allocator.alloc(tx, INDEX_PM_SIZE)?;
        pm::write::<u8>(addr + offset_of!(IndexPm, ptype) as u64, ptype as u8);
        pm::write(
            addr + offset_of!(IndexPm, tree) as u64,
            [0u64; 2],
        );
        tx.flush(addr, INDEX_PM_SIZE);
        Ok(IndexRef { addr })
    }

    fn ptype(&self) -> PropertyType {
        match pm::read::<u8>(self.addr + offset_of!(IndexPm, ptype) as u64) {
            1 => PropertyType::NoValue,
            2 => PropertyType::Boolean,
            3 => PropertyType::Integer,
            4 => PropertyType::String,
            5 => PropertyType::Float,
            6 => PropertyType::Time,
            _ => PropertyType::Blob,
        }
    }

    fn tree_pm(&self) -> u64 {
        self.addr + offset_of!(IndexPm, tree) as u64
    }

    fn check_type(&self, ptype: PropertyType) -> Result<()> {
        if self.ptype() != ptype {
            return Err(GraphError::PropertyTypeMismatch);
        }
        Ok(())
    }

    fn add_typed<K: TreeKey>(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        key: &K,
        obj: u64,
    ) -> Result<()> {
        tx.acquire_lock(LockDomain::Index, self.tree_pm(), true)?;
        let list_addr = AvlTree::<K>::at(self.tree_pm()).add(tx, allocator, key)?;
        List::<u64>::at(list_addr).add(tx, allocator, obj)?;
        Ok(())
    }

    fn remove_typed<K: TreeKey>(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        key: &K,
        obj: u64,
    ) -> Result<()> {
        tx.acquire_lock(LockDomain::Index, self.tree_pm(), true)?;
        let tree = AvlTree::<K>::at(self.tree_pm());
        if let Some(list_addr) = tree.find(key) {
            let list = List::<u64>::at(list_addr);
            list.remove(tx, allocator, obj)?;
            if list.num_elems() == 0 {
                tree.remove(tx, allocator, key)?;
            }
        }
        Ok(())
    }

    /// Adds (value → entity) to this index.
    pub(crate) fn add(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        value: &Property,
        obj: u64,
        locale: &str,
    ) -> Result<()> {
        self.check_type(value.ptype())?;
        match self.ptype() {
            PropertyType::Integer => self.add_typed(tx, allocator, &key_i64(value)?, obj),
            PropertyType::Float => self.add_typed(tx, allocator, &key_f64(value)?, obj),
            PropertyType::Boolean => self.add_typed(tx, allocator, &key_bool(value)?, obj),
            PropertyType::Time => self.add_typed(tx, allocator, &key_time(value)?, obj),
            PropertyType::String => {
                let probe = TransientStringKey::new(value.string_value()?, locale);
                self.add_typed(tx, allocator, &probe.key(), obj)
            }
            PropertyType::NoValue => Err(GraphError::NotImplemented),
            PropertyType::Blob => Err(GraphError::PropertyTypeMismatch),
        }
    }

    /// Removes (value → entity) from this index, dropping the key once its
    /// entity list empties.
    pub(crate) fn remove(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        value: &Property,
        obj: u64,
        locale: &str,
    ) -> Result<()> {
        self.check_type(value.ptype())?;
        match self.ptype() {
            PropertyType::Integer => self.remove_typed(tx, allocator, &key_i64(value)?, obj),
            PropertyType::Float => self.remove_typed(tx, allocator, &key_f64(value)?, obj),
            PropertyType::Boolean => self.remove_typed(tx, allocator, &key_bool(value)?, obj),
            PropertyType::Time => self.remove_typed(tx, allocator, &key_time(value)?, obj),
            PropertyType::String => {
                let probe = TransientStringKey::new(value.string_value()?, locale);
                self.remove_typed(tx, allocator, &probe.key(), obj)
            }
            PropertyType::NoValue => Err(GraphError::NotImplemented),
            PropertyType::Blob => Err(GraphError::PropertyTypeMismatch),
        }
    }

    fn cursor_typed<K: TreeKey + 'static>(
        &self,
        tx: &TransactionImpl,
        op: PredicateOp,
        v1: Option<K>,
        v2: Option<K>,
        reverse: bool,
    ) -> Result<Rc<dyn ObjCursor>> {
        let pm_addr = self.tree_pm();
        let c: Rc<dyn ObjCursor> = match op {
            PredicateOp::DontCare => cursor::cursor_any::<K>(tx, pm_addr, reverse)?,
            PredicateOp::Eq => cursor::cursor_eq(tx, pm_addr, v1.unwrap())?,
            PredicateOp::Ne => cursor::cursor_ne(tx, pm_addr, v1.unwrap(), reverse)?,
            PredicateOp::Lt => cursor::cursor_below(tx, pm_addr, v1.unwrap(), false, reverse)?,
            PredicateOp::Le => cursor::cursor_below(tx, pm_addr, v1.unwrap(), true, reverse)?,
            PredicateOp::Gt => cursor::cursor_above(tx, pm_addr, v1.unwrap(), false, reverse)?,
            PredicateOp::Ge => cursor::cursor_above(tx, pm_addr, v1.unwrap(), true, reverse)?,
            PredicateOp::GeLe => {
                cursor::cursor_range(tx, pm_addr, v1.unwrap(), v2.unwrap(), true, true, reverse)?
            }
            PredicateOp::GeLt => {
                cursor::cursor_range(tx, pm_addr, v1.unwrap(), v2.unwrap(), true, false, reverse)?
            }
            PredicateOp::GtLe => {
                cursor::cursor_range(tx, pm_addr, v1.unwrap(), v2.unwrap(), false, true, reverse)?
            }
            PredicateOp::GtLt => {
                cursor::cursor_range(tx, pm_addr, v1.unwrap(), v2.unwrap(), false, false, reverse)?
            }
        };
        Ok(c)
    }

    /// Opens a cursor matching the predicate, forward or reverse.
    pub(crate) fn open_cursor(
        &self,
        tx: &TransactionImpl,
        pp: &PropertyPredicate,
        locale: &str,
        reverse: bool,
    ) -> Result<Rc<dyn ObjCursor>> {
        if pp.op != PredicateOp::DontCare {
            self.check_type(pp.v1.ptype())?;
            if pp.op.is_range() {
                self.check_type(pp.v2.ptype())?;
            }
        }
        let want2 = pp.op.is_range();
        match self.ptype() {
            PropertyType::Integer => self.cursor_typed(
                tx,
                pp.op,
                key_i64(&pp.v1).ok(),
                if want2 { key_i64(&pp.v2).ok() } else { None },
                reverse,
            ),
            PropertyType::Float => self.cursor_typed(
                tx,
                pp.op,
                key_f64(&pp.v1).ok(),
                if want2 { key_f64(&pp.v2).ok() } else { None },
                reverse,
            ),
            PropertyType::Boolean => self.cursor_typed(
                tx,
                pp.op,
                key_bool(&pp.v1).ok(),
                if want2 { key_bool(&pp.v2).ok() } else { None },
                reverse,
            ),
            PropertyType::Time => self.cursor_typed(
                tx,
                pp.op,
                key_time(&pp.v1).ok(),
                if want2 { key_time(&pp.v2).ok() } else { None },
                reverse,
            ),
            PropertyType::String => {
                let k1 = pp
                    .v1
                    .string_value()
                    .ok()
                    .map(|s| TransientStringKey::new(s, locale));
                let k2 = if want2 {
                    pp.v2
                        .string_value()
                        .ok()
                        .map(|s| TransientStringKey::new(s, locale))
                } else {
                    None
                };
                self.cursor_typed(
                    tx,
                    pp.op,
                    k1.as_ref().map(|k| k.key()),
                    k2.as_ref().map(|k| k.key()),
                    reverse,
                )
            }
            PropertyType::NoValue => Err(GraphError::NotImplemented),
            PropertyType::Blob => Err(GraphError::PropertyTypeMismatch),
        }
    }

    fn stats_typed<K: TreeKey>(&self) -> IndexStats {
        let tree = AvlTree::<K>::at(self.tree_pm());
        let mut stats = IndexStats {
            unique_entries: tree.num_elems(),
            total_elements: 0,
            total_size_bytes: INDEX_PM_SIZE,
            health_factor: 100,
        };
        if stats.unique_entries == 0 {
            return stats;
        }

        let mut per_key = Vec::new();
        tree.for_each_node(|node| {
            let elems = List::<u64>::at(AvlTree::<K>::value_addr(node)).num_elems();
            stats.total_elements += elems;
            stats.total_size_bytes += AvlTree::<K>::node_size()
                + AvlTree::<K>::key(node).extra_bytes()
                + elems * List::<u64>::node_size();
            per_key.push(elems);
        });

        // A key holding more than the average share of elements reduces
        // health proportionally to its share.
        let avg = stats.total_elements / stats.unique_entries.max(1);
        for elems in per_key {
            if elems > avg && stats.total_elements > 0 {
                stats.health_factor = stats
                    .health_factor
                    .saturating_sub(100 * elems / stats.total_elements);
            }
        }
        stats
    }

    pub(crate) fn stats(&self) -> IndexStats {
        match self.ptype() {
            PropertyType::Integer | PropertyType::Time => self.stats_typed::<i64>(),
            PropertyType::Float => self.stats_typed::<f64>(),
            PropertyType::Boolean => self.stats_typed::<bool>(),
            PropertyType::String => self.stats_typed::<StringKey>(),
            _ => IndexStats::default(),
        }
    }
}

/// Directory of indices: one tag map per kind.
pub(crate) struct IndexManager {
    region: u64,
}

impl IndexManager {
    pub(crate) fn new(region_addr: u64, params: &InitParams) -> IndexManager {
        if params.create {
            TagList::init(region_addr);
            TagList::init(region_addr + chunklist::CHUNKLIST_HEAD_SIZE);
            params.flush(region_addr, 2 * chunklist::CHUNKLIST_HEAD_SIZE);
        }
        IndexManager { region: region_addr }
    }

    fn tag_list(&self, kind: IndexKind) -> TagList {
        TagList::at(self.region + kind as u64 * chunklist::CHUNKLIST_HEAD_SIZE)
    }

    /// Finds or creates the per-tag entry, seeding its implicit tag-only
    /// index (property id 0) for non-empty tags.
    fn add_tag_index(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        kind: IndexKind,
        tag: StringId,
    ) -> Result<u64> {
        let entry = self.tag_list(kind).add(tx, allocator, tag)?;
        let ilist = IndexList::at(entry);
        if ilist.num_elems(tx)? == 0 && !tag.is_none() {
            let prop0 = IndexRef::create(tx, allocator, PropertyType::Boolean)?;
            let slot = ilist.add(tx, allocator, StringId(0))?;
            tx.write(slot, prop0.addr)?;
        }
        Ok(entry)
    }

    /// Creates an index on (kind, tag, property id). Existing indices are
    /// left untouched.
    pub(crate) fn create_index(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        kind: IndexKind,
        tag: StringId,
        property_id: StringId,
        ptype: PropertyType,
    ) -> Result<()> {
        match ptype {
            PropertyType::NoValue => return Err(GraphError::NotImplemented),
            PropertyType::Blob => return Err(GraphError::PropertyTypeMismatch),
            _ => {}
        }
        let entry = self.add_tag_index(tx, allocator, kind, tag)?;
        let slot = IndexList::at(entry).add(tx, allocator, property_id)?;
        if pm::read::<u64>(slot) == pm::NULL {
            let idx = IndexRef::create(tx, allocator, ptype)?;
            tx.write(slot, idx.addr)?;
        }
        Ok(())
    }

    /// Registers an entity in its tag's implicit index.
    pub(crate) fn add_entity(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        kind: IndexKind,
        tag: StringId,
        obj: u64,
    ) -> Result<bool> {
        debug_assert_ne!(obj, pm::NULL);
        if tag.is_none() {
            return Ok(false);
        }
        let entry = self.add_tag_index(tx, allocator, kind, tag)?;
        let slot = IndexList::at(entry)
            .find(tx, StringId(0))?
            .expect("implicit tag index exists");
        let idx = IndexRef::at(pm::read(slot));
        idx.add_typed(tx, allocator, &true, obj)?;
        Ok(true)
    }

    /// Unregisters an entity from its tag's implicit index.
    pub(crate) fn remove_entity(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        kind: IndexKind,
        tag: StringId,
        obj: u64,
    ) -> Result<()> {
        if tag.is_none() {
            return Ok(());
        }
        let entry = self.add_tag_index(tx, allocator, kind, tag)?;
        let slot = IndexList::at(entry)
            .find(tx, StringId(0))?
            .expect("implicit tag index exists");
        let idx = IndexRef::at(pm::read(slot));
        idx.remove_typed(tx, allocator, &true, obj)
    }

    /// Looks up the index at (kind, tag, property id), optionally checking
    /// its value type.
    pub(crate) fn get_index(
        &self,
        tx: &TransactionImpl,
        kind: IndexKind,
        tag: StringId,
        property_id: StringId,
        ptype: Option<PropertyType>,
    ) -> Result<Option<IndexRef>> {
        let entry = match self.tag_list(kind).find(tx, tag)? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let slot = match IndexList::at(entry).find(tx, property_id)? {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let addr: u64 = pm::read(slot);
        if addr == pm::NULL {
            return Ok(None);
        }
        let idx = IndexRef::at(addr);
        if let Some(ptype) = ptype {
            idx.check_type(ptype)?;
        }
        Ok(Some(idx))
    }

    /// Keeps indices in step with a property change: the (tag, property)
    /// index and the any-tag index both see the old value leave and the new
    /// value arrive.
    pub(crate) fn update(
        &self,
        tx: &TransactionImpl,
        kind: IndexKind,
        tag: StringId,
        obj: u64,
        id: StringId,
        old_value: Option<&Property>,
        new_value: Option<&Property>,
    ) -> Result<()> {
        let db = tx.db();
        let allocator = db.allocator();
        let locale = db.locale();

        let ptype = new_value.map(|p| p.ptype());
        let index = self.get_index(tx, kind, tag, id, ptype)?;
        // The any-tag index coincides with `index` for untagged entities.
        let gindex = if tag.is_none() {
            None
        } else {
            self.get_index(tx, kind, StringId(0), id, ptype)?
        };

        if let Some(old) = old_value {
            if let Some(idx) = &index {
                idx.remove(tx, allocator, old, obj, locale)?;
            }
            if let Some(idx) = &gindex {
                idx.remove(tx, allocator, old, obj, locale)?;
            }
        }
        if let Some(new) = new_value {
            if let Some(idx) = &index {
                idx.add(tx, allocator, new, obj, locale)?;
            }
            if let Some(idx) = &gindex {
                idx.add(tx, allocator, new, obj, locale)?;
            }
        }
        Ok(())
    }

    /// Cursor over every entity with `tag`, via the implicit tag index.
    pub(crate) fn tag_cursor(
        &self,
        tx: &TransactionImpl,
        kind: IndexKind,
        tag: StringId,
    ) -> Result<Option<Rc<dyn ObjCursor>>> {
        match self.get_index(tx, kind, tag, StringId(0), None)? {
            Some(idx) => {
                let c: Rc<dyn ObjCursor> = cursor::cursor_eq::<bool>(tx, idx.tree_pm(), true)?;
                Ok(Some(c))
            }
            None => Ok(None),
        }
    }

    fn kind_entries(&self, tx: &TransactionImpl, kind: IndexKind) -> Result<Vec<(StringId, u64)>> {
        self.tag_list(kind).entries(tx)
    }

    /// Stats for one (kind, tag, property) index.
    pub(crate) fn index_stats(
        &self,
        tx: &TransactionImpl,
        kind: IndexKind,
        tag: StringId,
        property_id: StringId,
    ) -> Result<IndexStats> {
        Ok(self
            .get_index(tx, kind, tag, property_id, None)?
            .map(|idx| idx.stats())
            .unwrap_or_default())
    }

    /// Aggregated stats over every index of a kind.
    pub(crate) fn kind_stats(&self, tx: &TransactionImpl, kind: IndexKind) -> Result<IndexStats> {
        let mut agg = IndexStats {
            health_factor: 0,
            ..IndexStats::default()
        };
        let mut weighted = Vec::new();
        for (_tag, entry) in self.kind_entries(tx, kind)? {
            for (_prop, slot) in IndexList::at(entry).entries(tx)? {
                let addr: u64 = pm::read(slot);
                if addr == pm::NULL {
                    continue;
                }
                let stats = IndexRef::at(addr).stats();
                agg.unique_entries += stats.unique_entries;
                agg.total_elements += stats.total_elements;
                agg.total_size_bytes += stats.total_size_bytes;
                weighted.push(stats);
            }
        }
        if agg.total_elements == 0 {
            agg.health_factor = 100;
        } else {
            for stats in weighted {
                agg.health_factor +=
                    stats.health_factor * stats.total_elements / agg.total_elements;
            }
        }
        Ok(agg)
    }

    /// Stats over the directory chunk lists themselves.
    pub(crate) fn directory_stats(&self, tx: &TransactionImpl) -> Result<ChunkStats> {
        let mut stats = ChunkStats::default();
        for kind in [IndexKind::Node, IndexKind::Edge] {
            let tags = self.tag_list(kind);
            stats.total_chunks += tags.total_chunks(tx)?;
            stats.num_elements += tags.num_elems(tx)?;
            stats.total_size_bytes += tags.size_bytes(tx)?;
            stats.chunk_size = tags.chunk_size_bytes();
            for (_tag, entry) in self.kind_entries(tx, kind)? {
                let ilist = IndexList::at(entry);
                stats.total_chunks += ilist.total_chunks(tx)?;
                stats.num_elements += ilist.num_elems(tx)?;
                stats.total_size_bytes += ilist.size_bytes(tx)?;
            }
        }
        Ok(stats)
    }
}

/// Aggregate statistics for the directory chunk lists.
#[derive(Copy, Clone, Debug, Default)]
pub struct ChunkStats {
    /// Chunks across the directory.
    pub total_chunks: u64,
    /// Bytes per chunk.
    pub chunk_size: u64,
    /// Entries across the directory.
    pub num_elements: u64,
    /// Total bytes, heads included.
    pub total_size_bytes: u64,
}
