//! Graph façade: opens the region set, composes the components, and
//! exposes the public operations.

pub(crate) mod edge;
pub(crate) mod node;

use std::mem::offset_of;
use std::path::Path;

use tracing::{debug, info};

use crate::alloc::{fixed::FixedAllocator, Allocator, AllocatorHdr};
use crate::config::{GraphConfig, GraphLayout, OpenOptions, RegionInfo, INFO_SIZE};
use crate::error::{GraphError, Result};
use crate::index::{IndexKind, IndexManager, IndexStats};
use crate::iter::{EdgeIterator, NodeIterator};
use crate::region::{pm, MapRegion, RangeSet, SyncMode};
use crate::strings::StringTable;
use crate::tx::{lock::StripedLock, InitParams, LockDomain, TransactionImpl};
use crate::types::{EdgeId, NodeId, PropertyPredicate, PropertyType, StringId};

pub use edge::EdgeRef;
pub use node::NodeRef;

const VERSION: u64 = 1;
const INFO_NAME: &str = "graph.jdb";

/// The 4 KiB header at the start of `graph.jdb`.
#[allow(dead_code)] // accessed through field offsets
#[repr(C)]
struct GraphInfo {
    version: u64,
    crc: u32,
    _pad: u32,
    base_address: u64,
    indexmanager_info: RegionInfo,
    stringtable_info: RegionInfo,
    transaction_info: RegionInfo,
    journal_info: RegionInfo,
    node_info: RegionInfo,
    edge_info: RegionInfo,
    allocator_info: RegionInfo,
    max_stringid_length: u32,
    _pad2: u32,
    locale_name: [u8; 32],
    // Allocator metadata lives in the header to avoid spending allocator
    // pages on it.
    allocator_hdr: AllocatorHdr,
}

const _: () = assert!(std::mem::size_of::<GraphInfo>() as u64 <= INFO_SIZE);

// The checksum covers the fixed descriptor fields; the allocator header
// mutates during normal operation.
const CRC_START: usize = 16;
const CRC_END: usize = offset_of!(GraphInfo, allocator_hdr);

fn header_crc(base: u64) -> u32 {
    crc32fast::hash(pm::bytes(base + CRC_START as u64, CRC_END - CRC_START))
}

fn read_region_info(buf_base: u64, field_offset: usize) -> RegionInfo {
    pm::read_unaligned(buf_base + field_offset as u64)
}

/// Per-table allocator statistics.
#[derive(Clone, Debug)]
pub struct AllocatorStats {
    /// Which allocator the row describes.
    pub name: &'static str,
    /// Object size, zero for the variable-size allocator.
    pub object_size: u32,
    /// Live objects.
    pub num_objects: u64,
    /// Bytes in live objects.
    pub used_bytes: u64,
    /// Bytes in the backing region.
    pub region_size: u64,
    /// used / region, percent.
    pub occupancy: u32,
    /// used / touched, percent.
    pub health: u32,
}

pub(crate) struct GraphImpl {
    // Dropped last, after every component handle is gone.
    _info_region: Option<MapRegion>,
    _regions: Vec<MapRegion>,
    read_only: bool,
    msync_needed: bool,
    always_msync: bool,
    locale: String,
    node_size: u32,
    edge_size: u32,
    node_table_lock_addr: u64,
    edge_table_lock_addr: u64,
    transaction_manager: crate::tx::TransactionManager,
    index_manager: IndexManager,
    string_table: StringTable,
    node_table: FixedAllocator,
    edge_table: FixedAllocator,
    allocator: Allocator,
    node_locks: StripedLock,
    edge_locks: StripedLock,
    index_locks: StripedLock,
}

impl GraphImpl {
    pub(crate) fn transaction_manager(&self) -> &crate::tx::TransactionManager {
        &self.transaction_manager
    }

    pub(crate) fn index_manager(&self) -> &IndexManager {
        &self.index_manager
    }

    pub(crate) fn string_table(&self) -> &StringTable {
        &self.string_table
    }

    pub(crate) fn node_table(&self) -> &FixedAllocator {
        &self.node_table
    }

    pub(crate) fn edge_table(&self) -> &FixedAllocator {
        &self.edge_table
    }

    pub(crate) fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub(crate) fn locale(&self) -> &str {
        &self.locale
    }

    pub(crate) fn node_size(&self) -> u32 {
        self.node_size
    }

    pub(crate) fn edge_size(&self) -> u32 {
        self.edge_size
    }

    /// Stable address standing for the whole node table in the lock space.
    pub(crate) fn node_table_lock_addr(&self) -> u64 {
        self.node_table_lock_addr
    }

    pub(crate) fn edge_table_lock_addr(&self) -> u64 {
        self.edge_table_lock_addr
    }

    pub(crate) fn locks(&self, domain: LockDomain) -> &StripedLock {
        match domain {
            LockDomain::Node => &self.node_locks,
            LockDomain::Edge => &self.edge_locks,
            LockDomain::Index => &self.index_locks,
        }
    }

    pub(crate) fn check_read_write(&self) -> Result<()> {
        if self.read_only {
            return Err(GraphError::ReadOnly);
        }
        Ok(())
    }

    pub(crate) fn msync_options(&self) -> (bool, bool) {
        (self.msync_needed, self.always_msync)
    }
}

/// Process-level handle to one on-media graph.
pub struct Graph {
    inner: Box<GraphImpl>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph").finish_non_exhaustive()
    }
}

impl Graph {
    /// Opens (or creates) the graph stored in `path`.
    ///
    /// `config` sizes a graph being created and chooses lock striping for
    /// every open; an existing graph's persistent layout comes from its
    /// header, which must match this build's version and checksum.
    pub fn open(path: impl AsRef<Path>, config: &GraphConfig, options: &OpenOptions) -> Result<Graph> {
        let path = path.as_ref();
        let info_path = path.join(INFO_NAME);
        let create = options.create && !info_path.exists();
        if create && options.read_only {
            return Err(GraphError::ReadOnly);
        }

        let (msync_needed, always_msync) = match options.sync_mode {
            SyncMode::NoMsync => (false, false),
            SyncMode::MsyncOnCommit => (true, false),
            SyncMode::AlwaysMsync => (true, true),
        };
        let params = InitParams {
            create,
            read_only: options.read_only,
            msync_needed,
            always_msync,
            pending: std::cell::RefCell::new(RangeSet::new()),
        };

        let inner = if create {
            Self::create_impl(path, config, params)?
        } else {
            Self::open_impl(path, config, params)?
        };

        info!(path = %path.display(), create, "graph opened");
        let graph = Graph { inner };
        if create {
            graph.inner.allocator.init_extra_units(&graph.inner)?;
        }
        Ok(graph)
    }

    fn create_impl(
        path: &Path,
        config: &GraphConfig,
        params: InitParams,
    ) -> Result<Box<GraphImpl>> {
        let layout = config.build_layout()?;
        std::fs::create_dir_all(path)
            .map_err(|e| GraphError::open_failed(path.display().to_string(), e))?;

        let info_region = MapRegion::map(
            path,
            INFO_NAME,
            layout.base_address,
            INFO_SIZE,
            true,
            false,
        )?;
        write_header(layout.base_address, &layout);

        let regions = map_regions(path, &layout_infos(&layout), true, false)?;
        let inner = build_components(config, &layout, info_region, regions, params)?;
        Ok(inner)
    }

    fn open_impl(path: &Path, config: &GraphConfig, params: InitParams) -> Result<Box<GraphImpl>> {
        // The header is read with plain file I/O first; everything,
        // including the header region itself, then maps at the addresses
        // the header records.
        let info_path = path.join(INFO_NAME);
        let buf = std::fs::read(&info_path)
            .map_err(|e| GraphError::open_failed(info_path.display().to_string(), e))?;
        if buf.len() as u64 != INFO_SIZE {
            return Err(GraphError::open_failed(
                info_path.display().to_string(),
                std::io::Error::new(std::io::ErrorKind::InvalidData, "header has unexpected size"),
            ));
        }
        let buf_base = buf.as_ptr() as u64;

        let version: u64 = pm::read_unaligned(buf_base + offset_of!(GraphInfo, version) as u64);
        if version != VERSION {
            return Err(GraphError::VersionMismatch {
                found: version,
                expected: VERSION,
            });
        }
        let stored_crc: u32 = pm::read_unaligned(buf_base + offset_of!(GraphInfo, crc) as u64);
        let computed =
            crc32fast::hash(&buf[CRC_START..CRC_END]);
        if stored_crc != computed {
            return Err(GraphError::open_failed(
                info_path.display().to_string(),
                std::io::Error::new(std::io::ErrorKind::InvalidData, "header checksum mismatch"),
            ));
        }

        let base_address: u64 =
            pm::read_unaligned(buf_base + offset_of!(GraphInfo, base_address) as u64);
        let max_stringid_length: u32 =
            pm::read_unaligned(buf_base + offset_of!(GraphInfo, max_stringid_length) as u64);
        let locale_bytes: [u8; 32] =
            pm::read_unaligned(buf_base + offset_of!(GraphInfo, locale_name) as u64);
        let locale_end = locale_bytes.iter().position(|&b| b == 0).unwrap_or(32);
        let locale = String::from_utf8_lossy(&locale_bytes[..locale_end]).into_owned();

        let layout = GraphLayout {
            base_address,
            // Record sizes reload from the table headers.
            node_size: 0,
            edge_size: 0,
            num_allocators: 0,
            max_stringid_length,
            locale_name: locale,
            indexmanager_info: read_region_info(buf_base, offset_of!(GraphInfo, indexmanager_info)),
            stringtable_info: read_region_info(buf_base, offset_of!(GraphInfo, stringtable_info)),
            transaction_info: read_region_info(buf_base, offset_of!(GraphInfo, transaction_info)),
            journal_info: read_region_info(buf_base, offset_of!(GraphInfo, journal_info)),
            node_info: read_region_info(buf_base, offset_of!(GraphInfo, node_info)),
            edge_info: read_region_info(buf_base, offset_of!(GraphInfo, edge_info)),
            allocator_info: read_region_info(buf_base, offset_of!(GraphInfo, allocator_info)),
        };
        drop(buf);

        let info_region = MapRegion::map(
            path,
            INFO_NAME,
            base_address,
            INFO_SIZE,
            false,
            // The allocator header in this region is written during normal
            // operation; map writable unless the whole open is read-only.
            params.read_only,
        )?;
        let regions = map_regions(path, &layout_infos(&layout), false, params.read_only)?;
        build_components(config, &layout, info_region, regions, params)
    }

    pub(crate) fn inner(&self) -> &GraphImpl {
        &self.inner
    }

    // ---- strings ----------------------------------------------------

    /// Interns `name`, producing its 16-bit id. Requires an active
    /// transaction when the string is new.
    pub fn intern(&self, name: &str) -> Result<StringId> {
        Ok(self.inner.string_table.get(name, true)?.0)
    }

    /// Looks `name` up without interning; `None` when absent.
    pub fn lookup_string(&self, name: &str) -> Result<Option<StringId>> {
        let (id, existed) = self.inner.string_table.get(name, false)?;
        Ok(existed.then_some(id))
    }

    /// The string behind an id.
    pub fn string_name(&self, id: StringId) -> String {
        self.inner.string_table.name(id)
    }

    // ---- mutations --------------------------------------------------

    /// Adds a node with `tag` (0 for untagged).
    pub fn add_node(&self, tag: StringId) -> Result<NodeRef> {
        let tx = TransactionImpl::current()?;
        tx.check_read_write()?;
        // The table allocator has no locking of its own; one write stripe
        // covers it for the transaction.
        tx.acquire_lock(LockDomain::Node, self.inner.node_table_lock_addr(), true)?;
        let addr = self.inner.node_table.alloc(tx)?;
        node::init_node(tx, &self.inner, addr, tag)?;
        self.inner
            .index_manager
            .add_entity(tx, &self.inner.allocator, IndexKind::Node, tag, addr)?;
        Ok(NodeRef::at(addr))
    }

    /// Adds a directed edge `src -> dest` with `tag`.
    pub fn add_edge(&self, src: NodeRef, dest: NodeRef, tag: StringId) -> Result<EdgeRef> {
        let tx = TransactionImpl::current()?;
        tx.check_read_write()?;
        tx.acquire_lock(LockDomain::Edge, self.inner.edge_table_lock_addr(), true)?;
        let addr = self.inner.edge_table.alloc(tx)?;
        edge::init_edge(tx, &self.inner, addr, src.addr(), dest.addr(), tag)?;
        node::add_edge_half(tx, &self.inner, src.addr(), addr, dest.addr(), tag, true)?;
        node::add_edge_half(tx, &self.inner, dest.addr(), addr, src.addr(), tag, false)?;
        self.inner
            .index_manager
            .add_entity(tx, &self.inner.allocator, IndexKind::Edge, tag, addr)?;
        Ok(EdgeRef::at(addr))
    }

    /// Removes a node, its edges, its properties, and its index entries.
    pub fn remove_node(&self, node: NodeRef) -> Result<()> {
        let tx = TransactionImpl::current()?;
        tx.check_read_write()?;
        tx.acquire_lock(LockDomain::Node, self.inner.node_table_lock_addr(), true)?;
        tx.acquire_lock(LockDomain::Node, node.addr(), true)?;

        // Edges go first so every lock is taken before any work happens.
        let mut edges = node.edges(crate::types::Direction::Any, None)?;
        let mut doomed = Vec::new();
        while edges.valid() {
            doomed.push(edges.get()?);
            edges.next()?;
        }
        for e in doomed {
            self.remove_edge(e)?;
        }

        let tag = node.tag_raw();
        self.inner
            .index_manager
            .remove_entity(tx, &self.inner.allocator, IndexKind::Node, tag, node.addr())?;
        node::destroy_node(tx, &self.inner, node.addr())?;
        self.inner.node_table.free(tx, node.addr());
        Ok(())
    }

    /// Removes an edge: detaches both endpoints, then drops properties and
    /// index entries.
    pub fn remove_edge(&self, edge: EdgeRef) -> Result<()> {
        let tx = TransactionImpl::current()?;
        tx.check_read_write()?;
        tx.acquire_lock(LockDomain::Edge, self.inner.edge_table_lock_addr(), true)?;
        tx.acquire_lock(LockDomain::Edge, edge.addr(), true)?;

        let tag = edge.tag_raw();
        node::remove_edge_half(tx, &self.inner, edge.source_addr(), edge.addr(), tag, true)?;
        node::remove_edge_half(tx, &self.inner, edge.dest_addr(), edge.addr(), tag, false)?;
        self.inner
            .index_manager
            .remove_entity(tx, &self.inner.allocator, IndexKind::Edge, tag, edge.addr())?;
        edge::destroy_edge(tx, &self.inner, edge.addr())?;
        self.inner.edge_table.free(tx, edge.addr());
        Ok(())
    }

    /// Creates an index for `ptype` values of `property_id` on entities
    /// tagged `tag` (0 indexes the property across every tag).
    pub fn create_index(
        &self,
        kind: IndexKind,
        tag: StringId,
        property_id: StringId,
        ptype: PropertyType,
    ) -> Result<()> {
        let tx = TransactionImpl::current()?;
        tx.check_read_write()?;
        self.inner.index_manager.create_index(
            tx,
            &self.inner.allocator,
            kind,
            tag,
            property_id,
            ptype,
        )
    }

    // ---- queries ----------------------------------------------------

    /// Every node, by table scan.
    pub fn get_nodes(&self) -> Result<NodeIterator> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Node, self.inner.node_table_lock_addr(), false)?;
        Ok(NodeIterator::table_scan(self.inner.node_table))
    }

    /// Nodes with `tag`, via the implicit tag index.
    pub fn get_nodes_by_tag(&self, tag: StringId) -> Result<NodeIterator> {
        if tag.is_none() {
            return self.get_nodes();
        }
        let tx = TransactionImpl::current()?;
        match self.inner.index_manager.tag_cursor(tx, IndexKind::Node, tag)? {
            Some(cursor) => Ok(NodeIterator::index(cursor)),
            None => Ok(NodeIterator::empty()),
        }
    }

    /// Nodes matching a predicate: an exact index when one exists, then the
    /// tag index (or a scan) with filtering.
    pub fn get_nodes_where(
        &self,
        tag: StringId,
        pp: &PropertyPredicate,
        reverse: bool,
    ) -> Result<NodeIterator> {
        if pp.id.is_none() {
            return self.get_nodes_by_tag(tag);
        }
        let tx = TransactionImpl::current()?;
        match self
            .inner
            .index_manager
            .get_index(tx, IndexKind::Node, tag, pp.id, None)?
        {
            Some(index) => {
                let cursor = index.open_cursor(tx, pp, &self.inner.locale, reverse)?;
                Ok(NodeIterator::index(cursor))
            }
            None => Ok(self.get_nodes_by_tag(tag)?.filter(pp.clone())),
        }
    }

    /// Every edge, by table scan.
    pub fn get_edges(&self) -> Result<EdgeIterator> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Edge, self.inner.edge_table_lock_addr(), false)?;
        Ok(EdgeIterator::table_scan(self.inner.edge_table))
    }

    /// Edges with `tag`, via the implicit tag index.
    pub fn get_edges_by_tag(&self, tag: StringId) -> Result<EdgeIterator> {
        if tag.is_none() {
            return self.get_edges();
        }
        let tx = TransactionImpl::current()?;
        match self.inner.index_manager.tag_cursor(tx, IndexKind::Edge, tag)? {
            Some(cursor) => Ok(EdgeIterator::index(cursor)),
            None => Ok(EdgeIterator::empty()),
        }
    }

    /// Edges matching a predicate; see `get_nodes_where`.
    pub fn get_edges_where(
        &self,
        tag: StringId,
        pp: &PropertyPredicate,
        reverse: bool,
    ) -> Result<EdgeIterator> {
        if pp.id.is_none() {
            return self.get_edges_by_tag(tag);
        }
        let tx = TransactionImpl::current()?;
        match self
            .inner
            .index_manager
            .get_index(tx, IndexKind::Edge, tag, pp.id, None)?
        {
            Some(index) => {
                let cursor = index.open_cursor(tx, pp, &self.inner.locale, reverse)?;
                Ok(EdgeIterator::index(cursor))
            }
            None => Ok(self.get_edges_by_tag(tag)?.filter(pp.clone())),
        }
    }

    /// The node's slot ordinal.
    pub fn node_id(&self, node: NodeRef) -> Result<NodeId> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Node, node.addr(), false)?;
        Ok(NodeId(self.inner.node_table.get_id(node.addr())))
    }

    /// The edge's slot ordinal.
    pub fn edge_id(&self, edge: EdgeRef) -> Result<EdgeId> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Edge, edge.addr(), false)?;
        Ok(EdgeId(self.inner.edge_table.get_id(edge.addr())))
    }

    /// The node at a previously observed id; `None` for never-allocated
    /// ids, an error for freed slots.
    pub fn node_by_id(&self, id: NodeId) -> Result<Option<NodeRef>> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Node, self.inner.node_table_lock_addr(), false)?;
        match self.inner.node_table.by_id(id.0) {
            Some(addr) if !self.inner.node_table.is_free(addr) => Ok(Some(NodeRef::at(addr))),
            Some(_) => Err(GraphError::VacantIterator),
            None => Ok(None),
        }
    }

    // ---- stats ------------------------------------------------------

    /// Allocator statistics for the node table, edge table, and generic
    /// allocator.
    pub fn allocator_stats(&self) -> Vec<AllocatorStats> {
        let nt = &self.inner.node_table;
        let et = &self.inner.edge_table;
        let al = &self.inner.allocator;
        vec![
            AllocatorStats {
                name: "NodeTable",
                object_size: nt.object_size(),
                num_objects: nt.num_allocated().max(0) as u64,
                used_bytes: nt.used_bytes(),
                region_size: nt.region_size(),
                occupancy: nt.occupancy(),
                health: nt.health(),
            },
            AllocatorStats {
                name: "EdgeTable",
                object_size: et.object_size(),
                num_objects: et.num_allocated().max(0) as u64,
                used_bytes: et.used_bytes(),
                region_size: et.region_size(),
                occupancy: et.occupancy(),
                health: et.health(),
            },
            AllocatorStats {
                name: "GenericAllocator",
                object_size: 0,
                num_objects: 0,
                used_bytes: al.used_bytes(),
                region_size: al.region_size(),
                occupancy: al.occupancy(),
                health: al.health(),
            },
        ]
    }

    /// Statistics for one index.
    pub fn index_stats(
        &self,
        kind: IndexKind,
        tag: StringId,
        property_id: StringId,
    ) -> Result<IndexStats> {
        let tx = TransactionImpl::current()?;
        self.inner.index_manager.index_stats(tx, kind, tag, property_id)
    }

    /// Aggregated statistics over every index of a kind.
    pub fn kind_index_stats(&self, kind: IndexKind) -> Result<IndexStats> {
        let tx = TransactionImpl::current()?;
        self.inner.index_manager.kind_stats(tx, kind)
    }

    /// Statistics for the index directory chunk lists.
    pub fn chunk_list_stats(&self) -> Result<crate::index::ChunkStats> {
        let tx = TransactionImpl::current()?;
        self.inner.index_manager.directory_stats(tx)
    }
}

fn layout_infos(layout: &GraphLayout) -> [RegionInfo; 7] {
    [
        layout.indexmanager_info,
        layout.stringtable_info,
        layout.transaction_info,
        layout.journal_info,
        layout.node_info,
        layout.edge_info,
        layout.allocator_info,
    ]
}

fn map_regions(
    path: &Path,
    infos: &[RegionInfo; 7],
    create: bool,
    read_only: bool,
) -> Result<Vec<MapRegion>> {
    let mut regions = Vec::with_capacity(infos.len());
    for info in infos {
        debug!(
            "mapping region {} at {:#x} (len {})",
            info.name_str(),
            info.addr,
            info.len
        );
        regions.push(MapRegion::map(
            path,
            info.name_str(),
            info.addr,
            info.len,
            create,
            read_only,
        )?);
    }
    Ok(regions)
}

fn write_header(base: u64, layout: &GraphLayout) {
    pm::write(base + offset_of!(GraphInfo, version) as u64, VERSION);
    pm::write(base + offset_of!(GraphInfo, base_address) as u64, layout.base_address);
    pm::write(
        base + offset_of!(GraphInfo, indexmanager_info) as u64,
        layout.indexmanager_info,
    );
    pm::write(
        base + offset_of!(GraphInfo, stringtable_info) as u64,
        layout.stringtable_info,
    );
    pm::write(
        base + offset_of!(GraphInfo, transaction_info) as u64,
        layout.transaction_info,
    );
    pm::write(base + offset_of!(GraphInfo, journal_info) as u64, layout.journal_info);
    pm::write(base + offset_of!(GraphInfo, node_info) as u64, layout.node_info);
    pm::write(base + offset_of!(GraphInfo, edge_info) as u64, layout.edge_info);
    pm::write(
        base + offset_of!(GraphInfo, allocator_info) as u64,
        layout.allocator_info,
    );
    pm::write(
        base + offset_of!(GraphInfo, max_stringid_length) as u64,
        layout.max_stringid_length,
    );
    let mut locale = [0u8; 32];
    locale[..layout.locale_name.len()].copy_from_slice(layout.locale_name.as_bytes());
    pm::write(base + offset_of!(GraphInfo, locale_name) as u64, locale);
    pm::write(base + offset_of!(GraphInfo, crc) as u64, header_crc(base));
}

fn build_components(
    config: &GraphConfig,
    layout: &GraphLayout,
    info_region: MapRegion,
    regions: Vec<MapRegion>,
    params: InitParams,
) -> Result<Box<GraphImpl>> {
    let base = info_region.addr();
    let allocator_hdr = base + offset_of!(GraphInfo, allocator_hdr) as u64;

    // Recovery must run before any other component touches the regions.
    let transaction_manager = crate::tx::TransactionManager::new(
        layout.transaction_info.addr,
        layout.transaction_info.len,
        layout.journal_info.addr,
        layout.journal_info.len,
        &params,
    )?;
    let index_manager = IndexManager::new(layout.indexmanager_info.addr, &params);
    let string_table = StringTable::new(
        layout.stringtable_info.addr,
        layout.stringtable_info.len,
        layout.max_stringid_length,
        &params,
    );
    let node_table = FixedAllocator::new(
        layout.node_info.addr,
        layout.node_info.addr,
        layout.node_size,
        layout.node_info.len,
        params.create,
        &params,
    );
    let edge_table = FixedAllocator::new(
        layout.edge_info.addr,
        layout.edge_info.addr,
        layout.edge_size,
        layout.edge_info.len,
        params.create,
        &params,
    );
    let allocator = Allocator::new(
        layout.allocator_info.addr,
        layout.allocator_info.len,
        allocator_hdr,
        layout.num_allocators,
        &params,
    );

    params.sync()?;

    Ok(Box::new(GraphImpl {
        read_only: params.read_only,
        msync_needed: params.msync_needed,
        always_msync: params.always_msync,
        locale: layout.locale_name.clone(),
        node_size: node_table.object_size(),
        edge_size: edge_table.object_size(),
        node_table_lock_addr: layout.node_info.addr,
        edge_table_lock_addr: layout.edge_info.addr,
        transaction_manager,
        index_manager,
        string_table,
        node_table,
        edge_table,
        allocator,
        node_locks: StripedLock::new(config.node_striped_lock_size, config.node_stripe_width),
        edge_locks: StripedLock::new(config.edge_striped_lock_size, config.edge_stripe_width),
        index_locks: StripedLock::new(config.index_striped_lock_size, config.index_stripe_width),
        _info_region: Some(info_region),
        _regions: regions,
    }))
}
