use crate::error::{GraphError, Result};
use crate::region::pm;
use crate::region::SyncMode;

/// 2 MiB allocator chunk.
pub const CHUNK_SIZE: u64 = 0x20_0000;
/// 4 KiB small chunk carved out of a 2 MiB chunk by the fixed-size allocator.
pub const SMALL_CHUNK_SIZE: u64 = 4096;
/// Size of the `graph.jdb` header region.
pub(crate) const INFO_SIZE: u64 = 4096;
/// Hard cap on allocator lanes; bounds the header's lane pointer table.
pub(crate) const MAX_ALLOCATORS: u32 = 64;

const SIZE_1GB: u64 = 0x4000_0000;
const SIZE_2MB: u64 = CHUNK_SIZE;
const SIZE_4KB: u64 = 4096;

const DEFAULT_BASE_ADDRESS: u64 = 0x4400_0000_0000;
const DEFAULT_NODE_SIZE: u32 = 64;
const DEFAULT_EDGE_SIZE: u32 = 32;
const DEFAULT_MAX_STRINGID_LENGTH: u32 = 16;
const DEFAULT_MAX_STRINGIDS: u64 = 4096;
const DEFAULT_TRANSACTION_TABLE_SIZE: u64 = SIZE_4KB;
const DEFAULT_JOURNAL_SIZE: u64 = 16 * 1024 * 1024;
const INDEX_MANAGER_SIZE: u64 = SIZE_4KB;
const DEFAULT_TABLE_SIZE: u64 = SIZE_2MB;
const DEFAULT_ALLOCATOR_REGION_SIZE: u64 = 16 * 1024 * 1024;
const DEFAULT_STRIPED_LOCK_SIZE: u64 = SIZE_2MB;
const DEFAULT_STRIPE_WIDTH: u32 = 64;

/// Create-time configuration. Zero/empty fields fall back to defaults.
///
/// Sizing fields are persisted into the graph header (directly or through
/// the component headers they size); lock striping is reconfigurable at
/// every open.
#[derive(Clone, Debug)]
pub struct GraphConfig {
    /// Base virtual address for the region layout. All regions are laid
    /// out above it; the same graph always reopens at the recorded bases.
    pub base_address: u64,
    /// Node record size in bytes; power of two, at least 64.
    pub node_size: u32,
    /// Edge record size in bytes; power of two, at least 32.
    pub edge_size: u32,
    /// Node table region size; multiple of `node_size`.
    pub node_table_size: u64,
    /// Edge table region size; multiple of `edge_size`.
    pub edge_table_size: u64,
    /// Number of allocator lanes; `1..=hardware threads`.
    pub num_allocators: u32,
    /// Generic allocator region size; multiple of 2 MiB, at least 4 MiB.
    pub allocator_region_size: u64,
    /// Transaction table size; 64 bytes per slot.
    pub transaction_table_size: u64,
    /// Journal region size; divided into one extent per transaction slot.
    pub journal_size: u64,
    /// Maximum interned string length; power of two.
    pub max_stringid_length: u32,
    /// String table region size; power of two.
    pub string_table_size: u64,
    /// Striped-lock table sizes per domain, in bytes; powers of two.
    pub node_striped_lock_size: u64,
    /// See `node_striped_lock_size`.
    pub edge_striped_lock_size: u64,
    /// See `node_striped_lock_size`.
    pub index_striped_lock_size: u64,
    /// Bytes of the object space covered by one node-domain stripe.
    pub node_stripe_width: u32,
    /// See `node_stripe_width`.
    pub edge_stripe_width: u32,
    /// See `node_stripe_width`.
    pub index_stripe_width: u32,
    /// Collation locale for string indices. Supported: "", "C", "POSIX".
    pub locale_name: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            base_address: DEFAULT_BASE_ADDRESS,
            node_size: DEFAULT_NODE_SIZE,
            edge_size: DEFAULT_EDGE_SIZE,
            node_table_size: DEFAULT_TABLE_SIZE,
            edge_table_size: DEFAULT_TABLE_SIZE,
            num_allocators: 1,
            allocator_region_size: DEFAULT_ALLOCATOR_REGION_SIZE,
            transaction_table_size: DEFAULT_TRANSACTION_TABLE_SIZE,
            journal_size: DEFAULT_JOURNAL_SIZE,
            max_stringid_length: DEFAULT_MAX_STRINGID_LENGTH,
            string_table_size: DEFAULT_MAX_STRINGIDS * DEFAULT_MAX_STRINGID_LENGTH as u64,
            node_striped_lock_size: DEFAULT_STRIPED_LOCK_SIZE,
            edge_striped_lock_size: DEFAULT_STRIPED_LOCK_SIZE,
            index_striped_lock_size: DEFAULT_STRIPED_LOCK_SIZE,
            node_stripe_width: DEFAULT_STRIPE_WIDTH,
            edge_stripe_width: DEFAULT_STRIPE_WIDTH,
            index_stripe_width: DEFAULT_STRIPE_WIDTH,
            locale_name: String::new(),
        }
    }
}

/// Options governing one `Graph::open` call.
#[derive(Clone, Debug)]
pub struct OpenOptions {
    /// Create the graph if the directory does not hold one yet.
    pub create: bool,
    /// Refuse every mutating path.
    pub read_only: bool,
    /// Persistence mode for this open.
    pub sync_mode: SyncMode,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            create: false,
            read_only: false,
            sync_mode: SyncMode::MsyncOnCommit,
        }
    }
}

impl OpenOptions {
    /// Read-write open that creates the graph when missing.
    pub fn create() -> Self {
        OpenOptions {
            create: true,
            ..OpenOptions::default()
        }
    }

    /// Read-only open of an existing graph.
    pub fn read_only() -> Self {
        OpenOptions {
            read_only: true,
            ..OpenOptions::default()
        }
    }

    /// Replaces the sync mode.
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }
}

/// Name, base address, and length of one mapped region, as laid out at
/// create time and recorded in the graph header.
#[derive(Copy, Clone, Debug)]
#[repr(C)]
pub(crate) struct RegionInfo {
    pub name: [u8; 32],
    pub addr: u64,
    pub len: u64,
}

impl RegionInfo {
    fn new(name: &str, addr: &mut u64, size: u64) -> RegionInfo {
        let alignment = get_alignment(size);
        let mut buf = [0u8; 32];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        let info = RegionInfo {
            name: buf,
            addr: pm::align_up(*addr, alignment),
            len: pm::align_up(size, alignment),
        };
        *addr = info.addr + info.len;
        info
    }

    pub(crate) fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(32);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}

fn get_alignment(size: u64) -> u64 {
    if size >= SIZE_1GB {
        SIZE_1GB
    } else if size >= SIZE_2MB {
        SIZE_2MB
    } else {
        SIZE_4KB
    }
}

/// The validated region layout derived from a `GraphConfig`.
#[derive(Clone, Debug)]
pub(crate) struct GraphLayout {
    pub base_address: u64,
    pub node_size: u32,
    pub edge_size: u32,
    pub num_allocators: u32,
    pub max_stringid_length: u32,
    pub locale_name: String,
    pub indexmanager_info: RegionInfo,
    pub stringtable_info: RegionInfo,
    pub transaction_info: RegionInfo,
    pub journal_info: RegionInfo,
    pub node_info: RegionInfo,
    pub edge_info: RegionInfo,
    pub allocator_info: RegionInfo,
}

fn check_power_of_two(v: u64) -> Result<()> {
    if v == 0 || (v & (v - 1)) != 0 {
        return Err(GraphError::InvalidConfig("value must be a power of two"));
    }
    Ok(())
}

pub(crate) fn locale_supported(name: &str) -> bool {
    matches!(name, "" | "C" | "POSIX")
}

impl GraphConfig {
    /// Validates the configuration and computes the region layout.
    pub(crate) fn build_layout(&self) -> Result<GraphLayout> {
        if self.node_size < DEFAULT_NODE_SIZE {
            return Err(GraphError::InvalidConfig("node size below minimum"));
        }
        check_power_of_two(self.node_size as u64)?;
        if self.edge_size < DEFAULT_EDGE_SIZE {
            return Err(GraphError::InvalidConfig("edge size below minimum"));
        }
        check_power_of_two(self.edge_size as u64)?;
        check_power_of_two(self.max_stringid_length as u64)?;
        check_power_of_two(self.string_table_size)?;
        let num_strings = self.string_table_size / self.max_stringid_length as u64;
        if num_strings == 0 || num_strings > (1 << 16) {
            return Err(GraphError::InvalidConfig("string table holds at most 65536 ids"));
        }

        if self.node_table_size % self.node_size as u64 != 0 {
            return Err(GraphError::InvalidConfig(
                "node table size not a multiple of node size",
            ));
        }
        if self.edge_table_size % self.edge_size as u64 != 0 {
            return Err(GraphError::InvalidConfig(
                "edge table size not a multiple of edge size",
            ));
        }

        if self.allocator_region_size % CHUNK_SIZE != 0 {
            return Err(GraphError::InvalidConfig("invalid allocator region size"));
        }
        if self.allocator_region_size < 2 * CHUNK_SIZE || self.num_allocators < 1 {
            return Err(GraphError::InvalidConfig(
                "cannot even support one allocator instance",
            ));
        }
        if self.num_allocators as u64 * 2 * CHUNK_SIZE > self.allocator_region_size {
            return Err(GraphError::InvalidConfig(
                "not enough space to create so many allocators",
            ));
        }
        let hw = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        if self.num_allocators > hw.max(1) || self.num_allocators > MAX_ALLOCATORS {
            return Err(GraphError::InvalidConfig("too many allocator instances"));
        }

        check_power_of_two(self.node_striped_lock_size)?;
        check_power_of_two(self.edge_striped_lock_size)?;
        check_power_of_two(self.index_striped_lock_size)?;
        check_power_of_two(self.node_stripe_width as u64)?;
        check_power_of_two(self.edge_stripe_width as u64)?;
        check_power_of_two(self.index_stripe_width as u64)?;

        let max_transactions = self.transaction_table_size / 64;
        if max_transactions == 0 {
            return Err(GraphError::InvalidConfig("transaction table too small"));
        }
        if self.journal_size / max_transactions < 128 {
            return Err(GraphError::InvalidConfig("journal extent too small"));
        }

        if !locale_supported(&self.locale_name) {
            return Err(GraphError::InvalidConfig("unsupported locale"));
        }
        if self.locale_name.len() >= 32 {
            return Err(GraphError::InvalidConfig("locale name too long"));
        }

        if self.base_address == 0 || self.base_address % SIZE_2MB != 0 {
            return Err(GraphError::InvalidConfig("base address must be 2 MiB aligned"));
        }

        let mut addr = self.base_address + INFO_SIZE;
        let indexmanager_info = RegionInfo::new("indexmanager.jdb", &mut addr, INDEX_MANAGER_SIZE);
        let stringtable_info = RegionInfo::new("stringtable.jdb", &mut addr, self.string_table_size);
        let transaction_info =
            RegionInfo::new("transaction.jdb", &mut addr, self.transaction_table_size);
        let journal_info = RegionInfo::new("journal.jdb", &mut addr, self.journal_size);
        let node_info = RegionInfo::new("nodes.jdb", &mut addr, self.node_table_size);
        let edge_info = RegionInfo::new("edges.jdb", &mut addr, self.edge_table_size);
        let allocator_info =
            RegionInfo::new("allocator.jdb", &mut addr, self.allocator_region_size);

        Ok(GraphLayout {
            base_address: self.base_address,
            node_size: self.node_size,
            edge_size: self.edge_size,
            num_allocators: self.num_allocators,
            max_stringid_length: self.max_stringid_length,
            locale_name: self.locale_name.clone(),
            indexmanager_info,
            stringtable_info,
            transaction_info,
            journal_info,
            node_info,
            edge_info,
            allocator_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds() {
        let layout = GraphConfig::default().build_layout().unwrap();
        assert_eq!(layout.allocator_info.addr % CHUNK_SIZE, 0);
        assert!(layout.indexmanager_info.addr >= layout.base_address + INFO_SIZE);
        assert_eq!(layout.node_info.name_str(), "nodes.jdb");
    }

    #[test]
    fn rejects_bad_node_size() {
        let cfg = GraphConfig {
            node_size: 48,
            ..GraphConfig::default()
        };
        assert!(matches!(
            cfg.build_layout(),
            Err(GraphError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_undersized_allocator_region() {
        let cfg = GraphConfig {
            allocator_region_size: CHUNK_SIZE,
            ..GraphConfig::default()
        };
        assert!(cfg.build_layout().is_err());
    }

    #[test]
    fn rejects_unknown_locale() {
        let cfg = GraphConfig {
            locale_name: "xx_YY.UTF-8".to_string(),
            ..GraphConfig::default()
        };
        assert!(cfg.build_layout().is_err());
    }
}
