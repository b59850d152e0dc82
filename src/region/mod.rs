//! Fixed virtual-address region mapping.
//!
//! Every persistent region of a graph is a file mapped at a fixed virtual
//! address chosen at create time and recorded in the graph header. Raw
//! pointers stored inside regions therefore serialize to themselves and
//! remain valid across reopenings.

#![allow(unsafe_code)]

pub(crate) mod pm;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{GraphError, Result};

/// Persistence mode selected at open time.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SyncMode {
    /// Never sync; durability is limited to what the OS writes back.
    NoMsync,
    /// Accumulate dirty page ranges and sync them at commit points.
    MsyncOnCommit,
    /// Sync after every flush.
    AlwaysMsync,
}

/// Page granularity used for range accumulation and msync.
pub(crate) const PAGE_SIZE: u64 = 4096;

/// A set of dirty byte ranges, merged on insertion, page-aligned.
///
/// Used by the `MsyncOnCommit` mode to coalesce flushes into a small number
/// of msync calls at commit time.
#[derive(Default, Debug)]
pub(crate) struct RangeSet {
    ranges: BTreeMap<u64, u64>,
}

impl RangeSet {
    pub(crate) fn new() -> Self {
        RangeSet::default()
    }

    /// Adds `[start, end)`, merging with any adjacent or overlapping ranges.
    pub(crate) fn add(&mut self, start: u64, end: u64) {
        if start == end {
            return;
        }
        let mut start = start;
        let mut end = end;

        // Merge with a predecessor that reaches into the new range.
        if let Some((&ps, &pe)) = self.ranges.range(..=start).next_back() {
            if pe >= start {
                start = ps;
                end = end.max(pe);
                self.ranges.remove(&ps);
            }
        }
        // Absorb successors the new range overlaps.
        loop {
            let next = self.ranges.range(start..=end).next().map(|(&s, &e)| (s, e));
            match next {
                Some((s, e)) => {
                    end = end.max(e);
                    self.ranges.remove(&s);
                }
                None => break,
            }
        }
        self.ranges.insert(start, end);
    }

    /// Adds the page range covering `[addr, addr + len)`.
    pub(crate) fn add_page_span(&mut self, addr: u64, len: u64) {
        let start = pm::align_down(addr, PAGE_SIZE);
        let end = pm::align_up(addr + len, PAGE_SIZE);
        self.add(start, end);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Syncs every accumulated range to durable media and clears the set.
    pub(crate) fn sync(&mut self) -> Result<()> {
        for (&start, &end) in &self.ranges {
            sys::msync(start, end - start)?;
        }
        self.ranges.clear();
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.ranges.clear();
    }
}

/// One mapped region file. Unmapped and closed on drop.
#[derive(Debug)]
pub(crate) struct MapRegion {
    addr: u64,
    len: u64,
    path: PathBuf,
}

impl MapRegion {
    /// Maps `dir/name` at exactly `addr` for `len` bytes.
    ///
    /// With `create`, a missing file is created and sized to `len`; an
    /// existing file of exactly `len` bytes is mapped as-is. Any size
    /// mismatch refuses to open. Failure to obtain the exact address fails
    /// with `OpenFailed`.
    pub(crate) fn map(
        dir: &Path,
        name: &str,
        addr: u64,
        len: u64,
        create: bool,
        read_only: bool,
    ) -> Result<MapRegion> {
        let path = dir.join(name);
        sys::map_fixed(&path, addr, len, create, read_only)?;
        Ok(MapRegion { addr, len, path })
    }

    pub(crate) fn addr(&self) -> u64 {
        self.addr
    }
}

impl Drop for MapRegion {
    fn drop(&mut self) {
        if let Err(err) = sys::unmap(self.addr, self.len) {
            tracing::warn!(path = %self.path.display(), %err, "unmap failed");
        }
    }
}

#[cfg(unix)]
mod sys {
    use super::*;
    use std::fs::OpenOptions;
    use std::io;
    use std::os::unix::io::AsRawFd;

    pub(super) fn map_fixed(
        path: &Path,
        addr: u64,
        len: u64,
        create: bool,
        read_only: bool,
    ) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(create && !read_only)
            .open(path)
            .map_err(|e| GraphError::open_failed(path.display().to_string(), e))?;

        let size = file
            .metadata()
            .map_err(|e| GraphError::open_failed(path.display().to_string(), e))?
            .len();

        if size != len {
            if size == 0 && create {
                if read_only {
                    return Err(GraphError::ReadOnly);
                }
                // Regions are sized sparse; space is consumed as pages dirty.
                file.set_len(len)
                    .map_err(|e| match e.raw_os_error() {
                        Some(code) if code == libc::ENOSPC => GraphError::OutOfSpace,
                        _ => GraphError::open_failed(path.display().to_string(), e),
                    })?;
            } else {
                return Err(GraphError::open_failed(
                    path.display().to_string(),
                    io::Error::new(io::ErrorKind::InvalidData, "region file has unexpected size"),
                ));
            }
        }

        // Fail instead of clobbering an existing mapping where the OS can
        // tell us; elsewhere fall back to plain fixed mapping.
        #[cfg(target_os = "linux")]
        let fixed_flag = libc::MAP_FIXED_NOREPLACE;
        #[cfg(not(target_os = "linux"))]
        let fixed_flag = libc::MAP_FIXED;

        let prot = libc::PROT_READ | if read_only { 0 } else { libc::PROT_WRITE };
        let flags = libc::MAP_SHARED | fixed_flag;
        let mapped = unsafe {
            libc::mmap(
                addr as *mut libc::c_void,
                len as libc::size_t,
                prot,
                flags,
                file.as_raw_fd(),
                0,
            )
        };
        if mapped == libc::MAP_FAILED || mapped as u64 != addr {
            if mapped != libc::MAP_FAILED {
                unsafe { libc::munmap(mapped, len as libc::size_t) };
            }
            return Err(GraphError::open_failed(
                format!("{} (mmap at {:#x})", path.display(), addr),
                io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    pub(super) fn unmap(addr: u64, len: u64) -> Result<()> {
        let rc = unsafe { libc::munmap(addr as *mut libc::c_void, len as libc::size_t) };
        if rc != 0 {
            return Err(GraphError::open_failed(
                format!("munmap at {addr:#x}"),
                io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    pub(super) fn msync(addr: u64, len: u64) -> Result<()> {
        let rc = unsafe {
            libc::msync(addr as *mut libc::c_void, len as libc::size_t, libc::MS_SYNC)
        };
        if rc != 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(code) if code == libc::ENOSPC => GraphError::OutOfSpace,
                _ => GraphError::open_failed(format!("msync at {addr:#x}"), err),
            });
        }
        Ok(())
    }
}

#[cfg(not(unix))]
mod sys {
    use super::*;
    use std::io;

    pub(super) fn map_fixed(
        path: &Path,
        _addr: u64,
        _len: u64,
        _create: bool,
        _read_only: bool,
    ) -> Result<()> {
        Err(GraphError::open_failed(
            path.display().to_string(),
            io::Error::new(
                io::ErrorKind::Unsupported,
                "fixed-address mapping unsupported on this platform",
            ),
        ))
    }

    pub(super) fn unmap(_addr: u64, _len: u64) -> Result<()> {
        Ok(())
    }

    pub(super) fn msync(_addr: u64, _len: u64) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rangeset_merges_overlaps() {
        let mut rs = RangeSet::new();
        rs.add(0x1000, 0x2000);
        rs.add(0x3000, 0x4000);
        rs.add(0x1800, 0x3800);
        assert_eq!(rs.ranges.len(), 1);
        assert_eq!(rs.ranges.get(&0x1000), Some(&0x4000));
    }

    #[test]
    fn rangeset_keeps_disjoint() {
        let mut rs = RangeSet::new();
        rs.add(0x1000, 0x2000);
        rs.add(0x5000, 0x6000);
        assert_eq!(rs.ranges.len(), 2);
        rs.add(0x2000, 0x3000);
        assert_eq!(rs.ranges.len(), 2);
        assert_eq!(rs.ranges.get(&0x1000), Some(&0x3000));
    }

    #[test]
    fn page_span_alignment() {
        let mut rs = RangeSet::new();
        rs.add_page_span(0x1234, 8);
        assert_eq!(rs.ranges.get(&0x1000), Some(&0x2000));
    }
}
