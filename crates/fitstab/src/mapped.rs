//! Memory-mapped region ownership.
//!
//! A [`RegionBuffer`] owns at most one live mapping of a file byte-range
//! and hands out [`RegionView`]s: read-only windows with independent
//! cursors that share the mapping. The buffer tracks the views it issued
//! in a live-set behind one coarse lock; when the last view is disposed,
//! the mapping goes to the configured [`Unmapper`] for prompt release of
//! its native resources.
//!
//! Disposal consumes the view, so reading through a view whose mapping was
//! released is unrepresentable rather than merely discouraged. Views that
//! are dropped without being disposed keep the mapping alive through their
//! shared handle; the buffer then releases it on the next live-set drain.

use std::collections::HashSet;
use std::fs::File;
use std::sync::Arc;

use memmap2::{Mmap, MmapOptions};
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Mapping starts are aligned down to this granularity, which covers the
/// Windows allocation granularity and every page size up to 64 KiB.
const MAP_ALIGN: u64 = 64 * 1024;

/// Soft default for the per-session mapped-byte budget.
pub const DEFAULT_MAP_BUDGET: u64 = 2 * 1024 * 1024 * 1024;

/// Immutable description of the file byte-range a reader covers.
#[derive(Debug, Clone)]
pub struct ByteRegion {
    file: Arc<File>,
    start: u64,
    len: u64,
}

impl ByteRegion {
    pub fn new(file: Arc<File>, start: u64, len: u64) -> ByteRegion {
        ByteRegion { file, start, len }
    }

    /// Byte offset of the region within the file.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Region length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A sub-range of this region, clamped to its end.
    pub fn subrange(&self, offset: u64, len: u64) -> ByteRegion {
        let offset = offset.min(self.len);
        ByteRegion {
            file: Arc::clone(&self.file),
            start: self.start + offset,
            len: len.min(self.len - offset),
        }
    }
}

/// One live mapping of a region.
///
/// Holds the lead-in bytes the start alignment forced; `bytes()` exposes
/// only the region's own range.
#[derive(Debug)]
pub struct MapSegment {
    map: Mmap,
    lead: usize,
    len: usize,
}

impl MapSegment {
    fn bytes(&self) -> &[u8] {
        &self.map[self.lead..self.lead + self.len]
    }

    /// Region bytes covered by this mapping.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total bytes the native mapping occupies, lead-in included.
    pub fn mapped_len(&self) -> usize {
        self.map.len()
    }
}

/// Best-effort release of a mapping's native resources.
///
/// No portable API guarantees prompt release; an implementation may
/// decline. The system stays correct when every call returns false, at
/// the cost of address space staying occupied until process exit.
pub trait Unmapper: Send + Sync {
    /// Release `segment` now if possible. Returns false when the mapping
    /// lingers instead.
    fn unmap(&self, segment: MapSegment) -> bool;
}

/// Releases the mapping immediately by dropping it.
pub struct SystemUnmapper;

impl Unmapper for SystemUnmapper {
    fn unmap(&self, segment: MapSegment) -> bool {
        drop(segment);
        true
    }
}

/// Declines to release; the mapping stays resident for the process
/// lifetime. The fallback for platforms where prompt unmapping is
/// unavailable.
pub struct NoopUnmapper;

impl Unmapper for NoopUnmapper {
    fn unmap(&self, segment: MapSegment) -> bool {
        std::mem::forget(segment);
        false
    }
}

/// The unmapper for the current platform.
///
/// Every target the mapping layer builds on releases cleanly through
/// [`SystemUnmapper`]; [`NoopUnmapper`] remains available for callers
/// that need mappings pinned.
pub fn default_unmapper() -> Arc<dyn Unmapper> {
    Arc::new(SystemUnmapper)
}

/// Session-scoped accounting of mapped bytes.
///
/// Shared by every buffer a page catalog creates; never process-global.
/// Crossing the soft budget logs a single warning and fails nothing.
pub struct MapAccounting {
    soft_budget: u64,
    state: Mutex<AccountingState>,
}

struct AccountingState {
    mapped: u64,
    peak: u64,
    warned: bool,
}

impl MapAccounting {
    pub fn new(soft_budget: u64) -> MapAccounting {
        MapAccounting {
            soft_budget,
            state: Mutex::new(AccountingState {
                mapped: 0,
                peak: 0,
                warned: false,
            }),
        }
    }

    /// Bytes currently mapped.
    pub fn mapped_bytes(&self) -> u64 {
        self.state.lock().mapped
    }

    /// High-water mark of mapped bytes.
    pub fn peak_bytes(&self) -> u64 {
        self.state.lock().peak
    }

    fn on_map(&self, bytes: u64) {
        let mut state = self.state.lock();
        state.mapped += bytes;
        state.peak = state.peak.max(state.mapped);
        if state.mapped > self.soft_budget && !state.warned {
            state.warned = true;
            tracing::warn!(
                mapped = state.mapped,
                budget = self.soft_budget,
                "mapped bytes exceed the session budget"
            );
        }
    }

    fn on_unmap(&self, bytes: u64) {
        let mut state = self.state.lock();
        state.mapped = state.mapped.saturating_sub(bytes);
    }
}

impl Default for MapAccounting {
    fn default() -> Self {
        MapAccounting::new(DEFAULT_MAP_BUDGET)
    }
}

struct BufferState {
    segment: Option<Arc<MapSegment>>,
    live: HashSet<u64>,
    next_id: u64,
}

/// Owner of one region's mapping.
///
/// The mapping is created on the first view and released through the
/// unmapper when the live-set drains. A single lock guards the live-set;
/// acquisition and disposal are rare next to raw reads, so the coarse
/// grain costs nothing. The views themselves are single-threaded; the
/// buffer may be shared.
pub struct RegionBuffer {
    region: ByteRegion,
    unmapper: Arc<dyn Unmapper>,
    accounting: Arc<MapAccounting>,
    state: Mutex<BufferState>,
}

impl RegionBuffer {
    pub fn new(
        region: ByteRegion,
        unmapper: Arc<dyn Unmapper>,
        accounting: Arc<MapAccounting>,
    ) -> RegionBuffer {
        RegionBuffer {
            region,
            unmapper,
            accounting,
            state: Mutex::new(BufferState {
                segment: None,
                live: HashSet::new(),
                next_id: 0,
            }),
        }
    }

    /// Region bytes this buffer covers.
    pub fn len(&self) -> u64 {
        self.region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    /// Number of views currently registered.
    pub fn live_views(&self) -> usize {
        self.state.lock().live.len()
    }

    /// True while a mapping is held.
    pub fn is_mapped(&self) -> bool {
        self.state.lock().segment.is_some()
    }

    /// Issue a new view, mapping the region first if no mapping is live.
    pub fn create_view(&self) -> Result<RegionView> {
        let mut state = self.state.lock();
        if state.segment.is_none() {
            let segment = map_region(&self.region)?;
            self.accounting.on_map(segment.mapped_len() as u64);
            state.segment = Some(Arc::new(segment));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.live.insert(id);
        Ok(RegionView {
            segment: Arc::clone(state.segment.as_ref().unwrap()),
            id,
            pos: 0,
        })
    }

    /// Dispose a view issued by this buffer.
    ///
    /// Consumes the view; when it was the last live one, the mapping is
    /// handed to the unmapper and the buffer drops its own reference. A
    /// later `create_view` maps the region again.
    pub fn dispose_view(&self, view: RegionView) {
        let RegionView { segment, id, .. } = view;
        drop(segment);

        let mut state = self.state.lock();
        state.live.remove(&id);
        if !state.live.is_empty() {
            return;
        }
        if let Some(shared) = state.segment.take() {
            match Arc::try_unwrap(shared) {
                Ok(segment) => {
                    let bytes = segment.mapped_len() as u64;
                    if self.unmapper.unmap(segment) {
                        self.accounting.on_unmap(bytes);
                    }
                }
                // A view escaped without being disposed; its handle keeps
                // the mapping alive and safe. Put the segment back so it
                // is reused rather than doubly mapped.
                Err(shared) => state.segment = Some(shared),
            }
        }
    }
}

fn map_region(region: &ByteRegion) -> Result<MapSegment> {
    if region.is_empty() {
        return Err(Error::EndOfStream);
    }
    let file_len = region.file.metadata()?.len();
    if region.start + region.len > file_len {
        return Err(Error::EndOfStream);
    }

    let aligned = region.start - region.start % MAP_ALIGN;
    let lead = (region.start - aligned) as usize;
    // SAFETY: the mapping is read-only, covers a range the length check
    // above proved present, and lives inside MapSegment so no view can
    // outlast it. The file must not be truncated while views are live;
    // that is the documented precondition of the byte-region contract.
    let map = unsafe {
        MmapOptions::new()
            .offset(aligned)
            .len(lead + region.len as usize)
            .map(region.file.as_ref())?
    };
    Ok(MapSegment {
        map,
        lead,
        len: region.len as usize,
    })
}

/// A read-only window onto a buffer's mapping with its own cursor.
///
/// Views are confined to one thread each and returned to their buffer via
/// [`RegionBuffer::dispose_view`].
pub struct RegionView {
    segment: Arc<MapSegment>,
    id: u64,
    pos: usize,
}

impl RegionView {
    /// Region bytes visible through this view.
    pub fn len(&self) -> usize {
        self.segment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segment.is_empty()
    }

    /// Cursor offset within the view.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left past the cursor.
    pub fn remaining(&self) -> usize {
        self.len() - self.pos
    }

    /// Move the cursor. The view end itself is a valid position.
    pub fn seek_to(&mut self, pos: usize) -> Result<()> {
        if pos > self.len() {
            return Err(Error::EndOfStream);
        }
        self.pos = pos;
        Ok(())
    }

    /// Fill `buf` from the cursor, advancing it.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.len() > self.remaining() {
            return Err(Error::EndOfStream);
        }
        let bytes = self.segment.bytes();
        buf.copy_from_slice(&bytes[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scratch_file(len: usize) -> (tempfile::TempDir, Arc<File>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.dat");
        let mut f = File::create(&path).unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        f.write_all(&data).unwrap();
        f.flush().unwrap();
        let file = Arc::new(File::open(&path).unwrap());
        (dir, file)
    }

    fn buffer_over(file: Arc<File>, start: u64, len: u64) -> RegionBuffer {
        RegionBuffer::new(
            ByteRegion::new(file, start, len),
            default_unmapper(),
            Arc::new(MapAccounting::default()),
        )
    }

    struct CountingUnmapper {
        released: AtomicUsize,
    }

    impl Unmapper for CountingUnmapper {
        fn unmap(&self, segment: MapSegment) -> bool {
            drop(segment);
            self.released.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    // ---- views ----

    #[test]
    fn view_reads_region_bytes() {
        let (_dir, file) = scratch_file(1000);
        let buffer = buffer_over(file, 100, 50);
        let mut view = buffer.create_view().unwrap();
        assert_eq!(view.len(), 50);

        let mut buf = [0u8; 4];
        view.read_into(&mut buf).unwrap();
        // Region starts at file offset 100.
        assert_eq!(buf, [100 % 251, 101 % 251, 102 % 251, 103 % 251]);
        assert_eq!(view.position(), 4);
        buffer.dispose_view(view);
    }

    #[test]
    fn views_have_independent_cursors() {
        let (_dir, file) = scratch_file(300);
        let buffer = buffer_over(file, 0, 300);
        let mut a = buffer.create_view().unwrap();
        let mut b = buffer.create_view().unwrap();

        a.seek_to(200).unwrap();
        let mut buf_a = [0u8; 1];
        a.read_into(&mut buf_a).unwrap();
        let mut buf_b = [0u8; 1];
        b.read_into(&mut buf_b).unwrap();

        assert_eq!(buf_a[0], 200 % 251);
        assert_eq!(buf_b[0], 0);
        buffer.dispose_view(a);
        buffer.dispose_view(b);
    }

    #[test]
    fn view_read_past_end() {
        let (_dir, file) = scratch_file(64);
        let buffer = buffer_over(file, 0, 64);
        let mut view = buffer.create_view().unwrap();
        view.seek_to(60).unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(view.read_into(&mut buf), Err(Error::EndOfStream)));
        buffer.dispose_view(view);
    }

    #[test]
    fn view_seek_bounds() {
        let (_dir, file) = scratch_file(64);
        let buffer = buffer_over(file, 0, 64);
        let mut view = buffer.create_view().unwrap();
        view.seek_to(64).unwrap();
        assert_eq!(view.remaining(), 0);
        assert!(matches!(view.seek_to(65), Err(Error::EndOfStream)));
        buffer.dispose_view(view);
    }

    // ---- live-set and unmapping ----

    #[test]
    fn mapping_released_when_last_view_disposed() {
        let (_dir, file) = scratch_file(128);
        let unmapper = Arc::new(CountingUnmapper {
            released: AtomicUsize::new(0),
        });
        let accounting = Arc::new(MapAccounting::default());
        let buffer = RegionBuffer::new(
            ByteRegion::new(file, 0, 128),
            unmapper.clone(),
            accounting.clone(),
        );

        let a = buffer.create_view().unwrap();
        let b = buffer.create_view().unwrap();
        assert_eq!(buffer.live_views(), 2);
        assert!(buffer.is_mapped());
        assert!(accounting.mapped_bytes() > 0);

        buffer.dispose_view(a);
        assert_eq!(unmapper.released.load(Ordering::SeqCst), 0);
        assert!(buffer.is_mapped());

        buffer.dispose_view(b);
        assert_eq!(unmapper.released.load(Ordering::SeqCst), 1);
        assert!(!buffer.is_mapped());
        assert_eq!(accounting.mapped_bytes(), 0);
    }

    #[test]
    fn buffer_remaps_after_full_drain() {
        let (_dir, file) = scratch_file(128);
        let unmapper = Arc::new(CountingUnmapper {
            released: AtomicUsize::new(0),
        });
        let buffer = RegionBuffer::new(
            ByteRegion::new(file, 0, 128),
            unmapper.clone(),
            Arc::new(MapAccounting::default()),
        );

        let view = buffer.create_view().unwrap();
        buffer.dispose_view(view);
        assert_eq!(unmapper.released.load(Ordering::SeqCst), 1);

        let mut view = buffer.create_view().unwrap();
        let mut buf = [0u8; 1];
        view.read_into(&mut buf).unwrap();
        assert_eq!(buf[0], 0);
        buffer.dispose_view(view);
        assert_eq!(unmapper.released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn mapping_survives_leaked_view() {
        let (_dir, file) = scratch_file(128);
        let buffer = buffer_over(file, 0, 128);
        let kept = buffer.create_view().unwrap();
        let stray = buffer.create_view().unwrap();
        // Dropped without dispose: its shared handle keeps the mapping
        // safe until the buffer can release it.
        drop(stray);
        assert_eq!(buffer.live_views(), 2);
        buffer.dispose_view(kept);
    }

    #[test]
    fn unaligned_region_start() {
        // A start deliberately off the alignment granularity.
        let (_dir, file) = scratch_file(70000);
        let buffer = buffer_over(file, 65536 + 7, 100);
        let mut view = buffer.create_view().unwrap();
        let mut buf = [0u8; 2];
        view.read_into(&mut buf).unwrap();
        assert_eq!(buf[0], ((65536 + 7) % 251) as u8);
        buffer.dispose_view(view);
    }

    #[test]
    fn region_past_file_end_fails() {
        let (_dir, file) = scratch_file(100);
        let buffer = buffer_over(file, 50, 100);
        assert!(matches!(buffer.create_view(), Err(Error::EndOfStream)));
    }

    #[test]
    fn empty_region_fails() {
        let (_dir, file) = scratch_file(100);
        let buffer = buffer_over(file, 10, 0);
        assert!(matches!(buffer.create_view(), Err(Error::EndOfStream)));
    }

    // ---- accounting ----

    #[test]
    fn budget_warning_does_not_fail_mapping() {
        let (_dir, file) = scratch_file(4096);
        let accounting = Arc::new(MapAccounting::new(16));
        let buffer = RegionBuffer::new(
            ByteRegion::new(file, 0, 4096),
            default_unmapper(),
            accounting.clone(),
        );
        // Far over the 16-byte budget; still maps.
        let view = buffer.create_view().unwrap();
        assert!(accounting.mapped_bytes() >= 4096);
        assert_eq!(accounting.peak_bytes(), accounting.mapped_bytes());
        buffer.dispose_view(view);
        assert_eq!(accounting.mapped_bytes(), 0);
    }

    #[test]
    fn subrange_clamps_to_region() {
        let (_dir, file) = scratch_file(100);
        let region = ByteRegion::new(file, 10, 80);
        let sub = region.subrange(70, 50);
        assert_eq!(sub.start(), 80);
        assert_eq!(sub.len(), 10);
    }
}
