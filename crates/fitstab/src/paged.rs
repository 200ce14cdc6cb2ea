//! Paged random access over a mapped byte region.
//!
//! A [`PageCatalog`] splits a [`ByteRegion`] into fixed-size pages, each
//! backed by its own lazily-created [`RegionBuffer`]. A [`PagedReader`]
//! presents the whole region as one contiguous [`DataSource`]: reads that
//! cross a page boundary stitch transparently through the caller's buffer,
//! and never more than a bounded number of pages is mapped at once.
//!
//! One reader is confined to one thread. Concurrent access shares the
//! catalog, one reader per thread, each seeking independently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::io::DataSource;
use crate::mapped::{
    default_unmapper, ByteRegion, MapAccounting, RegionBuffer, RegionView, Unmapper,
    DEFAULT_MAP_BUDGET,
};

/// Default page size: large enough to keep page switches rare, small
/// enough that a handful of live pages stays well under address-space
/// pressure even on constrained targets.
pub const DEFAULT_PAGE_SIZE: u64 = 64 * 1024 * 1024;

/// Default idle lifetime of a cached page view.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(20);

/// Monotonic time for the expiry sweep, pluggable so expiry is
/// deterministic under test.
pub trait Clock: Send {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Wall-clock [`Clock`] counting from its creation.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> SystemClock {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Which page views a reader keeps alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// Only the current page's view is ever live. Minimal footprint,
    /// thrashes under scattered access.
    Immediate,
    /// Views are parked when the reader moves on and disposed once idle
    /// longer than the given duration; the sweep runs opportunistically
    /// on page acquisition. Advisory only: it bounds footprint, never
    /// affects correctness.
    Expiring(Duration),
}

/// Reader construction options.
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    pub page_size: u64,
    pub eviction: Eviction,
    /// Soft mapped-byte budget for the whole catalog session.
    pub map_budget: u64,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            page_size: DEFAULT_PAGE_SIZE,
            eviction: Eviction::Expiring(DEFAULT_EXPIRY),
            map_budget: DEFAULT_MAP_BUDGET,
        }
    }
}

/// Splits a region into pages and owns their buffers, created on first
/// access. Shared by every reader over the region.
pub struct PageCatalog {
    region: ByteRegion,
    page_size: u64,
    unmapper: Arc<dyn Unmapper>,
    accounting: Arc<MapAccounting>,
    pages: Mutex<Vec<Option<Arc<RegionBuffer>>>>,
}

impl PageCatalog {
    /// # Panics
    ///
    /// Panics if `page_size` is zero.
    pub fn new(
        region: ByteRegion,
        page_size: u64,
        unmapper: Arc<dyn Unmapper>,
        accounting: Arc<MapAccounting>,
    ) -> PageCatalog {
        assert!(page_size > 0, "page size must be positive");
        let count = region.len().div_ceil(page_size) as usize;
        PageCatalog {
            region,
            page_size,
            unmapper,
            accounting,
            pages: Mutex::new(vec![None; count]),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }

    /// Total region length in bytes.
    pub fn region_len(&self) -> u64 {
        self.region.len()
    }

    /// The session's mapped-byte accounting.
    pub fn accounting(&self) -> &Arc<MapAccounting> {
        &self.accounting
    }

    /// The buffer backing one page, created lazily.
    ///
    /// An index past the last page is end-of-stream, distinct from any
    /// I/O failure.
    pub fn buffer(&self, index: usize) -> Result<Arc<RegionBuffer>> {
        let mut pages = self.pages.lock();
        if index >= pages.len() {
            return Err(Error::EndOfStream);
        }
        if pages[index].is_none() {
            let start = index as u64 * self.page_size;
            let region = self.region.subrange(start, self.page_size);
            pages[index] = Some(Arc::new(RegionBuffer::new(
                region,
                Arc::clone(&self.unmapper),
                Arc::clone(&self.accounting),
            )));
        }
        Ok(Arc::clone(pages[index].as_ref().unwrap()))
    }
}

struct HeldView {
    page: usize,
    view: RegionView,
    last_used: Duration,
}

/// Random-access [`DataSource`] over a page catalog.
///
/// Seeks are lazy: no page is touched until a read needs it, so seeking
/// exactly to a page boundary (including end-of-region) never forces a
/// page switch. A seek past the region end fails immediately with
/// end-of-stream.
pub struct PagedReader {
    catalog: Arc<PageCatalog>,
    pos: u64,
    current: Option<HeldView>,
    parked: Vec<HeldView>,
    eviction: Eviction,
    clock: Box<dyn Clock>,
    closed: bool,
}

impl PagedReader {
    pub fn new(catalog: Arc<PageCatalog>, eviction: Eviction) -> PagedReader {
        PagedReader::with_clock(catalog, eviction, Box::new(SystemClock::new()))
    }

    /// A reader with an injected clock, for deterministic expiry.
    pub fn with_clock(
        catalog: Arc<PageCatalog>,
        eviction: Eviction,
        clock: Box<dyn Clock>,
    ) -> PagedReader {
        PagedReader {
            catalog,
            pos: 0,
            current: None,
            parked: Vec::new(),
            eviction,
            clock,
            closed: false,
        }
    }

    /// Build a catalog over `region` and a reader on it in one step.
    pub fn open(region: ByteRegion, options: ReaderOptions) -> PagedReader {
        let catalog = Arc::new(PageCatalog::new(
            region,
            options.page_size,
            default_unmapper(),
            Arc::new(MapAccounting::new(options.map_budget)),
        ));
        PagedReader::new(catalog, options.eviction)
    }

    /// The catalog this reader draws pages from.
    pub fn catalog(&self) -> &Arc<PageCatalog> {
        &self.catalog
    }

    /// Total readable bytes.
    pub fn len(&self) -> u64 {
        self.catalog.region_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of page views this reader currently holds.
    pub fn held_views(&self) -> usize {
        self.parked.len() + usize::from(self.current.is_some())
    }

    /// Dispose every held view. Idempotent; also runs on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(held) = self.current.take() {
            self.dispose(held);
        }
        for held in core::mem::take(&mut self.parked) {
            self.dispose(held);
        }
    }

    fn dispose(&self, held: HeldView) {
        if let Ok(buffer) = self.catalog.buffer(held.page) {
            buffer.dispose_view(held.view);
        }
    }

    /// Make `page` the current page.
    fn acquire(&mut self, page: usize) -> Result<()> {
        if let Some(current) = &self.current {
            if current.page == page {
                return Ok(());
            }
        }
        if let Some(old) = self.current.take() {
            self.retire(old);
        }

        if let Eviction::Expiring(ttl) = self.eviction {
            let now = self.clock.now();
            self.sweep(now, ttl);
            if let Some(i) = self.parked.iter().position(|held| held.page == page) {
                let mut held = self.parked.remove(i);
                held.last_used = now;
                self.current = Some(held);
                return Ok(());
            }
        }

        let buffer = self.catalog.buffer(page)?;
        let view = buffer.create_view()?;
        self.current = Some(HeldView {
            page,
            view,
            last_used: self.clock.now(),
        });
        Ok(())
    }

    fn retire(&mut self, held: HeldView) {
        match self.eviction {
            Eviction::Immediate => self.dispose(held),
            // The last-use stamp stays as the reads left it; parking is
            // not a use.
            Eviction::Expiring(_) => self.parked.push(held),
        }
    }

    /// Dispose parked views idle longer than `ttl`.
    fn sweep(&mut self, now: Duration, ttl: Duration) {
        let mut i = 0;
        while i < self.parked.len() {
            if now.saturating_sub(self.parked[i].last_used) > ttl {
                let held = self.parked.swap_remove(i);
                self.dispose(held);
            } else {
                i += 1;
            }
        }
    }
}

impl DataSource for PagedReader {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.closed {
            return Err(Error::UnsupportedOperation("read on a closed reader"));
        }
        if self.pos + buf.len() as u64 > self.len() {
            return Err(Error::EndOfStream);
        }

        let page_size = self.catalog.page_size();
        let mut filled = 0;
        while filled < buf.len() {
            let page = (self.pos / page_size) as usize;
            let in_page = (self.pos % page_size) as usize;
            self.acquire(page)?;

            let now = self.clock.now();
            let current = self.current.as_mut().expect("page acquired above");
            current.view.seek_to(in_page)?;
            // A read that would run past this page continues into the
            // next one; the caller sees a single seamless stream.
            let take = current.view.remaining().min(buf.len() - filled);
            current.view.read_into(&mut buf[filled..filled + take])?;
            current.last_used = now;

            filled += take;
            self.pos += take as u64;
        }
        Ok(())
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        if self.closed {
            return Err(Error::UnsupportedOperation("skip on a closed reader"));
        }
        if self.pos + n > self.len() {
            return Err(Error::EndOfStream);
        }
        self.pos += n;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn is_random_access(&self) -> bool {
        true
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        if self.closed {
            return Err(Error::UnsupportedOperation("seek on a closed reader"));
        }
        if offset > self.len() {
            return Err(Error::EndOfStream);
        }
        self.pos = offset;
        Ok(())
    }
}

impl Drop for PagedReader {
    fn drop(&mut self) {
        self.close();
    }
}
