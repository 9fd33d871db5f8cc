//! Backing page allocation
//!
//! Every block is backed by 1, 2, 4 or 8 contiguous pages obtained from a
//! [`PageAllocator`]. The allocator enforces an optional page budget so
//! that memory pressure can be simulated and bounded.

use super::size_class::UNIT_SIZE;
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Per-call growth flags passed to `alloc`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocCtx {
    /// Zero-fill newly created blocks
    pub zeroed: bool,
    /// Allow a new block to be created when no hot block has room
    pub may_grow: bool,
}

impl Default for AllocCtx {
    fn default() -> Self {
        Self {
            zeroed: false,
            may_grow: true,
        }
    }
}

impl AllocCtx {
    /// Context that never grows the pool
    pub fn no_grow() -> Self {
        Self {
            may_grow: false,
            ..Self::default()
        }
    }
}

/// Source of page-aligned backing memory
#[derive(Debug)]
pub struct PageAllocator {
    /// Maximum pages in use at once (None = unbounded)
    page_limit: Option<usize>,
    pages_in_use: AtomicUsize,
}

impl PageAllocator {
    pub fn new(page_limit: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            page_limit,
            pages_in_use: AtomicUsize::new(0),
        })
    }

    /// Pages currently handed out
    pub fn pages_in_use(&self) -> usize {
        self.pages_in_use.load(Ordering::Acquire)
    }

    pub fn page_limit(&self) -> Option<usize> {
        self.page_limit
    }

    /// Allocate `units` contiguous pages, or `None` under memory pressure
    pub fn alloc_pages(self: &Arc<Self>, units: usize, zeroed: bool) -> Option<Pages> {
        if !self.charge(units) {
            return None;
        }

        let layout = match Layout::from_size_align(units * UNIT_SIZE, UNIT_SIZE) {
            Ok(layout) => layout,
            Err(e) => {
                warn!("Invalid page layout for {} units: {}", units, e);
                self.uncharge(units);
                return None;
            }
        };

        // SAFETY: layout has a non-zero size (units >= 1)
        let raw = unsafe {
            if zeroed {
                alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc(layout)
            }
        };

        match NonNull::new(raw) {
            Some(ptr) => Some(Pages {
                ptr,
                layout,
                owner: Arc::clone(self),
            }),
            None => {
                self.uncharge(units);
                None
            }
        }
    }

    fn charge(&self, units: usize) -> bool {
        self.pages_in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_use| {
                let next = in_use + units;
                match self.page_limit {
                    Some(limit) if next > limit => None,
                    _ => Some(next),
                }
            })
            .is_ok()
    }

    fn uncharge(&self, units: usize) {
        self.pages_in_use.fetch_sub(units, Ordering::AcqRel);
    }
}

/// An owned run of backing pages, returned to the allocator on drop
pub struct Pages {
    ptr: NonNull<u8>,
    layout: Layout,
    owner: Arc<PageAllocator>,
}

// SAFETY: Pages exclusively owns its allocation; access to the bytes is
// coordinated by the owning block's lock or by the client holding a handle.
unsafe impl Send for Pages {}
unsafe impl Sync for Pages {}

impl Pages {
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Pointer `offset` bytes into the run
    pub fn offset_ptr(&self, offset: usize) -> NonNull<u8> {
        assert!(offset < self.len(), "offset {} past {} bytes", offset, self.len());
        // SAFETY: offset is within the allocation, so the result is non-null
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) }
    }

    fn units(&self) -> usize {
        self.layout.size() / UNIT_SIZE
    }
}

impl Drop for Pages {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc/alloc_zeroed with this layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
        self.owner.uncharge(self.units());
    }
}

impl std::fmt::Debug for Pages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pages")
            .field("ptr", &self.ptr)
            .field("len", &self.len())
            .finish()
    }
}
