use bytemuck::{Pod, Zeroable};

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// Mode bit passed to a trap callback for a read access; the low bits carry
/// the access width in bytes.
pub const TRAP_READ: u32 = 0x10;
/// Mode bit passed to a trap callback for a write access.
pub const TRAP_WRITE: u32 = 0x20;

/// An MMIO trap callback: `(offset_in_page, width | direction, value)`.
/// The returned value substitutes the load result on reads.
pub type MmioCallback = Box<dyn FnMut(u32, u32, u32) -> u32>;

bitflags::bitflags! {
    /// Per-page permissions and bookkeeping.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct PageAttributes: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        /// The shared zero page; never set on a materialized page.
        const COW = 1 << 3;
    }
}

impl PageAttributes {
    /// Attributes of a freshly materialized page.
    pub const DEFAULT: Self = Self::READ.union(Self::WRITE).union(Self::EXEC);

    /// Attributes of the copy-on-write sentinel.
    pub const COW_PAGE: Self = Self::READ.union(Self::COW);

    /// A page with full default permissions. Setting default attributes on a
    /// range leaves still-COW pages untouched, so untouched regions keep
    /// costing no storage.
    pub fn is_default(self) -> bool {
        self.contains(Self::DEFAULT)
    }
}

/// The raw backing buffer of one page, aligned so any in-page access of a
/// natural width stays inside one allocation.
#[repr(C, align(4096))]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct PageData(pub [u8; PAGE_SIZE]);

/// One page of guest memory: data, attributes, and an optional MMIO trap.
pub struct Page {
    pub data: PageData,
    pub attr: PageAttributes,
    trap: Option<MmioCallback>,
}

impl Page {
    pub fn new() -> Self {
        Self {
            data: PageData::zeroed(),
            attr: PageAttributes::DEFAULT,
            trap: None,
        }
    }

    /// The copy-on-write sentinel: all zeroes, read-only. Lookup misses
    /// resolve to it; writes materialize a private page instead.
    pub(crate) fn cow() -> Self {
        Self {
            data: PageData::zeroed(),
            attr: PageAttributes::COW_PAGE,
            trap: None,
        }
    }

    #[inline]
    pub fn has_trap(&self) -> bool {
        self.trap.is_some()
    }

    pub fn set_trap(&mut self, callback: MmioCallback) {
        self.trap = Some(callback);
    }

    pub fn clear_trap(&mut self) {
        self.trap = None;
    }

    /// Invokes the trap. Callers check [`Page::has_trap`] first.
    pub fn trap(&mut self, offset: u32, mode: u32, value: u32) -> u32 {
        match &mut self.trap {
            Some(cb) => cb(offset, mode, value),
            None => 0,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}
