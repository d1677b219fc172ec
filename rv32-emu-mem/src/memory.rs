use bytemuck::Pod;
use hashbrown::HashMap;

use rv32_emu_errors::{AccessKind, CpuException, CpuResult};

use crate::page::{
    MmioCallback, PageAttributes, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE, TRAP_READ, TRAP_WRITE,
};
use crate::store::{PageSlot, PageStore};
use crate::{MEMORY_ALIGNMENT_CHECK, MEMORY_TRAPS_ENABLED};

/// Resolves a symbol name to a guest address, e.g. out of the guest image's
/// ELF symbol table. Installed by the loader; misses resolve to zero.
pub type SymbolResolver = Box<dyn Fn(&str) -> Option<u32>>;

/// An access width the typed path understands.
///
/// Sealed over u8/u16/u32: the three widths the 32-bit ISA loads and stores.
pub trait MemWidth: Pod + private::Sealed {
    const SIZE: u32;
    fn from_word(word: u32) -> Self;
    fn to_word(self) -> u32;
}

mod private {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
}

impl MemWidth for u8 {
    const SIZE: u32 = 1;
    fn from_word(word: u32) -> Self {
        word as u8
    }
    fn to_word(self) -> u32 {
        self as u32
    }
}

impl MemWidth for u16 {
    const SIZE: u32 = 2;
    fn from_word(word: u32) -> Self {
        word as u16
    }
    fn to_word(self) -> u32 {
        self as u32
    }
}

impl MemWidth for u32 {
    const SIZE: u32 = 4;
    fn from_word(word: u32) -> Self {
        word
    }
    fn to_word(self) -> u32 {
        self
    }
}

/// Typed, alignment-sensitive access over the page store, plus block
/// transfers, string reads, attribute and trap management, and symbol
/// resolution.
///
/// The most recently touched read and write pages are cached as
/// `(pageno, slot)` pairs so sequential accesses within one page skip the
/// store lookup entirely. Any operation that materializes or erases a page
/// fixes those pairs up (`invalidate_page`).
pub struct Memory {
    store: PageStore,
    // None in the slot position means the page number resolved to the COW
    // sentinel when it was cached.
    rd_cache: Option<(u32, Option<PageSlot>)>,
    wr_cache: Option<(u32, PageSlot)>,
    sym_cache: HashMap<String, u32>,
    symbol_resolver: Option<SymbolResolver>,
    exit_address: u32,
}

impl Memory {
    pub fn new(page_limit: usize) -> Self {
        Self {
            store: PageStore::new(page_limit),
            rd_cache: None,
            wr_cache: None,
            sym_cache: HashMap::new(),
            symbol_resolver: None,
            exit_address: 0,
        }
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    /// Drops every materialized page and both caches. The symbol cache and
    /// exit address survive; they are machine configuration, not guest state.
    pub fn reset(&mut self) {
        self.store.clear();
        self.rd_cache = None;
        self.wr_cache = None;
    }

    fn invalidate_page(&mut self, pageno: u32) {
        if matches!(self.rd_cache, Some((p, _)) if p == pageno) {
            self.rd_cache = None;
        }
        if matches!(self.wr_cache, Some((p, _)) if p == pageno) {
            self.wr_cache = None;
        }
    }

    fn create_page(&mut self, pageno: u32) -> PageSlot {
        let slot = self.store.create_page(pageno);
        // A read of this page number may have cached the COW sentinel.
        if matches!(self.rd_cache, Some((p, _)) if p == pageno) {
            self.rd_cache = Some((pageno, Some(slot)));
        }
        slot
    }

    #[inline]
    fn read_slot(&mut self, pageno: u32) -> Option<PageSlot> {
        match self.rd_cache {
            Some((p, slot)) if p == pageno => slot,
            _ => {
                let slot = self.store.lookup(pageno);
                self.rd_cache = Some((pageno, slot));
                slot
            }
        }
    }

    #[inline]
    fn write_slot(&mut self, pageno: u32) -> PageSlot {
        match self.wr_cache {
            Some((p, slot)) if p == pageno => slot,
            _ => {
                let slot = self.create_page(pageno);
                self.wr_cache = Some((pageno, slot));
                slot
            }
        }
    }

    fn check_alignment<T: MemWidth>(address: u32) -> CpuResult<()> {
        if MEMORY_ALIGNMENT_CHECK && address & (T::SIZE - 1) != 0 {
            return Err(CpuException::MisalignedAccess);
        }
        Ok(())
    }

    pub fn read<T: MemWidth>(&mut self, address: u32) -> CpuResult<T> {
        Self::check_alignment::<T>(address)?;
        let offset = address as usize & PAGE_MASK;
        if offset + core::mem::size_of::<T>() > PAGE_SIZE {
            return self.read_split(address);
        }
        let pageno = address >> PAGE_SHIFT;
        match self.read_slot(pageno) {
            Some(slot) => {
                let page = self.store.slot_mut(slot);
                if MEMORY_TRAPS_ENABLED && page.has_trap() {
                    let value = page.trap(offset as u32, T::SIZE | TRAP_READ, 0);
                    return Ok(T::from_word(value));
                }
                if page.attr.contains(PageAttributes::READ) {
                    let bytes = &page.data.0[offset..offset + core::mem::size_of::<T>()];
                    return Ok(bytemuck::pod_read_unaligned(bytes));
                }
                log::trace!("{:?} fault at {:#010x}", AccessKind::Read, address);
                Err(CpuException::ProtectionFault)
            }
            // Unmapped memory is the COW zero page: readable, all zeroes.
            None => Ok(T::from_word(0)),
        }
    }

    pub fn write<T: MemWidth>(&mut self, address: u32, value: T) -> CpuResult<()> {
        Self::check_alignment::<T>(address)?;
        let offset = address as usize & PAGE_MASK;
        if offset + core::mem::size_of::<T>() > PAGE_SIZE {
            return self.write_split(address, value);
        }
        let pageno = address >> PAGE_SHIFT;
        let slot = self.write_slot(pageno);
        let page = self.store.slot_mut(slot);
        if MEMORY_TRAPS_ENABLED && page.has_trap() {
            page.trap(offset as u32, T::SIZE | TRAP_WRITE, value.to_word());
            return Ok(());
        }
        if page.attr.contains(PageAttributes::WRITE) {
            let bytes = &mut page.data.0[offset..offset + core::mem::size_of::<T>()];
            bytes.copy_from_slice(bytemuck::bytes_of(&value));
            return Ok(());
        }
        log::trace!("{:?} fault at {:#010x}", AccessKind::Write, address);
        Err(CpuException::ProtectionFault)
    }

    // An access spilling over the page edge splits into byte accesses;
    // permission checks apply per page.
    #[cold]
    fn read_split<T: MemWidth>(&mut self, address: u32) -> CpuResult<T> {
        let mut word = 0u32;
        for i in 0..T::SIZE {
            let byte = self.read::<u8>(address.wrapping_add(i))?;
            word |= (byte as u32) << (8 * i);
        }
        Ok(T::from_word(word))
    }

    #[cold]
    fn write_split<T: MemWidth>(&mut self, address: u32, value: T) -> CpuResult<()> {
        let word = value.to_word();
        for i in 0..T::SIZE {
            self.write::<u8>(address.wrapping_add(i), (word >> (8 * i)) as u8)?;
        }
        Ok(())
    }

    /// Fills `[dst, dst + len)` with `value`, materializing every affected
    /// page. Block writes do not dispatch MMIO traps.
    pub fn memset(&mut self, mut dst: u32, value: u8, mut len: usize) {
        while len > 0 {
            let offset = dst as usize & PAGE_MASK;
            let size = (PAGE_SIZE - offset).min(len);
            let slot = self.create_page(dst >> PAGE_SHIFT);
            let page = self.store.slot_mut(slot);
            page.data.0[offset..offset + size].fill(value);
            dst = dst.wrapping_add(size as u32);
            len -= size;
        }
    }

    /// Copies a host buffer into guest memory, materializing every affected
    /// page. Block writes do not dispatch MMIO traps.
    pub fn memcpy(&mut self, mut dst: u32, mut src: &[u8]) {
        while !src.is_empty() {
            let offset = dst as usize & PAGE_MASK;
            let size = (PAGE_SIZE - offset).min(src.len());
            let slot = self.create_page(dst >> PAGE_SHIFT);
            let page = self.store.slot_mut(slot);
            page.data.0[offset..offset + size].copy_from_slice(&src[..size]);
            dst = dst.wrapping_add(size as u32);
            src = &src[size..];
        }
    }

    /// Copies guest memory into a host buffer. Unmapped pages read as
    /// zeroes; no page is materialized.
    pub fn memcpy_out(&self, mut dst: &mut [u8], mut src: u32) {
        while !dst.is_empty() {
            let offset = src as usize & PAGE_MASK;
            let size = (PAGE_SIZE - offset).min(dst.len());
            let page = self.store.get_pageno(src >> PAGE_SHIFT);
            let (head, rest) = core::mem::take(&mut dst).split_at_mut(size);
            head.copy_from_slice(&page.data.0[offset..offset + size]);
            src = src.wrapping_add(size as u32);
            dst = rest;
        }
    }

    /// Presents `len` bytes starting at `addr` as one contiguous slice.
    /// Within a single page this borrows the page buffer directly; a range
    /// crossing pages is gathered into a heap buffer first.
    pub fn memview<R>(&self, addr: u32, len: usize, callback: impl FnOnce(&[u8]) -> R) -> R {
        let offset = addr as usize & PAGE_MASK;
        if offset + len <= PAGE_SIZE {
            let page = self.store.get_pageno(addr >> PAGE_SHIFT);
            return callback(&page.data.0[offset..offset + len]);
        }
        let mut buffer = vec![0u8; len];
        self.memcpy_out(&mut buffer, addr);
        callback(&buffer)
    }

    /// One trivially-copyable value at `addr`, page layout respected.
    pub fn memview_value<T: Pod, R>(&self, addr: u32, callback: impl FnOnce(&T) -> R) -> R {
        self.memview(addr, core::mem::size_of::<T>(), |bytes| {
            let value: T = bytemuck::pod_read_unaligned(bytes);
            callback(&value)
        })
    }

    /// Reads a NUL-terminated byte string, stopping at the terminator or
    /// after `max_len` bytes, whichever comes first.
    pub fn memstring(&self, addr: u32, max_len: usize) -> Vec<u8> {
        let mut result = Vec::new();
        let mut addr = addr;
        while result.len() < max_len {
            let offset = addr as usize & PAGE_MASK;
            let take = (PAGE_SIZE - offset).min(max_len - result.len());
            let page = self.store.get_pageno(addr >> PAGE_SHIFT);
            let chunk = &page.data.0[offset..offset + take];
            match chunk.iter().position(|&b| b == 0) {
                Some(nul) => {
                    result.extend_from_slice(&chunk[..nul]);
                    return result;
                }
                None => result.extend_from_slice(chunk),
            }
            addr = addr.wrapping_add(take as u32);
        }
        result
    }

    /// Walks the page range, overwriting attributes. Default attributes
    /// leave still-COW pages untouched so unused regions stay free.
    pub fn set_page_attr(&mut self, mut dst: u32, mut len: usize, attrs: PageAttributes) {
        let is_default = attrs.is_default();
        while len > 0 {
            let size = PAGE_SIZE.min(len);
            let pageno = dst >> PAGE_SHIFT;
            if !is_default || !self.store.get_pageno(pageno).attr.contains(PageAttributes::COW) {
                let slot = self.create_page(pageno);
                self.store.slot_mut(slot).attr = attrs;
            }
            dst = dst.wrapping_add(size as u32);
            len -= size;
        }
    }

    pub fn get_page_attr(&self, src: u32) -> PageAttributes {
        self.store.get_pageno(src >> PAGE_SHIFT).attr
    }

    /// Erases the materialized pages covering `[dst, dst + len)`; the range
    /// reads as zeroes afterwards.
    pub fn free_pages(&mut self, mut dst: u32, mut len: usize) {
        while len > 0 {
            let size = PAGE_SIZE.min(len);
            let pageno = dst >> PAGE_SHIFT;
            if !self.store.get_pageno(pageno).attr.contains(PageAttributes::COW) {
                self.store.erase_page(pageno);
                self.invalidate_page(pageno);
            }
            dst = dst.wrapping_add(size as u32);
            len -= size;
        }
    }

    /// Installs an MMIO trap on the page containing `page_addr`,
    /// materializing it if needed.
    pub fn trap(&mut self, page_addr: u32, callback: MmioCallback) {
        let slot = self.create_page(page_addr >> PAGE_SHIFT);
        self.store.slot_mut(slot).set_trap(callback);
    }

    pub fn set_symbol_resolver(&mut self, resolver: SymbolResolver) {
        self.symbol_resolver = Some(resolver);
    }

    /// Looks a symbol up in the cache, falling back to the installed
    /// resolver. Misses cache as zero.
    pub fn resolve_address(&mut self, name: &str) -> u32 {
        if let Some(&addr) = self.sym_cache.get(name) {
            return addr;
        }
        let addr = self
            .symbol_resolver
            .as_ref()
            .and_then(|resolver| resolver(name))
            .unwrap_or(0);
        self.sym_cache.insert(name.to_owned(), addr);
        addr
    }

    /// Seeds the symbol cache directly, e.g. when restoring a snapshot.
    pub fn cache_symbol(&mut self, name: &str, addr: u32) {
        self.sym_cache.insert(name.to_owned(), addr);
    }

    pub fn symbol_cache(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.sym_cache.iter().map(|(name, &addr)| (name.as_str(), addr))
    }

    /// Executing from this address halts the loop; 0 disables the check
    /// (flat images load and begin at address zero).
    pub fn exit_address(&self) -> u32 {
        self.exit_address
    }

    pub fn set_exit_address(&mut self, addr: u32) {
        self.exit_address = addr;
    }
}
