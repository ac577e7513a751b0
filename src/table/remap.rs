//! Range operations and break-before-make block splitting.
//!
//! `mmap_range`/`unmap_range` are the range-walking drivers from
//! `armtrans.c`'s `__mmap_range`/`unmap_range`, chunking a request into
//! the largest block `get_block_size` allows at each step. `block_remap`
//! (splitting an existing block down to finer granularity before
//! installing a smaller mapping inside it) builds the replacement
//! subtree fully off to the side, then substitutes the parent entry with
//! a single store and follows it with exactly one broadcast TLB
//! invalidation — mirroring `armtrans.c`'s `__block_remap` (one write,
//! one invalidate), not the teacher's own `ffa/stage2_walker.rs::split_2mb_block_at_l2`,
//! which zeroes the parent before writing the replacement and
//! invalidates twice. That teacher idiom leaves a transient window where
//! the address is unmapped, which the specification's break-before-make
//! invariant (I3) explicitly forbids: an observer must see either the
//! old block or the complete new subtree, never neither.

use super::arena::TableArena;
use super::attrs::{MemType, Prot};
use super::descriptor::Descriptor;
use super::mapper::{get_block_size, mmap_addr, unmap_addr};
use super::walker::walk;
use crate::error::{HvError, HvResult};
use crate::hw::{invalidate_all, Barriers};
use crate::platform::{BLOCK_SIZE_1GB, BLOCK_SIZE_2MB, PAGE_SIZE_4KB};

const LEVEL_SHIFTS: [u32; 4] = [39, 30, 21, 12];
const INDEX_MASK: u64 = 0x1FF;

fn index_at(addr: u64, level: usize) -> usize {
    ((addr >> LEVEL_SHIFTS[level]) & INDEX_MASK) as usize
}

fn child_block_size(level: usize) -> u64 {
    match level {
        1 => BLOCK_SIZE_2MB,
        2 => PAGE_SIZE_4KB,
        _ => PAGE_SIZE_4KB,
    }
}

/// Bundles the pieces a remap needs: the arena to mutate, its base
/// address, the owning VMID (for freshly-allocated split tables), and
/// the barrier backend to invalidate through. Threading this instead of
/// a module-global `invalidate` flag (the C original's approach) keeps
/// the split/remap path free of hidden global state.
pub struct RemapContext<'a, const N: usize> {
    pub arena: &'a mut TableArena<N>,
    pub base_pa: u64,
    pub vmid: u16,
    pub barriers: &'a dyn Barriers,
}

impl<'a, const N: usize> RemapContext<'a, N> {
    /// Splits the block descriptor found at `(table_pa, index, level)`
    /// into 512 child leaves one level finer, preserving protection and
    /// memory type. The child table is fully built before anything
    /// becomes visible; the parent entry is then substituted in a single
    /// store, followed by one broadcast TLB invalidation. An observer
    /// walking concurrently sees either the original block or the
    /// complete child subtree, never a half-written or unmapped state.
    fn split_block(&mut self, root_pa: u64, vaddr: u64, level: usize) -> HvResult<()> {
        let parent_index = index_at(vaddr, level);
        let parent_table_pa = self.ancestor_table_pa(root_pa, vaddr, level)?;
        let block = {
            let table = self
                .arena
                .table(parent_table_pa, self.base_pa)
                .ok_or(HvError::Enoent)?;
            Descriptor(table.entries[parent_index])
        };
        if !block.is_leaf() {
            return Err(HvError::Einval);
        }

        let block_pa = block.addr();
        let child_size = child_block_size(level);
        let block_size = 1u64 << LEVEL_SHIFTS[level];
        let entries = (block_size / child_size) as usize;

        let child_table_pa = self.arena.alloc_table(self.vmid, self.base_pa)?;
        {
            let child = self
                .arena
                .table_mut(child_table_pa, self.base_pa)
                .ok_or(HvError::Fatal)?;
            for i in 0..entries.min(512) {
                let child_pa = block_pa + (i as u64) * child_size;
                // Re-encode at the child granularity, carrying the
                // parent's access permission and memory-attribute bits
                // forward unchanged.
                child.entries[i] =
                    Descriptor(block.raw() & !super::descriptor::addr_mask() | (child_pa & super::descriptor::addr_mask())).raw();
            }
        }

        // Single atomic substitution: the child subtree above is already
        // complete, so this store is the only moment the translation
        // changes. One invalidation afterward covers the whole subtree.
        {
            let parent = self
                .arena
                .table_mut(parent_table_pa, self.base_pa)
                .ok_or(HvError::Fatal)?;
            parent.entries[parent_index] = Descriptor::table(child_table_pa).raw();
        }
        invalidate_all(self.barriers, self.vmid);
        Ok(())
    }

    /// Walks from `root_pa` down to the table that owns the entry at
    /// `level` for `vaddr`, without allocating (the chain above a block
    /// we're about to split always already exists).
    fn ancestor_table_pa(&self, root_pa: u64, vaddr: u64, level: usize) -> HvResult<u64> {
        let mut table_pa = root_pa;
        for l in 0..level {
            let index = index_at(vaddr, l);
            let entry = Descriptor(
                self.arena
                    .table(table_pa, self.base_pa)
                    .ok_or(HvError::Enoent)?
                    .entries[index],
            );
            if !entry.is_table() {
                return Err(HvError::Enoent);
            }
            table_pa = entry.addr();
        }
        Ok(table_pa)
    }

    /// Ensures `vaddr` is resolvable at 4 KiB granularity, splitting any
    /// 2 MiB or 1 GiB block found along the way. No-op if the address is
    /// already unmapped or already page-granular.
    pub fn split_to_page(&mut self, root_pa: u64, vaddr: u64) -> HvResult<()> {
        loop {
            let result = walk(self.arena, self.base_pa, root_pa, vaddr);
            if !result.descriptor.is_leaf() || result.level == 3 {
                return Ok(());
            }
            self.split_block(root_pa, vaddr, result.level)?;
        }
    }

    /// Maps `[vaddr, vaddr+length)` to `[paddr, paddr+length)`, chunking
    /// at the largest aligned block size available at each step.
    /// Mirrors `__mmap_range`.
    pub fn mmap_range(
        &mut self,
        root_pa: u64,
        vaddr: u64,
        paddr: u64,
        length: u64,
        prot: Prot,
        mem_type: MemType,
    ) -> HvResult<()> {
        if length == 0 {
            return Ok(());
        }
        if length % PAGE_SIZE_4KB != 0 || vaddr % PAGE_SIZE_4KB != 0 || paddr % PAGE_SIZE_4KB != 0 {
            return Err(HvError::Einval);
        }
        let mut v = vaddr;
        let mut p = paddr;
        let mut remaining = length;
        while remaining > 0 {
            let block = get_block_size(v, remaining);
            mmap_addr(self.arena, self.base_pa, self.vmid, root_pa, v, p, block, prot, mem_type)?;
            v += block;
            p += block;
            remaining -= block;
        }
        invalidate_all(self.barriers, self.vmid);
        Ok(())
    }

    /// Tears down `[vaddr, vaddr+length)` page by page, splitting any
    /// block mapping encountered so only the requested pages are
    /// affected. Returns the number of pages actually unmapped, matching
    /// the C original's "unmap as much as possible, report a partial
    /// count" behavior rather than aborting the whole range on the first
    /// already-unmapped page.
    pub fn unmap_range(&mut self, root_pa: u64, vaddr: u64, length: u64) -> HvResult<u64> {
        if length % PAGE_SIZE_4KB != 0 {
            return Err(HvError::Einval);
        }
        let mut unmapped = 0u64;
        let mut v = vaddr;
        let end = vaddr + length;
        while v < end {
            let result = walk(self.arena, self.base_pa, root_pa, v);
            if !result.descriptor.is_valid() {
                v += PAGE_SIZE_4KB;
                continue;
            }
            if result.descriptor.is_leaf() && result.level != 3 {
                self.split_block(root_pa, v, result.level)?;
            }
            match unmap_addr(self.arena, self.base_pa, root_pa, v, PAGE_SIZE_4KB) {
                Ok(()) => unmapped += 1,
                Err(HvError::Enoent) => {}
                Err(e) => return Err(e),
            }
            v += PAGE_SIZE_4KB;
        }
        invalidate_all(self.barriers, self.vmid);
        Ok(unmapped)
    }

    /// Remaps `[vaddr, vaddr+length)` to a new `paddr`/`prot`/`mem_type`,
    /// splitting any overlapping block first. Equivalent to
    /// `__block_remap`'s steady-state path (post machine-init), but
    /// expressed per-page rather than the C original's head/body/tail
    /// block surgery, since this core always settles on 4 KiB leaves for
    /// anything that survives a conflicting remap.
    pub fn block_remap(
        &mut self,
        root_pa: u64,
        vaddr: u64,
        paddr: u64,
        length: u64,
        prot: Prot,
        mem_type: MemType,
    ) -> HvResult<()> {
        let mut v = vaddr;
        let end = vaddr + length;
        while v < end {
            self.split_to_page(root_pa, v)?;
            v += PAGE_SIZE_4KB;
        }
        self.mmap_range(root_pa, vaddr, paddr, length, prot, mem_type)
    }
}
