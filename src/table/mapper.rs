//! Single-call address mapping: `mmap_addr` / `get_block_size`.
//!
//! Grounded on `armtrans.c`'s `mmap_addr` (build/overwrite a table chain
//! down to the requested level and install a leaf) and `get_block_size`
//! (pick the largest block a range's address and remaining length
//! permit). This port fixes the walk at 4 levels / 4 KiB granule, since
//! the specification scopes out stage-1's variable-depth configurations
//! the C original parameterizes over `levels` for.

use super::arena::TableArena;
use super::attrs::{MemType, Prot};
use super::descriptor::Descriptor;
use crate::error::{HvError, HvResult};
use crate::platform::{BLOCK_MASK_1GB, BLOCK_MASK_2MB, BLOCK_SIZE_1GB, BLOCK_SIZE_2MB, PAGE_SIZE_4KB};

const LEVEL_SHIFTS: [u32; 4] = [39, 30, 21, 12];
const INDEX_MASK: u64 = 0x1FF;

fn index_at(addr: u64, level: usize) -> usize {
    ((addr >> LEVEL_SHIFTS[level]) & INDEX_MASK) as usize
}

/// Largest block size a range starting at `vaddr` with `length` bytes
/// remaining can use: a 1 GiB L1 block if alignment and length allow, a
/// 2 MiB L2 block failing that, else a single 4 KiB page.
pub fn get_block_size(vaddr: u64, length: u64) -> u64 {
    if vaddr & BLOCK_MASK_1GB == 0 && length >= BLOCK_SIZE_1GB {
        return BLOCK_SIZE_1GB;
    }
    if vaddr & BLOCK_MASK_2MB == 0 && length >= BLOCK_SIZE_2MB {
        return BLOCK_SIZE_2MB;
    }
    PAGE_SIZE_4KB
}

fn level_for_block_size(block_size: u64) -> usize {
    match block_size {
        s if s == BLOCK_SIZE_1GB => 1,
        s if s == BLOCK_SIZE_2MB => 2,
        _ => 3,
    }
}

/// Walks from `root_pa` to the table that should hold the leaf for
/// `vaddr` at `target_level`, allocating missing intermediate tables
/// from `arena` as it goes. Returns the table's physical address and
/// the index of the terminal entry.
fn descend_allocating<const N: usize>(
    arena: &mut TableArena<N>,
    base_pa: u64,
    vmid: u16,
    root_pa: u64,
    vaddr: u64,
    target_level: usize,
) -> HvResult<(u64, usize)> {
    let mut table_pa = root_pa;
    for level in 0..target_level {
        let index = index_at(vaddr, level);
        let entry = Descriptor(arena.table(table_pa, base_pa).ok_or(HvError::Fatal)?.entries[index]);
        let next_pa = if entry.is_table() {
            entry.addr()
        } else {
            let new_table = arena.alloc_table(vmid, base_pa)?;
            arena
                .table_mut(table_pa, base_pa)
                .ok_or(HvError::Fatal)?
                .entries[index] = Descriptor::table(new_table).raw();
            new_table
        };
        table_pa = next_pa;
    }
    Ok((table_pa, index_at(vaddr, target_level)))
}

/// Installs (or, with `prot` empty and `mem_type` irrelevant, tears
/// down) a single block/page-sized leaf mapping. `block_size` must be
/// one of 1 GiB, 2 MiB, or 4 KiB and must evenly divide `vaddr`/`paddr`.
pub fn mmap_addr<const N: usize>(
    arena: &mut TableArena<N>,
    base_pa: u64,
    vmid: u16,
    root_pa: u64,
    vaddr: u64,
    paddr: u64,
    block_size: u64,
    prot: Prot,
    mem_type: MemType,
) -> HvResult<()> {
    if vaddr & (block_size - 1) != 0 || paddr & (block_size - 1) != 0 {
        return Err(HvError::Einval);
    }
    let level = level_for_block_size(block_size);
    let (table_pa, index) = descend_allocating(arena, base_pa, vmid, root_pa, vaddr, level)?;
    let table = arena.table_mut(table_pa, base_pa).ok_or(HvError::Fatal)?;
    table.entries[index] = Descriptor::leaf(paddr, prot, mem_type).raw();
    Ok(())
}

/// Clears a single leaf entry without freeing the table chain above it
/// (callers reclaim now-empty intermediate tables separately, mirroring
/// the C original leaving block-split remnants for the next pass).
pub fn unmap_addr<const N: usize>(
    arena: &mut TableArena<N>,
    base_pa: u64,
    root_pa: u64,
    vaddr: u64,
    block_size: u64,
) -> HvResult<()> {
    let level = level_for_block_size(block_size);
    let mut table_pa = root_pa;
    for l in 0..level {
        let index = index_at(vaddr, l);
        let entry = Descriptor(arena.table(table_pa, base_pa).ok_or(HvError::Enoent)?.entries[index]);
        if !entry.is_table() {
            return Err(HvError::Enoent);
        }
        table_pa = entry.addr();
    }
    let index = index_at(vaddr, level);
    let table = arena.table_mut(table_pa, base_pa).ok_or(HvError::Enoent)?;
    table.entries[index] = 0;
    Ok(())
}
