//! Translation-table walk.
//!
//! Grounded on `ffa/stage2_walker.rs`'s `walk_to_leaf`/`walk_to_leaf_ptr`:
//! descend L0 -> L1 -> L2 -> L3, stopping early and returning a block
//! descriptor the moment a non-table (leaf) entry is found at L1 or L2.
//! `armtrans.c`'s `__pt_walk` is the same algorithm in C, parameterized
//! over `pgd_levels` for stage-1's variable depth; this core only walks
//! the fixed 4-level stage-2 regime the specification scopes to.

use super::arena::TableArena;
use super::descriptor::Descriptor;

const LEVEL_SHIFTS: [u32; 4] = [39, 30, 21, 12];
const INDEX_MASK: u64 = 0x1FF;

fn index_at(vaddr: u64, level: usize) -> usize {
    ((vaddr >> LEVEL_SHIFTS[level]) & INDEX_MASK) as usize
}

/// Where a walk terminated: at a populated leaf (block or page), at an
/// empty slot ready to be filled, or partway through because an
/// intermediate level was itself a leaf (a block straddling the target
/// address at a coarser granularity than requested).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkResult {
    /// Translation level (0-3) the walk stopped at.
    pub level: usize,
    /// Physical address of the table frame holding the terminal entry.
    pub table_pa: u64,
    /// Index of the terminal entry within that table.
    pub index: usize,
    pub descriptor: Descriptor,
}

impl WalkResult {
    pub fn block_size(&self) -> u64 {
        1u64 << LEVEL_SHIFTS[self.level]
    }
}

/// Walks from `root_pa` toward `vaddr`, stopping at the first leaf or
/// invalid entry found, or at level 3 if every intermediate level held a
/// table. Never allocates; callers needing to extend the walk (mapping a
/// previously-absent range) do so via the mapper/remapper, which call
/// back into `arena.alloc_table`.
pub fn walk<const N: usize>(
    arena: &TableArena<N>,
    base_pa: u64,
    root_pa: u64,
    vaddr: u64,
) -> WalkResult {
    let mut table_pa = root_pa;
    for level in 0..4 {
        let index = index_at(vaddr, level);
        let table = match arena.table(table_pa, base_pa) {
            Some(t) => t,
            None => {
                return WalkResult {
                    level,
                    table_pa,
                    index,
                    descriptor: Descriptor::invalid(),
                }
            }
        };
        let descriptor = Descriptor(table.entries[index]);
        if level == 3 || !descriptor.is_table() {
            return WalkResult {
                level,
                table_pa,
                index,
                descriptor,
            };
        }
        table_pa = descriptor.addr();
    }
    unreachable!("loop always returns by level 3")
}

/// Convenience wrapper returning the resolved physical address for a
/// fully-mapped leaf, or `None` if the walk stopped short (unmapped, or
/// stopped at a non-leaf because the arena ran out of tables).
pub fn translate<const N: usize>(
    arena: &TableArena<N>,
    base_pa: u64,
    root_pa: u64,
    vaddr: u64,
) -> Option<u64> {
    let result = walk(arena, base_pa, root_pa, vaddr);
    if !result.descriptor.is_leaf() {
        return None;
    }
    let offset = vaddr & (result.block_size() - 1);
    Some(result.descriptor.addr() + offset)
}
