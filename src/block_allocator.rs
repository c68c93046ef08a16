use std::mem::size_of;
use std::ptr::null_mut;

use crate::cell::MemCell;
use crate::error::InitError;

/// Cells per block unless overridden through
/// [`crate::heap::MemManager::with_block_capacity`].
pub const BLOCK_CAPACITY: usize = 128;

/// A bump-allocated array of cells plus the link to the previously filled
/// block. Blocks form a head-inserted, grow-only chain.
#[repr(C)]
pub struct MemCellBlock {
    pub cells: *mut MemCell,
    pub capacity: usize,
    pub next_index: usize,
    pub next: *mut MemCellBlock,
}

/// Bump allocator for [`MemCell`] metadata. Cells are handed out from the
/// head block; filling it prepends a fresh block, which is the signal the
/// collector keys a cycle off.
pub struct CellAllocator {
    blocks: *mut MemCellBlock,
    block_capacity: usize,
}

impl CellAllocator {
    pub fn new(block_capacity: usize) -> Result<Self, InitError> {
        debug_assert!(block_capacity > 0);
        let mut this = Self {
            blocks: null_mut(),
            block_capacity,
        };
        this.add_block()?;
        Ok(this)
    }

    fn add_block(&mut self) -> Result<(), InitError> {
        unsafe {
            let block = libc::malloc(size_of::<MemCellBlock>()) as *mut MemCellBlock;
            if block.is_null() {
                return Err(InitError::Allocator);
            }
            let cells = libc::malloc(size_of::<MemCell>() * self.block_capacity) as *mut MemCell;
            if cells.is_null() {
                libc::free(block as *mut libc::c_void);
                return Err(InitError::Block);
            }
            block.write(MemCellBlock {
                cells,
                capacity: self.block_capacity,
                next_index: 0,
                next: self.blocks,
            });
            self.blocks = block;
            Ok(())
        }
    }

    /// Next unused cell, zero-initialised. Sets `*grew` when the head block
    /// was full and a new one had to be chained in; returns null when even
    /// that failed.
    pub fn alloc(&mut self, grew: &mut bool) -> *mut MemCell {
        unsafe {
            if (*self.blocks).next_index >= (*self.blocks).capacity {
                if self.add_block().is_err() {
                    return null_mut();
                }
                *grew = true;
            }
            let head = self.blocks;
            let cell = (*head).cells.add((*head).next_index);
            (*head).next_index += 1;
            cell.write(MemCell::empty());
            cell
        }
    }

    /// Total cells handed out across all blocks.
    pub fn cells_in_use(&self) -> usize {
        let mut count = 0;
        let mut block = self.blocks;
        unsafe {
            while !block.is_null() {
                count += (*block).next_index;
                block = (*block).next;
            }
        }
        count
    }

    pub fn block_count(&self) -> usize {
        let mut count = 0;
        let mut block = self.blocks;
        unsafe {
            while !block.is_null() {
                count += 1;
                block = (*block).next;
            }
        }
        count
    }
}

impl Drop for CellAllocator {
    fn drop(&mut self) {
        unsafe {
            let mut block = self.blocks;
            while !block.is_null() {
                let next = (*block).next;
                libc::free((*block).cells as *mut libc::c_void);
                libc::free(block as *mut libc::c_void);
                block = next;
            }
        }
    }
}
