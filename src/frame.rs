use std::ptr::null_mut;

use crate::header::Object;
use crate::heap::MemManager;

/// Per-call activation record published by compiled code. Frames form a
/// chain through `parent`; the root table is a contiguous array of object
/// pointer slots the caller keeps current for every managed local, writing
/// null into slots whose locals are dead. The collector's root scan walks
/// the whole chain.
#[repr(C)]
pub struct FuncFrame {
    pub parent: *mut FuncFrame,
    pub mem_manager: *mut MemManager,
    pub root_table_size: usize,
    pub root_table: *mut *mut Object,
}

impl FuncFrame {
    /// Frame over a caller-owned slot array. The slots must outlive every
    /// runtime call made through this frame.
    pub fn new(
        parent: *mut FuncFrame,
        mem_manager: *mut MemManager,
        roots: &mut [*mut Object],
    ) -> Self {
        Self {
            parent,
            mem_manager,
            root_table_size: roots.len(),
            root_table: roots.as_mut_ptr(),
        }
    }

    /// Frame with no root slots, for leaf calls that allocate nothing.
    pub fn empty(parent: *mut FuncFrame, mem_manager: *mut MemManager) -> Self {
        Self {
            parent,
            mem_manager,
            root_table_size: 0,
            root_table: null_mut(),
        }
    }
}
