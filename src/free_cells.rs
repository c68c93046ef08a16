use std::ptr::null_mut;

use crate::cell::MemCell;

/// LIFO of cells whose objects were swept. Each keeps its payload buffer
/// attached so an allocation of the same size reuses buffer and cell
/// verbatim, with no round trip through `malloc`. Matching is exact: a
/// buffer must only ever serve payloads of the size it was created for.
pub struct FreeCells {
    head: *mut MemCell,
}

impl FreeCells {
    pub fn new() -> Self {
        Self { head: null_mut() }
    }

    /// First cell whose last payload size equals `size`, unlinked; null if
    /// no cell matches.
    pub fn pop(&mut self, size: usize) -> *mut MemCell {
        unsafe {
            let mut link: *mut *mut MemCell = &mut self.head;
            while !(*link).is_null() {
                let cell = *link;
                if (*cell).size == size {
                    *link = (*cell).next;
                    (*cell).next = null_mut();
                    return cell;
                }
                link = &mut (*cell).next;
            }
        }
        null_mut()
    }

    pub fn push(&mut self, cell: *mut MemCell) {
        unsafe {
            (*cell).prev = null_mut();
            (*cell).next = self.head;
        }
        self.head = cell;
    }

    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut cell = self.head;
        unsafe {
            while !cell.is_null() {
                count += 1;
                cell = (*cell).next;
            }
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    pub fn for_each(&self, mut f: impl FnMut(*mut MemCell)) {
        let mut cell = self.head;
        unsafe {
            while !cell.is_null() {
                let next = (*cell).next;
                f(cell);
                cell = next;
            }
        }
    }

    /// Detach the whole list for teardown.
    pub fn take_head(&mut self) -> *mut MemCell {
        let head = self.head;
        self.head = null_mut();
        head
    }
}
