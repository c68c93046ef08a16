use std::mem::size_of;
use std::ptr::null_mut;

use crate::header::Object;

/// Fixed-size metadata record for one managed payload. Cells live in bump
/// allocated blocks ([`crate::block_allocator`]) and are threaded onto the
/// treadmill ring through `prev`/`next`; they are never freed individually.
#[repr(C)]
pub struct MemCell {
    /// Byte count of the payload, excluding the [`ByteData`] header. Kept
    /// after the payload dies so the free pool can match sizes exactly.
    pub size: usize,
    pub prev: *mut MemCell,
    pub next: *mut MemCell,
    pub data: *mut ByteData,
}

impl MemCell {
    pub const fn empty() -> Self {
        Self {
            size: 0,
            prev: null_mut(),
            next: null_mut(),
            data: null_mut(),
        }
    }
}

/// Splice `cell` in so that `cell.next == anchor`.
///
/// # Safety
/// `anchor` must be on a well-formed ring and `cell` must be detached.
#[inline]
pub unsafe fn insert_before(cell: *mut MemCell, anchor: *mut MemCell) {
    let prev = (*anchor).prev;
    (*cell).prev = prev;
    (*cell).next = anchor;
    (*prev).next = cell;
    (*anchor).prev = cell;
}

/// Splice `cell` in so that `cell.prev == anchor`.
///
/// # Safety
/// `anchor` must be on a well-formed ring and `cell` must be detached.
#[inline]
pub unsafe fn insert_after(cell: *mut MemCell, anchor: *mut MemCell) {
    let next = (*anchor).next;
    (*cell).prev = anchor;
    (*cell).next = next;
    (*next).prev = cell;
    (*anchor).next = cell;
}

/// Remove `cell` from the ring, leaving its links dangling.
///
/// # Safety
/// `cell` must currently be linked on a well-formed ring.
#[inline]
pub unsafe fn unlink(cell: *mut MemCell) {
    let prev = (*cell).prev;
    let next = (*cell).next;
    (*prev).next = next;
    (*next).prev = prev;
}

/// Payload buffer header. The flexible byte region following `owner_cell`
/// holds the managed value; the back-pointer makes object-to-cell lookup a
/// constant-offset computation, mirroring how the owning cell finds its
/// value again at sweep.
#[repr(C)]
pub struct ByteData {
    pub owner_cell: *mut MemCell,
    data: [u8; 0],
}

impl ByteData {
    /// Allocate a buffer with room for `size` payload bytes. Returns null on
    /// exhaustion; the caller surfaces the failure.
    pub unsafe fn alloc(size: usize) -> *mut ByteData {
        libc::malloc(size_of::<ByteData>() + size) as *mut ByteData
    }

    /// Release a buffer previously returned by [`ByteData::alloc`].
    pub unsafe fn free(data: *mut ByteData) {
        libc::free(data as *mut libc::c_void);
    }

    /// First payload byte.
    #[inline]
    pub unsafe fn payload(data: *mut ByteData) -> *mut u8 {
        (*data).data.as_mut_ptr()
    }

    /// Recover the buffer header from a payload pointer.
    #[inline]
    pub unsafe fn from_payload(payload: *mut u8) -> *mut ByteData {
        payload.sub(size_of::<ByteData>()) as *mut ByteData
    }

    /// Owning cell of the payload that holds `object`.
    #[inline]
    pub unsafe fn owner_of(object: *mut Object) -> *mut MemCell {
        (*Self::from_payload(object as *mut u8)).owner_cell
    }
}

/// View a cell's payload as the Object header it starts with.
///
/// # Safety
/// The cell must hold a payload whose header has been initialised.
#[inline]
pub unsafe fn cell_object(cell: *mut MemCell) -> *mut Object {
    debug_assert!(!(*cell).data.is_null());
    ByteData::payload((*cell).data) as *mut Object
}
