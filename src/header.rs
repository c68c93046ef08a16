use std::ptr::null;

use modular_bitfield::prelude::*;

use crate::heap::MemManager;

// Every managed value starts with an Object header. The 32-bit tag packs the
// value kind and the collector state bits:
//
// +-----------+------+--------------------------------------------+
// | name      | bits |                                            |
// +-----------+------+--------------------------------------------+
// | kind      |   16 | STR, STR_SLICE, FUNC, compiler aggregates. |
// | unused    |   13 |                                            |
// | gray      |    1 | On the scan worklist (to-region).          |
// | black     |    1 | Colour bit; meaning depends on live_color. |
// | heap      |    1 | Managed. Clear for static objects.         |
// +-----------+------+--------------------------------------------+
//
// An object is alive this cycle when its black bit agrees with the manager's
// live colour; flipping the live colour at cycle start invalidates every
// previous mark in O(1) without touching any header.
#[bitfield(bits = 32)]
#[derive(Clone, Copy)]
pub struct Tag {
    pub kind: B16,
    #[skip]
    __: B13,
    pub gray: bool,
    pub black: bool,
    pub heap: bool,
}

pub const KIND_FREE: u16 = 0;
pub const KIND_STR: u16 = 1;
pub const KIND_STR_SLICE: u16 = 2;
pub const KIND_FUNC: u16 = 3;

/// The two values `live_color` alternates between. See [`Object::is_alive`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Color {
    White,
    Black,
}

impl Color {
    #[inline]
    pub fn flip(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

/// Scan hook: enqueue every outgoing managed pointer of `object` via
/// [`MemManager::mark_object`]. Emitted per type by the compiler; the
/// built-in hooks live in [`crate::string`] and [`crate::closure`].
pub type ScanFn = unsafe extern "C" fn(manager: *mut MemManager, object: *mut Object);

/// Heap-free hook: release unmanaged resources owned by `object`. Runs once,
/// at sweep or at manager teardown.
pub type HeapFreeFn = unsafe extern "C" fn(object: *mut Object);

/// Static per-type record. One exists per value kind, as a module-level
/// constant here or emitted by the compiler for user aggregates.
#[repr(C)]
pub struct TypeInfo {
    pub scan: Option<ScanFn>,
    pub heap_free: Option<HeapFreeFn>,
}

/// Header prefix shared by every managed value.
#[repr(C)]
pub struct Object {
    pub tag: Tag,
    pub type_info: *const TypeInfo,
}

impl Object {
    #[inline]
    pub fn kind(&self) -> u16 {
        self.tag.kind()
    }

    #[inline]
    pub fn is_heap(&self) -> bool {
        self.tag.heap()
    }

    #[inline]
    pub fn is_gray(&self) -> bool {
        self.tag.gray()
    }

    #[inline]
    pub fn is_alive(&self, live: Color) -> bool {
        self.tag.black() == (live == Color::Black)
    }

    #[inline]
    pub fn set_gray(&mut self, gray: bool) {
        self.tag.set_gray(gray);
    }

    #[inline]
    pub fn set_alive(&mut self, live: Color) {
        self.tag.set_black(live == Color::Black);
    }

    /// Stamp a freshly allocated header. Objects born during marking carry
    /// the live colour so the scanner treats them as opaque this cycle.
    ///
    /// # Safety
    /// `object` must point at writable payload memory obtained from
    /// [`MemManager::alloc_object`]; `manager` must be the manager that
    /// produced it.
    pub unsafe fn init(
        manager: *const MemManager,
        object: *mut Object,
        kind: u16,
        type_info: *const TypeInfo,
    ) {
        let mut tag = Tag::new();
        tag.set_kind(kind);
        tag.set_heap(true);
        tag.set_black((*manager).live_color() == Color::Black);
        (*object).tag = tag;
        (*object).type_info = type_info;
    }

    /// Reset the header after its payload has been reclaimed, so teardown
    /// does not run the heap-free hook a second time.
    #[inline]
    pub fn reset(&mut self) {
        self.tag = Tag::new();
        self.type_info = null();
    }
}
