use std::mem::size_of;
use std::ptr::{copy_nonoverlapping, null_mut};
use std::slice;

use crate::error::RuntimeError;
use crate::frame::FuncFrame;
use crate::header::{Object, Tag, TypeInfo, KIND_STR, KIND_STR_SLICE};
use crate::heap::MemManager;

/// Managed string. Two kinds share this layout: owned strings (`KIND_STR`)
/// hold their byte buffer, slices (`KIND_STR_SLICE`) borrow a window of the
/// owned string reached through `src`. A slice's `src` always points at an
/// owned string directly; chains are collapsed at construction.
#[repr(C)]
pub struct Str {
    pub object: Object,
    pub len: usize,
    pub data: *mut u8,
    pub src: *mut Str,
}

pub static STRING_TYPE_INFO: TypeInfo = TypeInfo {
    scan: Some(string_scan),
    heap_free: Some(string_heap_free),
};

struct StaticStr(Str);

// The canonical empty string is immutable: its heap bit is clear, so the
// collector never touches the header.
unsafe impl Sync for StaticStr {}

static EMPTY_STRING: StaticStr = StaticStr(Str {
    object: Object {
        tag: Tag::from_bytes([KIND_STR as u8, (KIND_STR >> 8) as u8, 0, 0]),
        type_info: &STRING_TYPE_INFO,
    },
    len: 0,
    data: null_mut(),
    src: null_mut(),
});

/// The process-wide empty string. Must never be written through.
pub fn empty_string() -> *mut Str {
    &EMPTY_STRING.0 as *const Str as *mut Str
}

unsafe fn alloc_str(frame: *mut FuncFrame, kind: u16) -> Result<*mut Str, RuntimeError> {
    let manager = (*frame).mem_manager;
    let payload = (*manager).alloc_object(frame, size_of::<Str>());
    if payload.is_null() {
        return Err(RuntimeError::OutOfMemory);
    }
    let s = payload as *mut Str;
    Object::init(manager, s as *mut Object, kind, &STRING_TYPE_INFO);
    Ok(s)
}

/// Wrap an already-filled buffer in a new owned string, taking ownership of
/// the buffer even on failure.
unsafe fn finish_owned(
    frame: *mut FuncFrame,
    buf: *mut u8,
    len: usize,
) -> Result<*mut Str, RuntimeError> {
    let s = match alloc_str(frame, KIND_STR) {
        Ok(s) => s,
        Err(err) => {
            libc::free(buf as *mut libc::c_void);
            return Err(err);
        }
    };
    (*s).len = len;
    (*s).data = buf;
    (*s).src = null_mut();
    Ok(s)
}

/// New owned string holding a copy of `len` bytes at `bytes`. Compiled code
/// uses this to materialise string literals.
///
/// # Safety
/// `bytes` must be readable for `len` bytes; `frame` must satisfy the
/// rooting contract of [`MemManager::alloc_object`].
pub unsafe fn str_new(
    frame: *mut FuncFrame,
    bytes: *const u8,
    len: usize,
) -> Result<*mut Str, RuntimeError> {
    if len == 0 {
        return Ok(empty_string());
    }
    let buf = libc::malloc(len) as *mut u8;
    if buf.is_null() {
        return Err(RuntimeError::OutOfMemory);
    }
    copy_nonoverlapping(bytes, buf, len);
    finish_owned(frame, buf, len)
}

/// Owned string `a ++ b`; the canonical empty string when both are empty.
///
/// # Safety
/// `a` and `b` must be live strings kept rooted by the caller across the
/// allocation.
pub unsafe fn str_concat(
    frame: *mut FuncFrame,
    a: *mut Str,
    b: *mut Str,
) -> Result<*mut Str, RuntimeError> {
    let a_len = (*a).len;
    let b_len = (*b).len;
    if a_len == 0 && b_len == 0 {
        return Ok(empty_string());
    }
    let total = a_len.checked_add(b_len).ok_or(RuntimeError::OutOfMemory)?;
    // The buffer is filled before the allocation below so an interleaved
    // collection step cannot observe a half-built object.
    let buf = libc::malloc(total) as *mut u8;
    if buf.is_null() {
        return Err(RuntimeError::OutOfMemory);
    }
    if a_len != 0 {
        copy_nonoverlapping((*a).data as *const u8, buf, a_len);
    }
    if b_len != 0 {
        copy_nonoverlapping((*b).data as *const u8, buf.add(a_len), b_len);
    }
    finish_owned(frame, buf, total)
}

/// The byte window `s[start..end]`.
///
/// Empty windows yield the canonical empty string and the full window
/// yields `s` itself; anything else becomes a slice over the owned string
/// backing `s`. A window that reaches outside `s` is an
/// [`RuntimeError::IndexOutOfBounds`], which also covers `start` past the
/// end except for the empty `s[len..len]` window.
///
/// # Safety
/// `s` must be a live string kept rooted by the caller across the
/// allocation.
pub unsafe fn str_slice(
    frame: *mut FuncFrame,
    s: *mut Str,
    start: usize,
    end: usize,
) -> Result<*mut Str, RuntimeError> {
    let len = (*s).len;
    if start > end || end > len {
        return Err(RuntimeError::IndexOutOfBounds { start, end, len });
    }
    if end - start == 0 {
        return Ok(empty_string());
    }
    if start == 0 && end == len {
        return Ok(s);
    }
    let data = (*s).data.add(start);
    let sub_len = end - start;
    let mut root = s;
    while (*root).object.kind() == KIND_STR_SLICE {
        root = (*root).src;
    }
    let out = alloc_str(frame, KIND_STR_SLICE)?;
    (*out).len = sub_len;
    (*out).data = data;
    (*out).src = root;
    Ok(out)
}

/// Byte equality.
///
/// # Safety
/// `a` and `b` must be live strings.
pub unsafe fn str_equal(a: *const Str, b: *const Str) -> bool {
    if a == b {
        return true;
    }
    let len = (*a).len;
    if len != (*b).len {
        return false;
    }
    if len == 0 {
        return true;
    }
    slice::from_raw_parts((*a).data as *const u8, len)
        == slice::from_raw_parts((*b).data as *const u8, len)
}

/// Owned string of `n` copies of `s`; `n == 1` returns `s` itself.
///
/// # Safety
/// `s` must be a live string kept rooted by the caller across the
/// allocation.
pub unsafe fn str_repeat(
    frame: *mut FuncFrame,
    s: *mut Str,
    n: usize,
) -> Result<*mut Str, RuntimeError> {
    if n == 0 {
        return Ok(empty_string());
    }
    if n == 1 {
        return Ok(s);
    }
    let len = (*s).len;
    if len == 0 {
        return Ok(empty_string());
    }
    let total = len.checked_mul(n).ok_or(RuntimeError::OutOfMemory)?;
    let buf = libc::malloc(total) as *mut u8;
    if buf.is_null() {
        return Err(RuntimeError::OutOfMemory);
    }
    for i in 0..n {
        copy_nonoverlapping((*s).data as *const u8, buf.add(i * len), len);
    }
    finish_owned(frame, buf, total)
}

/// Byte length.
///
/// # Safety
/// `s` must be a live string.
pub unsafe fn str_len(s: *const Str) -> usize {
    (*s).len
}

// A slice keeps its backing store alive by re-marking `src`; owned strings
// have no outgoing managed pointers.
pub unsafe extern "C" fn string_scan(manager: *mut MemManager, object: *mut Object) {
    if (*object).kind() == KIND_STR_SLICE {
        let s = object as *mut Str;
        (*manager).mark_object((*s).src as *mut Object);
    }
}

pub unsafe extern "C" fn string_heap_free(object: *mut Object) {
    if (*object).kind() == KIND_STR {
        let s = object as *mut Str;
        if !(*s).data.is_null() {
            libc::free((*s).data as *mut libc::c_void);
        }
    }
}
