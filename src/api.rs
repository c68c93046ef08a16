//! The C-ABI surface consumed by compiled code.
//!
//! Compiler contract, per call site:
//! - push a [`FuncFrame`] on entry whose root table covers every managed
//!   local, keep the slots current (null for dead locals), and pop the frame
//!   on every exit path;
//! - initialise each allocation's header with [`treadmill_object_init`] (or
//!   the built-in constructors) before the next runtime call;
//! - emit one static [`TypeInfo`] per aggregate type whose scan function
//!   forwards every managed field to [`treadmill_mark_object`].
//!
//! Allocation failures surface as null returns. Bounds failures route
//! through the manager's failure sink, which by default reports on stderr
//! and exits.

use std::os::raw::{c_int, c_void};
use std::ptr::null_mut;

use crate::closure::{closure_new, Closure, ClosureScanHook, FUNC_TYPE_INFO};
use crate::error::RuntimeError;
use crate::frame::FuncFrame;
use crate::header::{Object, TypeInfo};
use crate::heap::MemManager;
use crate::io;
use crate::string::{
    str_concat, str_equal, str_len, str_new, str_repeat, str_slice, Str, STRING_TYPE_INFO,
};

/// Initialise a manager in caller-provided storage. Returns 0 on success or
/// the failing phase's code (see [`crate::error::InitError`]).
///
/// # Safety
/// `manager` must point at uninitialised storage of `MemManager` size and
/// alignment (see [`treadmill_manager_size`]).
#[no_mangle]
pub unsafe extern "C" fn treadmill_manager_init(manager: *mut MemManager) -> c_int {
    match MemManager::new() {
        Ok(value) => {
            manager.write(value);
            0
        }
        Err(err) => err.code(),
    }
}

/// Free every payload, pooled buffer and cell block owned by `manager`.
///
/// # Safety
/// `manager` must have been initialised by [`treadmill_manager_init`] and
/// not torn down already.
#[no_mangle]
pub unsafe extern "C" fn treadmill_manager_deinit(manager: *mut MemManager) {
    manager.drop_in_place();
}

/// Storage footprint of a manager, for code generators reserving space.
#[no_mangle]
pub extern "C" fn treadmill_manager_size() -> usize {
    std::mem::size_of::<MemManager>()
}

/// Allocate `size` payload bytes. Null on exhaustion.
///
/// # Safety
/// `frame` must head a live frame chain honouring the rooting contract.
#[no_mangle]
pub unsafe extern "C" fn treadmill_object_alloc(frame: *mut FuncFrame, size: usize) -> *mut u8 {
    (*(*frame).mem_manager).alloc_object(frame, size)
}

/// Stamp a freshly allocated object's header.
///
/// # Safety
/// `object` must be a payload obtained from [`treadmill_object_alloc`]
/// through `frame`'s manager; `type_info` must outlive the manager.
#[no_mangle]
pub unsafe extern "C" fn treadmill_object_init(
    frame: *mut FuncFrame,
    object: *mut Object,
    kind: u16,
    type_info: *const TypeInfo,
) {
    Object::init((*frame).mem_manager, object, kind, type_info);
}

/// Run a full collection.
///
/// # Safety
/// Same rooting requirements as [`treadmill_object_alloc`].
#[no_mangle]
pub unsafe extern "C" fn treadmill_gc_start(frame: *mut FuncFrame) {
    (*(*frame).mem_manager).gc_start(frame);
}

/// Entry point for compiler-emitted scan functions: enqueue one managed
/// pointer. Tolerates null and already-visited objects.
///
/// # Safety
/// `object` must be null or owned by `manager`.
#[no_mangle]
pub unsafe extern "C" fn treadmill_mark_object(manager: *mut MemManager, object: *mut Object) {
    (*manager).mark_object(object);
}

#[no_mangle]
pub extern "C" fn treadmill_string_type_info() -> *const TypeInfo {
    &STRING_TYPE_INFO
}

#[no_mangle]
pub extern "C" fn treadmill_func_type_info() -> *const TypeInfo {
    &FUNC_TYPE_INFO
}

unsafe fn string_result(frame: *mut FuncFrame, result: Result<*mut Str, RuntimeError>) -> *mut Str {
    match result {
        Ok(s) => s,
        Err(RuntimeError::OutOfMemory) => null_mut(),
        Err(err) => (*(*frame).mem_manager).fail(err),
    }
}

/// Owned string copied from `len` bytes at `bytes` (string literals).
///
/// # Safety
/// `bytes` readable for `len` bytes; rooting contract as above.
#[no_mangle]
pub unsafe extern "C" fn treadmill_str_new(
    frame: *mut FuncFrame,
    bytes: *const u8,
    len: usize,
) -> *mut Str {
    let result = str_new(frame, bytes, len);
    string_result(frame, result)
}

/// # Safety
/// `a` and `b` must be live strings rooted by the caller.
#[no_mangle]
pub unsafe extern "C" fn treadmill_str_concat(
    frame: *mut FuncFrame,
    a: *mut Str,
    b: *mut Str,
) -> *mut Str {
    let result = str_concat(frame, a, b);
    string_result(frame, result)
}

/// # Safety
/// `s` must be a live string rooted by the caller.
#[no_mangle]
pub unsafe extern "C" fn treadmill_str_slice(
    frame: *mut FuncFrame,
    s: *mut Str,
    start: usize,
    end: usize,
) -> *mut Str {
    let result = str_slice(frame, s, start, end);
    string_result(frame, result)
}

/// # Safety
/// `a` and `b` must be live strings.
#[no_mangle]
pub unsafe extern "C" fn treadmill_str_equal(a: *const Str, b: *const Str) -> bool {
    str_equal(a, b)
}

/// # Safety
/// `s` must be a live string rooted by the caller.
#[no_mangle]
pub unsafe extern "C" fn treadmill_str_repeat(
    frame: *mut FuncFrame,
    s: *mut Str,
    n: usize,
) -> *mut Str {
    let result = str_repeat(frame, s, n);
    string_result(frame, result)
}

/// # Safety
/// `s` must be a live string.
#[no_mangle]
pub unsafe extern "C" fn treadmill_str_len(s: *const Str) -> usize {
    str_len(s)
}

/// New closure with null captures; the compiler stores captures afterwards.
/// Null on exhaustion.
///
/// # Safety
/// Rooting contract as above; `scan_hook` must walk exactly the captures
/// the compiler later installs.
#[no_mangle]
pub unsafe extern "C" fn treadmill_closure_new(
    frame: *mut FuncFrame,
    code: *const c_void,
    scan_hook: ClosureScanHook,
) -> *mut Closure {
    match closure_new(frame, code, scan_hook) {
        Ok(closure) => closure,
        Err(_) => null_mut(),
    }
}

#[no_mangle]
pub extern "C" fn treadmill_print_i32(value: i32) {
    io::print_i32(value);
}

#[no_mangle]
pub extern "C" fn treadmill_println_i32(value: i32) {
    io::println_i32(value);
}

#[no_mangle]
pub extern "C" fn treadmill_print_bool(value: bool) {
    io::print_bool(value);
}

#[no_mangle]
pub extern "C" fn treadmill_println_bool(value: bool) {
    io::println_bool(value);
}

/// # Safety
/// `s` must be a live string.
#[no_mangle]
pub unsafe extern "C" fn treadmill_print_str(s: *const Str) {
    io::print_str(s);
}

/// # Safety
/// `s` must be a live string.
#[no_mangle]
pub unsafe extern "C" fn treadmill_println_str(s: *const Str) {
    io::println_str(s);
}

#[no_mangle]
pub extern "C" fn treadmill_flush() {
    io::flush();
}
