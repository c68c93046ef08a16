use std::mem::size_of;
use std::os::raw::c_void;
use std::ptr::null_mut;

use crate::error::RuntimeError;
use crate::frame::FuncFrame;
use crate::header::{Object, ScanFn, TypeInfo, KIND_FUNC};
use crate::heap::MemManager;

/// Per-closure capture scanner, emitted by the compiler for closures whose
/// captures hold managed pointers.
pub type ClosureScanHook = Option<ScanFn>;

/// Managed closure record: entry point plus a captures buffer the compiler
/// fills in after construction. Captures live outside the managed heap
/// (plain `malloc`), so the per-closure hook is the only thing that keeps
/// captured managed pointers alive.
#[repr(C)]
pub struct Closure {
    pub object: Object,
    pub code: *const c_void,
    pub captures: *mut u8,
    pub scan_hook: ClosureScanHook,
}

pub static FUNC_TYPE_INFO: TypeInfo = TypeInfo {
    scan: Some(func_scan),
    heap_free: Some(func_heap_free),
};

/// New closure with no captures yet.
///
/// # Safety
/// `frame` must satisfy the rooting contract of
/// [`MemManager::alloc_object`].
pub unsafe fn closure_new(
    frame: *mut FuncFrame,
    code: *const c_void,
    scan_hook: ClosureScanHook,
) -> Result<*mut Closure, RuntimeError> {
    let manager = (*frame).mem_manager;
    let payload = (*manager).alloc_object(frame, size_of::<Closure>());
    if payload.is_null() {
        return Err(RuntimeError::OutOfMemory);
    }
    let closure = payload as *mut Closure;
    Object::init(manager, closure as *mut Object, KIND_FUNC, &FUNC_TYPE_INFO);
    (*closure).code = code;
    (*closure).captures = null_mut();
    (*closure).scan_hook = scan_hook;
    Ok(closure)
}

pub unsafe extern "C" fn func_scan(manager: *mut MemManager, object: *mut Object) {
    let closure = object as *mut Closure;
    if let Some(hook) = (*closure).scan_hook {
        hook(manager, object);
    }
}

pub unsafe extern "C" fn func_heap_free(object: *mut Object) {
    let closure = object as *mut Closure;
    if !(*closure).captures.is_null() {
        libc::free((*closure).captures as *mut c_void);
        (*closure).captures = null_mut();
    }
}
