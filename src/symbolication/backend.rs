//! Deferred dynamic binding of the private CoreSymbolication framework.
//!
//! CoreSymbolication is never a build-time dependency: it is a private system
//! framework whose entry points are resolved by name at first use, from a
//! fixed on-disk path. The resolved function pointers live in a process-wide,
//! write-once table behind a [`OnceLock`], so concurrent first callers
//! converge on a single binding attempt.
//!
//! Binding is deliberately non-fatal. A missing entry point is reported
//! per-symbol and left as `None`; every wrapper below treats an unbound entry
//! as a null/empty result instead of calling through it. Callers observe an
//! unusable backend as "not found", never as a crash.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::path::PathBuf;
use std::sync::OnceLock;

use block::Block;
use libloading::Library;
use mach2::port::mach_port_t;

use crate::{debug, error};

/// On-disk location of the backend. Loaded by path, not by link.
const FRAMEWORK_PATH: &str =
    "/System/Library/PrivateFrameworks/CoreSymbolication.framework/CoreSymbolication";

/// The backend's sentinel meaning "as of now" for all at-time lookups.
pub(crate) const CS_NOW: u64 = 0x8000_0000;

/// A two-word opaque CoreSymbolication capability (`CSTypeRef`).
///
/// Emptiness is decided by the backend's own null predicate, never by
/// structural comparison; the pointer words carry no meaning to us.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CsRef {
    data: *mut c_void,
    obj: *mut c_void,
}

impl CsRef {
    /// The value handed back when an entry point is unbound; the null
    /// predicate (and its unbound fallback) classify it as empty.
    pub(crate) const NULL: CsRef = CsRef {
        data: std::ptr::null_mut(),
        obj: std::ptr::null_mut(),
    };
}

/// An `{address, length}` symbol range (`CSRange`).
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct CsRange {
    pub location: u64,
    pub length: u64,
}

type CreateWithTaskFn = unsafe extern "C" fn(mach_port_t, u32, *mut c_void) -> CsRef;
type OwnerForAddressFn = unsafe extern "C" fn(CsRef, u64, u64) -> CsRef;
type OwnerForNameFn = unsafe extern "C" fn(CsRef, *const c_char, u64) -> CsRef;
type SymbolForAddressFn = unsafe extern "C" fn(CsRef, u64) -> CsRef;
// Darwin `Boolean` is an unsigned char, not a Rust bool.
type IsNullFn = unsafe extern "C" fn(CsRef) -> u8;
type CStringOfFn = unsafe extern "C" fn(CsRef) -> *const c_char;
type RangeOfFn = unsafe extern "C" fn(CsRef) -> CsRange;
type OwnerCountFn = unsafe extern "C" fn(CsRef, u64) -> c_int;
type ForeachSymbolFn = unsafe extern "C" fn(CsRef, u64, *const Block<(CsRef,), ()>) -> c_int;
type RetainFn = unsafe extern "C" fn(CsRef) -> CsRef;
type ReleaseFn = unsafe extern "C" fn(CsRef);

/// The write-once entry-point table. Fields are `None` when the symbol could
/// not be located at bind time.
pub(crate) struct Backend {
    create_with_task: Option<CreateWithTaskFn>,
    owner_for_address: Option<OwnerForAddressFn>,
    owner_for_name: Option<OwnerForNameFn>,
    symbol_for_address: Option<SymbolForAddressFn>,
    is_null: Option<IsNullFn>,
    symbol_name: Option<CStringOfFn>,
    owner_path: Option<CStringOfFn>,
    symbol_range: Option<RangeOfFn>,
    owner_count: Option<OwnerCountFn>,
    foreach_symbol: Option<ForeachSymbolFn>,
    retain: Option<RetainFn>,
    release: Option<ReleaseFn>,
    // Keeps the framework image mapped for the life of the process.
    _lib: Library,
}

static BACKEND: OnceLock<Option<Backend>> = OnceLock::new();

macro_rules! resolve {
    ($lib:expr, $ty:ty, $name:literal) => {
        match unsafe { $lib.get::<$ty>($name) } {
            Ok(symbol) => Some(*symbol),
            Err(_) => {
                error!(
                    "backend entry point missing: {}",
                    String::from_utf8_lossy(&$name[..$name.len() - 1])
                );
                None
            }
        }
    };
}

fn load() -> Option<Backend> {
    let lib = match unsafe { Library::new(FRAMEWORK_PATH) } {
        Ok(lib) => lib,
        Err(err) => {
            error!("failed to load symbolication backend: {}", err);
            return None;
        }
    };

    let backend = Backend {
        create_with_task: resolve!(
            lib,
            CreateWithTaskFn,
            b"CSSymbolicatorCreateWithTaskFlagsAndNotification\0"
        ),
        owner_for_address: resolve!(
            lib,
            OwnerForAddressFn,
            b"CSSymbolicatorGetSymbolOwnerWithAddressAtTime\0"
        ),
        owner_for_name: resolve!(
            lib,
            OwnerForNameFn,
            b"CSSymbolicatorGetSymbolOwnerWithNameAtTime\0"
        ),
        symbol_for_address: resolve!(lib, SymbolForAddressFn, b"CSSymbolOwnerGetSymbolWithAddress\0"),
        is_null: resolve!(lib, IsNullFn, b"CSIsNull\0"),
        symbol_name: resolve!(lib, CStringOfFn, b"CSSymbolGetName\0"),
        owner_path: resolve!(lib, CStringOfFn, b"CSSymbolOwnerGetPath\0"),
        symbol_range: resolve!(lib, RangeOfFn, b"CSSymbolGetRange\0"),
        owner_count: resolve!(lib, OwnerCountFn, b"CSSymbolicatorGetSymbolOwnerCountAtTime\0"),
        foreach_symbol: resolve!(
            lib,
            ForeachSymbolFn,
            b"CSSymbolicatorForeachSymbolAtTime\0"
        ),
        retain: resolve!(lib, RetainFn, b"CSRetain\0"),
        release: resolve!(lib, ReleaseFn, b"CSRelease\0"),
        _lib: lib,
    };

    debug!("symbolication backend bound");
    Some(backend)
}

/// Performs the one-time backend binding and returns the table, or `None`
/// when the framework itself could not be loaded.
///
/// Idempotent and safe under concurrent first use: exactly one caller runs
/// the real binding, everyone else blocks until it finishes and observes the
/// same result.
pub(crate) fn bind() -> Option<&'static Backend> {
    BACKEND.get_or_init(load).as_ref()
}

// Total wrappers: each one tolerates an unbound entry point by returning the
// null/empty value for its result type.
impl Backend {
    pub(crate) fn create_symbolicator(&self, task: mach_port_t) -> CsRef {
        match self.create_with_task {
            Some(f) => unsafe { f(task, 1, std::ptr::null_mut()) },
            None => CsRef::NULL,
        }
    }

    /// The backend's null-capability predicate. An unbound predicate means
    /// no handle can be proven live, so everything classifies as null.
    pub(crate) fn is_null(&self, r: CsRef) -> bool {
        match self.is_null {
            Some(f) => unsafe { f(r) } != 0,
            None => true,
        }
    }

    pub(crate) fn retain(&self, r: CsRef) {
        if let Some(f) = self.retain {
            unsafe {
                f(r);
            }
        }
    }

    pub(crate) fn release(&self, r: CsRef) {
        if let Some(f) = self.release {
            unsafe { f(r) }
        }
    }

    pub(crate) fn owner_for_address(&self, symbolicator: CsRef, address: u64) -> CsRef {
        match self.owner_for_address {
            Some(f) => unsafe { f(symbolicator, address, CS_NOW) },
            None => CsRef::NULL,
        }
    }

    pub(crate) fn owner_for_name(&self, symbolicator: CsRef, name: &CStr) -> CsRef {
        match self.owner_for_name {
            Some(f) => unsafe { f(symbolicator, name.as_ptr(), CS_NOW) },
            None => CsRef::NULL,
        }
    }

    pub(crate) fn symbol_for_address(&self, owner: CsRef, address: u64) -> CsRef {
        match self.symbol_for_address {
            Some(f) => unsafe { f(owner, address) },
            None => CsRef::NULL,
        }
    }

    pub(crate) fn symbol_name(&self, symbol: CsRef) -> Option<String> {
        let f = self.symbol_name?;
        let ptr = unsafe { f(symbol) };
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    pub(crate) fn owner_path(&self, owner: CsRef) -> Option<PathBuf> {
        let f = self.owner_path?;
        let ptr = unsafe { f(owner) };
        if ptr.is_null() {
            return None;
        }
        Some(PathBuf::from(
            unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned(),
        ))
    }

    pub(crate) fn symbol_range(&self, symbol: CsRef) -> CsRange {
        match self.symbol_range {
            Some(f) => unsafe { f(symbol) },
            None => CsRange::default(),
        }
    }

    pub(crate) fn owner_count(&self, symbolicator: CsRef) -> c_int {
        match self.owner_count {
            Some(f) => unsafe { f(symbolicator, CS_NOW) },
            None => 0,
        }
    }

    /// Drives the backend's symbol traversal, invoking `block` once per
    /// symbol across every loaded image. Finite and non-restartable; a no-op
    /// when the traversal entry point is unbound.
    pub(crate) fn foreach_symbol(&self, symbolicator: CsRef, block: &Block<(CsRef,), ()>) {
        if let Some(f) = self.foreach_symbol {
            unsafe {
                f(symbolicator, CS_NOW, block);
            }
        }
    }
}
