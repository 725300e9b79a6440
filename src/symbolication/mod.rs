//! Symbol resolution against a live task.
//!
//! Function addresses in a freshly-launched process are randomized per load,
//! so a static symbol table is useless here. A [`Symbolicator`] is bound to
//! one task and re-derives name ⇄ address mappings from the target's loaded
//! images at resolution time, "as of now".
//!
//! All resolution is delegated to the lazily-bound private backend (see
//! [`backend`]); when the backend is absent or partially bound, every lookup
//! degrades to "not found".

pub(crate) mod backend;

use std::cell::RefCell;
use std::ffi::CString;
use std::marker::PhantomData;
use std::path::PathBuf;

use block::ConcreteBlock;

use crate::debug;
use crate::error::{Error, Result};
use crate::task::TaskHandle;

use backend::{Backend, CsRef};

/// Performs the one-time backend binding and reports whether the backend is
/// loadable.
///
/// Calling this is optional ([`Symbolicator::for_task`] binds on first use)
/// but lets a host front-load the work. Concurrent first calls converge on a
/// single binding attempt and all observe the same outcome.
pub fn bind_backend() -> bool {
    backend::bind().is_some()
}

/// A named code/data range inside one loaded image of the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// The symbol's name, when the backend reports one.
    pub name: Option<String>,
    /// Start address inside the target's address space.
    pub address: u64,
    /// Length of the range in bytes.
    pub length: u64,
}

/// A live view of one task's loaded images and their symbols.
///
/// Wraps a reference-counted backend capability: creation applies one extra
/// retain so the handle cannot race backend-internal teardown, and `Drop`
/// performs the single matching release.
pub struct Symbolicator {
    raw: CsRef,
    cs: &'static Backend,
}

impl Symbolicator {
    /// Builds a symbolicator for the given task, binding the backend first if
    /// this is the process's first use of it.
    ///
    /// # Errors
    /// Returns [`Error::BackendUnavailable`] when the backend framework
    /// cannot be loaded or yields no usable symbolicator for the task.
    pub fn for_task(task: &TaskHandle) -> Result<Self> {
        let cs = backend::bind()
            .ok_or(Error::BackendUnavailable("backend framework not loadable"))?;

        let raw = cs.create_symbolicator(task.port());
        if cs.is_null(raw) {
            return Err(Error::BackendUnavailable(
                "backend returned a null symbolicator for the task",
            ));
        }
        cs.retain(raw);

        debug!("created symbolicator for pid {}", task.pid());
        Ok(Self { raw, cs })
    }

    /// Finds the loaded image containing `address`, as of now.
    pub fn owner_for_address(&self, address: u64) -> Option<SymbolOwner<'_>> {
        let raw = self.cs.owner_for_address(self.raw, address);
        self.wrap_owner(raw)
    }

    /// Finds the loaded image matching `name`, as of now.
    pub fn owner_for_name(&self, name: &str) -> Option<SymbolOwner<'_>> {
        let name = CString::new(name).ok()?;
        let raw = self.cs.owner_for_name(self.raw, &name);
        self.wrap_owner(raw)
    }

    /// Resolves `address` to the name of the symbol whose range contains it:
    /// owner lookup, then symbol lookup within the owner. `None` when either
    /// step yields a null capability.
    pub fn name_for_address(&self, address: u64) -> Option<String> {
        let owner = self.owner_for_address(address)?;
        let symbol = owner.symbol_for_address(address)?;
        symbol.name
    }

    /// Resolves `name` to the start address of the first symbol with exactly
    /// that name, in the backend's enumeration order of loaded images
    /// (typically load order).
    ///
    /// Exact, case-sensitive match; `None` when no image exports the name.
    pub fn address_for_name(&self, name: &str) -> Option<u64> {
        let found = std::cell::Cell::new(None);
        self.for_each_symbol(|symbol| {
            if found.get().is_none() && symbol.name.as_deref() == Some(name) {
                found.set(Some(symbol.address));
            }
        });
        found.get()
    }

    /// Number of loaded images the backend reports for the task, as of now.
    pub fn owner_count(&self) -> usize {
        self.cs.owner_count(self.raw).max(0) as usize
    }

    /// Invokes `visit` once for every symbol across every loaded image.
    ///
    /// Ordering is backend-defined and not stable across process runs. The
    /// traversal is finite, driven entirely by the backend, and cannot be
    /// resumed or aborted early.
    pub fn for_each_symbol<F>(&self, visit: F)
    where
        F: FnMut(Symbol),
    {
        // The backend invokes the block with a Fn signature; the RefCell
        // bridges that to the caller's FnMut.
        let visit = RefCell::new(visit);
        let block = ConcreteBlock::new(|raw: CsRef| {
            if self.cs.is_null(raw) {
                return;
            }
            let range = self.cs.symbol_range(raw);
            (*visit.borrow_mut())(Symbol {
                name: self.cs.symbol_name(raw),
                address: range.location,
                length: range.length,
            });
        });
        self.cs.foreach_symbol(self.raw, &block);
    }

    fn wrap_owner(&self, raw: CsRef) -> Option<SymbolOwner<'_>> {
        if self.cs.is_null(raw) {
            return None;
        }
        Some(SymbolOwner {
            raw,
            cs: self.cs,
            _symbolicator: PhantomData,
        })
    }
}

impl Drop for Symbolicator {
    fn drop(&mut self) {
        // Exactly one release, matching the retain applied at creation.
        self.cs.release(self.raw);
    }
}

/// One loaded image (executable or shared library) inside the target.
///
/// A transient view: valid only while the owning [`Symbolicator`] is alive,
/// which the lifetime parameter enforces.
pub struct SymbolOwner<'a> {
    raw: CsRef,
    cs: &'static Backend,
    _symbolicator: PhantomData<&'a Symbolicator>,
}

impl SymbolOwner<'_> {
    /// Filesystem path of the image, when the backend reports one.
    pub fn path(&self) -> Option<PathBuf> {
        self.cs.owner_path(self.raw)
    }

    /// Finds the symbol within this image whose range contains `address`.
    pub fn symbol_for_address(&self, address: u64) -> Option<Symbol> {
        let raw = self.cs.symbol_for_address(self.raw, address);
        if self.cs.is_null(raw) {
            return None;
        }
        let range = self.cs.symbol_range(raw);
        Some(Symbol {
            name: self.cs.symbol_name(raw),
            address: range.location,
            length: range.length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Live tests run against the test process itself and bail when the task
    // port is denied (SIP without a debugger entitlement).
    fn own_symbolicator() -> Option<(TaskHandle, Symbolicator)> {
        let task = TaskHandle::for_pid(unsafe { libc::getpid() }).ok()?;
        let symbolicator = Symbolicator::for_task(&task).ok()?;
        Some((task, symbolicator))
    }

    #[test]
    fn binding_is_consistent_under_concurrent_first_use() {
        let results: Vec<bool> = std::thread::scope(|scope| {
            (0..8)
                .map(|_| scope.spawn(bind_backend))
                .collect::<Vec<_>>()
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect()
        });
        // One binding attempt; every caller observes the same outcome.
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn dlopen_resolves_within_its_image() {
        let Some((_task, symbolicator)) = own_symbolicator() else {
            return;
        };

        let address = symbolicator.address_for_name("dlopen").unwrap();
        assert_ne!(address, 0);

        // The resolved address must fall inside a loaded image whose symbol
        // range contains it. Aliased exports may report a different name for
        // the same range, so only the range is asserted exactly.
        let owner = symbolicator.owner_for_address(address).unwrap();
        let symbol = owner.symbol_for_address(address).unwrap();
        assert!(symbol.name.is_some());
        assert!(symbol.address <= address && address < symbol.address + symbol.length.max(1));
        assert!(symbolicator.name_for_address(address).is_some());
    }

    #[test]
    fn resolution_is_stable_within_a_process_lifetime() {
        let Some((_task, symbolicator)) = own_symbolicator() else {
            return;
        };
        let first = symbolicator.address_for_name("malloc");
        let second = symbolicator.address_for_name("malloc");
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_symbol_is_absent_not_spurious() {
        let Some((_task, symbolicator)) = own_symbolicator() else {
            return;
        };
        assert_eq!(
            symbolicator.address_for_name("machject_no_such_symbol_x9q"),
            None
        );
    }

    #[test]
    fn owner_lookup_by_name_reports_a_path() {
        let Some((_task, symbolicator)) = own_symbolicator() else {
            return;
        };
        assert!(symbolicator.owner_count() > 0);

        let owner = symbolicator.owner_for_name("libsystem_c.dylib").unwrap();
        let path = owner.path().unwrap();
        assert!(path.to_string_lossy().contains("libsystem_c"));
    }
}
