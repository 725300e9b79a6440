//! The high-level entry point for dylib injection.
//!
//! This module composes the crate's primitives in a fixed order: resolve the
//! loader entry point's randomized address in the target, stage the library
//! path into the target's address space, and launch a remote thread at the
//! resolved address with the staged string as first argument. It
//! short-circuits on the first failure and never cleans up steps already
//! performed; a staged path is not reclaimed when the launch fails.

use std::path::Path;

use crate::error::{Error, Result};
use crate::symbolication::Symbolicator;
use crate::task::TaskHandle;
use crate::{info, memory, thread};

/// Name of the dynamic-library-loading entry point resolved in the target.
const LOADER_ENTRY_POINT: &str = "dlopen";

/// A stateless facade over the injection lifecycle.
///
/// Each operation acquires its own [`TaskHandle`] from the pid and releases
/// it on return. Operations against the same target are not safe to
/// interleave from multiple threads; order them externally.
pub struct Injector;

impl Injector {
    /// Resolves the runtime address of `name` inside the process `pid`.
    ///
    /// # Errors
    /// Task acquisition errors from [`TaskHandle::for_pid`];
    /// [`Error::BackendUnavailable`] when symbolication cannot be bound;
    /// [`Error::NotFound`] when no loaded image in the target exports `name`.
    pub fn resolve_function_address(name: &str, pid: libc::pid_t) -> Result<u64> {
        let task = TaskHandle::for_pid(pid)?;
        let symbolicator = Symbolicator::for_task(&task)?;
        symbolicator
            .address_for_name(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Stages `argument` (NUL-terminated) into the target and starts a
    /// remote thread at `address` with the staged string's address as first
    /// argument.
    ///
    /// Success means the thread was created and began running; the remote
    /// call's completion and return value are unobservable by contract.
    pub fn call_remote_function_with_string(
        address: u64,
        argument: &str,
        pid: libc::pid_t,
    ) -> Result<()> {
        let task = TaskHandle::for_pid(pid)?;
        Self::call_with_string_in_task(&task, address, argument)
    }

    /// Injects the dylib at `library_path` into the process `pid` by forcing
    /// it to call the loader entry point on the staged path.
    ///
    /// The loader's mode argument is whatever the fresh thread state leaves
    /// in the second-argument slot; only the path is controlled. Success
    /// means the loader call was launched, not that the library loaded.
    ///
    /// # Errors
    /// [`Error::EntryPointNotFound`] when the loader entry point cannot be
    /// resolved (no memory is written in that case); otherwise the first
    /// failing step's error, propagated unchanged.
    pub fn inject_library(library_path: &Path, pid: libc::pid_t) -> Result<()> {
        let path = library_path
            .to_str()
            .ok_or_else(|| Error::Validation("library path is not valid UTF-8".into()))?;

        let task = TaskHandle::for_pid(pid)?;
        Self::inject_with_entry(&task, LOADER_ENTRY_POINT, path)
    }

    /// Resolves `entry_name` in the task and launches it on the staged
    /// `path`. Resolution failure aborts before any write into the target.
    fn inject_with_entry(task: &TaskHandle, entry_name: &str, path: &str) -> Result<()> {
        let symbolicator = Symbolicator::for_task(task)?;
        let entry = symbolicator
            .address_for_name(entry_name)
            .ok_or_else(|| Error::EntryPointNotFound(entry_name.to_string()))?;

        info!(
            "injecting {} into pid {} via {} at {:#x}",
            path,
            task.pid(),
            entry_name,
            entry
        );
        Self::call_with_string_in_task(task, entry, path)
    }

    fn call_with_string_in_task(task: &TaskHandle, address: u64, argument: &str) -> Result<()> {
        let staged = memory::write_string(task, argument)?;
        thread::start_thread(task, address, staged.address)
    }
}

/// The kernel-return-code call surface.
///
/// Mirrors the crate's operations with the host OS's status-code convention:
/// a zero/null sentinel for resolution failure, [`KERN_SUCCESS`] for
/// success, and distinct kernel codes per failure class (see
/// [`crate::error::Error::kern_return`]). Intended for thin collaborators
/// that cannot consume `Result`.
///
/// [`KERN_SUCCESS`]: crate::error::KERN_SUCCESS
pub mod raw {
    use std::path::Path;

    use super::Injector;
    use crate::error::{KernReturn, KERN_SUCCESS};

    /// Address of `name` in `pid`, or `0` when resolution fails for any
    /// reason. Never returns a spurious nonzero value.
    pub fn resolve_function_address(name: &str, pid: libc::pid_t) -> u64 {
        Injector::resolve_function_address(name, pid).unwrap_or(0)
    }

    /// Status-code form of [`Injector::inject_library`].
    pub fn inject_library(library_path: &Path, pid: libc::pid_t) -> KernReturn {
        match Injector::inject_library(library_path, pid) {
            Ok(()) => KERN_SUCCESS,
            Err(err) => err.kern_return(),
        }
    }

    /// Status-code form of [`Injector::call_remote_function_with_string`].
    pub fn call_remote_function_with_string(
        address: u64,
        argument: &str,
        pid: libc::pid_t,
    ) -> KernReturn {
        match Injector::call_remote_function_with_string(address, argument, pid) {
            Ok(()) => KERN_SUCCESS,
            Err(err) => err.kern_return(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A pid above macOS's pid_max, so acquisition fails before any remote
    // side effect is possible.
    const DEAD_PID: libc::pid_t = 999_999;

    #[test]
    fn inject_into_dead_pid_fails_before_any_side_effect() {
        let result = Injector::inject_library(Path::new("/tmp/payload.dylib"), DEAD_PID);
        assert!(matches!(result, Err(Error::NoSuchProcess(_))));
    }

    #[test]
    fn raw_surface_reports_kernel_codes() {
        assert_eq!(raw::resolve_function_address("dlopen", DEAD_PID), 0);
        assert_eq!(raw::inject_library(Path::new("/tmp/x.dylib"), DEAD_PID), 4);
        assert_eq!(
            raw::call_remote_function_with_string(0x1000, "/tmp/x.dylib", DEAD_PID),
            4
        );
    }

    #[test]
    fn unknown_name_resolves_to_not_found() {
        // Needs a task port for our own process; skip when denied.
        let pid = unsafe { libc::getpid() };
        if TaskHandle::for_pid(pid).is_err() {
            return;
        }
        let result = Injector::resolve_function_address("machject_no_such_fn_z3k", pid);
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(raw::resolve_function_address("machject_no_such_fn_z3k", pid), 0);
    }

    #[test]
    fn unresolvable_entry_point_aborts_before_any_write() {
        // Needs a task port for our own process; skip when denied or when
        // the backend is not loadable.
        let pid = unsafe { libc::getpid() };
        let Ok(task) = TaskHandle::for_pid(pid) else {
            return;
        };
        if !crate::symbolication::bind_backend() {
            return;
        }
        let result =
            Injector::inject_with_entry(&task, "machject_no_such_loader_q7", "/tmp/x.dylib");
        assert!(matches!(result, Err(Error::EntryPointNotFound(_))));
    }
}
