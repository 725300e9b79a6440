//! # Machject
//!
//! **Machject** is a library for dylib injection into running processes on macOS.
//! It provides the remote code execution primitives the technique is built from:
//! resolving a named function's randomized runtime address inside a target task,
//! staging byte buffers into the target's address space, and launching a thread
//! inside the target at a chosen address with a chosen first argument.
//!
//! ## Core Architecture
//!
//! Injection composes three primitives over one task port:
//! **Resolve** (symbolication) $\to$ **Stage** (remote memory) $\to$ **Launch**
//! (remote thread). Symbol resolution goes through the private
//! CoreSymbolication framework, bound lazily by path at first use (never
//! linked at build time), so its absence degrades lookups to "not found"
//! instead of failing the host.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! # fn main() -> Result<(), machject::Error> {
//! # #[cfg(target_os = "macos")]
//! # {
//! use machject::Injector;
//! use std::path::Path;
//!
//! // Resolve the loader entry point in the target, stage the path, and
//! // force the target to dlopen it.
//! Injector::inject_library(Path::new("/tmp/payload.dylib"), 1024)?;
//!
//! // Or drive the primitives directly:
//! let address = Injector::resolve_function_address("dlopen", 1024)?;
//! Injector::call_remote_function_with_string(address, "/tmp/payload.dylib", 1024)?;
//! # }
//! # Ok(())
//! # }
//! ```
//!
//! ## Contract limits
//!
//! Remote execution is fire-and-forget: success means the thread was created
//! and began running, nothing more. There is no channel for the remote call's
//! return value, no supervision of the launched thread, and staged memory is
//! never reclaimed. Acquiring a task port requires privilege (root, SIP
//! debugging disabled, or a `get-task-allow` target).
//!
//! ## Feature Flags
//!
//! Logging uses `tracing` and is enabled by default; disable the `tracing`
//! feature to strip every log call site from the binary.
//!
//! ```toml
//! [dependencies]
//! machject = { version = "0.1", default-features = false }
//! ```

/// Error types and the kernel-return-code convention.
pub mod error;
/// The injection orchestrator and its raw status-code surface.
#[cfg(target_os = "macos")]
pub mod injector;
/// Remote memory allocation and cross-task writes.
#[cfg(target_os = "macos")]
pub mod memory;
/// Symbol resolution against a live task via the lazily-bound backend.
#[cfg(target_os = "macos")]
pub mod symbolication;
/// Task port acquisition and ownership.
#[cfg(target_os = "macos")]
pub mod task;
/// Remote thread creation with per-architecture initial state.
#[cfg(target_os = "macos")]
pub mod thread;

// Re-exports (Public API)
pub use error::{Error, KernReturn, Result, KERN_SUCCESS};
#[cfg(target_os = "macos")]
pub use injector::Injector;
#[cfg(target_os = "macos")]
pub use memory::RemoteAllocation;
#[cfg(target_os = "macos")]
pub use symbolication::{bind_backend, Symbol, SymbolOwner, Symbolicator};
#[cfg(target_os = "macos")]
pub use task::TaskHandle;

// Re-export log macros for internal use across modules.
// This allows injection code to use `crate::debug!` regardless of the logging backend.
#[cfg(feature = "tracing")]
#[allow(unused_imports)]
pub(crate) use tracing::{debug, error, info, warn};

#[cfg(not(feature = "tracing"))]
mod stealth {
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }
}

#[cfg(not(feature = "tracing"))]
pub(crate) use stealth::*;
