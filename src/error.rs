//! Centralized error handling types for the library.
//!
//! This module leverages the `thiserror` crate to provide a unified [`Error`] enum
//! covering every cross-process failure mode, plus the collapse of those errors
//! into the kernel-return-code convention used by the raw call surface
//! (`injector::raw`).

/// A convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// A kernel-style status code, mirroring Darwin's `kern_return_t`.
///
/// Declared here (rather than borrowed from `mach2`) so the status-code
/// surface stays available on non-macOS builds of the crate.
pub type KernReturn = i32;

/// The distinguished success value of the kernel-return-code convention.
pub const KERN_SUCCESS: KernReturn = 0;

// Kernel codes the error collapse maps onto. Values match <mach/kern_return.h>.
const KERN_INVALID_ADDRESS: KernReturn = 1;
const KERN_PROTECTION_FAILURE: KernReturn = 2;
const KERN_NO_SPACE: KernReturn = 3;
const KERN_INVALID_ARGUMENT: KernReturn = 4;
const KERN_FAILURE: KernReturn = 5;

/// The exhaustive list of failure modes for the injection lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `task_for_pid` refused to hand out a task port for a live process.
    ///
    /// Requires root, SIP debugging disabled, or a `get-task-allow` target.
    #[error("task control denied for pid {0}: insufficient privilege")]
    PermissionDenied(i32),

    /// The pid does not resolve to a live process.
    #[error("no live process for pid {0}")]
    NoSuchProcess(i32),

    /// The symbolication backend could not be loaded or produced no usable handle.
    #[error("symbolication backend unavailable: {0}")]
    BackendUnavailable(&'static str),

    /// No loaded image in the target exports the requested symbol or name.
    #[error("symbol not found in target: {0}")]
    NotFound(String),

    /// The loader entry point could not be resolved in the target, so
    /// injection was abandoned before any memory write.
    #[error("loader entry point '{0}' not found in target")]
    EntryPointNotFound(String),

    /// The target task refused or could not satisfy a memory allocation.
    #[error("remote allocation of {size} bytes failed with kernel code {code}")]
    AllocationFailed { size: u64, code: KernReturn },

    /// The copy into the target failed after a successful allocation.
    ///
    /// The target may be left with an allocated-but-partially-written region;
    /// no rollback is attempted.
    #[error("remote write at {address:#x} failed with kernel code {code}")]
    WriteFailed { address: u64, code: KernReturn },

    /// The OS refused to create a thread in the target task.
    #[error("remote thread creation failed with kernel code {code}")]
    ThreadCreationFailed { code: KernReturn },

    /// The caller-supplied arguments are invalid (e.g., interior NUL in a
    /// string destined for the target).
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Collapses the error into the kernel-return-code convention.
    ///
    /// Variants that carry a raw kernel code pass it through; the rest map
    /// onto the closest canonical code. Never returns [`KERN_SUCCESS`].
    pub fn kern_return(&self) -> KernReturn {
        match self {
            Error::PermissionDenied(_) => KERN_PROTECTION_FAILURE,
            Error::NoSuchProcess(_) => KERN_INVALID_ARGUMENT,
            Error::BackendUnavailable(_) | Error::NotFound(_) | Error::EntryPointNotFound(_) => {
                KERN_INVALID_ADDRESS
            }
            Error::AllocationFailed { .. } => KERN_NO_SPACE,
            Error::WriteFailed { code, .. } | Error::ThreadCreationFailed { code } => {
                if *code == KERN_SUCCESS {
                    KERN_FAILURE
                } else {
                    *code
                }
            }
            Error::Validation(_) => KERN_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kern_return_maps_taxonomy_onto_canonical_codes() {
        assert_eq!(Error::PermissionDenied(1).kern_return(), 2);
        assert_eq!(Error::NoSuchProcess(1).kern_return(), 4);
        assert_eq!(Error::NotFound("dlopen".into()).kern_return(), 1);
        assert_eq!(Error::EntryPointNotFound("dlopen".into()).kern_return(), 1);
        assert_eq!(
            Error::AllocationFailed { size: 64, code: 3 }.kern_return(),
            3
        );
    }

    #[test]
    fn kern_return_passes_raw_codes_through() {
        let err = Error::WriteFailed {
            address: 0x1000,
            code: 2,
        };
        assert_eq!(err.kern_return(), 2);
        assert_eq!(Error::ThreadCreationFailed { code: 9 }.kern_return(), 9);
    }

    #[test]
    fn kern_return_never_reports_success() {
        // A raw code of 0 would masquerade as success; it must not leak through.
        assert_ne!(Error::ThreadCreationFailed { code: 0 }.kern_return(), 0);
        assert_ne!(Error::Validation("bad argument".into()).kern_return(), 0);
    }
}
