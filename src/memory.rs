//! Remote memory transport into a target task.
//!
//! Allocates writable regions in the target's address space and copies
//! caller-supplied buffers into them. Staged regions are never reclaimed:
//! once written they belong to the target, and freeing them here could race
//! remote code still reading them.

use std::ffi::CString;

use mach2::kern_return::KERN_SUCCESS;
use mach2::message::mach_msg_type_number_t;
use mach2::vm::{mach_vm_allocate, mach_vm_write};
use mach2::vm_statistics::VM_FLAGS_ANYWHERE;
use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t, vm_offset_t};

use crate::debug;
use crate::error::{Error, Result};
use crate::task::TaskHandle;

/// An `{address, size}` region allocated inside a target task.
///
/// Ownership rests with the target's memory manager; this crate performs no
/// corresponding deallocation.
#[derive(Debug, Clone, Copy)]
pub struct RemoteAllocation {
    /// Base address of the region, in the target's address space.
    pub address: mach_vm_address_t,
    /// Size of the region in bytes.
    pub size: mach_vm_size_t,
}

/// Allocates `size` bytes of writable memory anywhere in the target task.
pub fn allocate(task: &TaskHandle, size: mach_vm_size_t) -> Result<RemoteAllocation> {
    let mut address: mach_vm_address_t = 0;
    let kr = unsafe { mach_vm_allocate(task.port(), &mut address, size, VM_FLAGS_ANYWHERE) };
    if kr != KERN_SUCCESS {
        return Err(Error::AllocationFailed { size, code: kr });
    }
    debug!("allocated {} bytes at {:#x} in pid {}", size, address, task.pid());
    Ok(RemoteAllocation { address, size })
}

// mach_vm_write takes a 32-bit byte count; a plain `as` cast would silently
// truncate oversized buffers into a short write.
fn checked_len(len: usize) -> Result<mach_msg_type_number_t> {
    mach_msg_type_number_t::try_from(len)
        .map_err(|_| Error::Validation(format!("buffer of {len} bytes exceeds the mach message size limit")))
}

/// Allocates a region in the target sized to `bytes` and copies the buffer
/// into it. Returns the staged region.
///
/// # Errors
/// [`Error::Validation`] when `bytes` exceeds the 32-bit length
/// `mach_vm_write` accepts; [`Error::AllocationFailed`] when the target
/// cannot satisfy the allocation; [`Error::WriteFailed`] when the copy fails
/// afterwards, in which case the allocated region is left as-is (not rolled
/// back).
pub fn write_bytes(task: &TaskHandle, bytes: &[u8]) -> Result<RemoteAllocation> {
    let len = checked_len(bytes.len())?;
    let staged = allocate(task, bytes.len() as mach_vm_size_t)?;
    let kr = unsafe {
        mach_vm_write(
            task.port(),
            staged.address,
            bytes.as_ptr() as vm_offset_t,
            len,
        )
    };
    if kr != KERN_SUCCESS {
        return Err(Error::WriteFailed {
            address: staged.address,
            code: kr,
        });
    }
    debug!(
        "wrote {} bytes into pid {} at {:#x}",
        bytes.len(),
        task.pid(),
        staged.address
    );
    Ok(staged)
}

/// Stages `string` into the target including its terminating NUL, so the
/// staged address can be passed where the target expects a C string.
///
/// # Errors
/// [`Error::Validation`] when `string` contains an interior NUL byte.
pub fn write_string(task: &TaskHandle, string: &str) -> Result<RemoteAllocation> {
    let c_string = CString::new(string)
        .map_err(|_| Error::Validation("string argument contains an interior NUL byte".into()))?;
    write_bytes(task, c_string.as_bytes_with_nul())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Staging into our own task keeps the write observable: the "remote"
    // address is readable directly. Bails when the task port is denied.
    #[test]
    fn staged_string_is_nul_terminated_in_target() {
        let Ok(task) = TaskHandle::for_pid(unsafe { libc::getpid() }) else {
            return;
        };

        let staged = write_string(&task, "/tmp/payload.dylib").unwrap();
        assert_ne!(staged.address, 0);
        assert_eq!(staged.size, "/tmp/payload.dylib".len() as u64 + 1);

        let read_back = unsafe { std::ffi::CStr::from_ptr(staged.address as *const _) };
        assert_eq!(read_back.to_str().unwrap(), "/tmp/payload.dylib");
    }

    #[test]
    fn interior_nul_is_rejected_before_any_allocation() {
        let Ok(task) = TaskHandle::for_pid(unsafe { libc::getpid() }) else {
            return;
        };
        let result = write_string(&task, "bad\0path");
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn oversized_buffer_length_is_rejected_not_truncated() {
        assert_eq!(checked_len(0).unwrap(), 0);
        assert_eq!(checked_len(4096).unwrap(), 4096);
        assert_eq!(
            checked_len(mach_msg_type_number_t::MAX as usize).unwrap(),
            mach_msg_type_number_t::MAX
        );
        let result = checked_len(mach_msg_type_number_t::MAX as usize + 1);
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
