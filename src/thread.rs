//! Remote thread creation with architecture-specific initial state.
//!
//! Mirrors a same-process function call's argument passing, applied to a new
//! thread's machine state in another task: the instruction pointer lands on
//! the entry address and the ABI's first-argument register carries the
//! caller-chosen value. The launch is fire-and-forget: creation success says
//! nothing about whether the remote code runs to completion, returns, or
//! crashes, and there is no channel for a return value.

use mach2::kern_return::{kern_return_t, KERN_SUCCESS};
use mach2::mach_types::{task_t, thread_act_t};
use mach2::message::mach_msg_type_number_t;
use mach2::thread_status::{thread_state_flavor_t, thread_state_t};
use mach2::vm_types::mach_vm_size_t;

use crate::error::{Error, Result};
use crate::task::TaskHandle;
use crate::{debug, memory};

/// Stack handed to the remote thread so its prologue has room to run.
const REMOTE_STACK_SIZE: mach_vm_size_t = 512 * 1024;

// Not exposed by mach2; provided by libsystem_kernel.
extern "C" {
    fn thread_create_running(
        parent_task: task_t,
        flavor: thread_state_flavor_t,
        new_state: thread_state_t,
        new_state_count: mach_msg_type_number_t,
        child_act: *mut thread_act_t,
    ) -> kern_return_t;
}

#[cfg(target_arch = "aarch64")]
mod arch {
    use super::mach_msg_type_number_t;

    pub const ARM_THREAD_STATE64: super::thread_state_flavor_t = 6;
    // __DARWIN_ARM_THREAD_STATE64_FLAGS_NO_PTRAUTH: the state carries
    // unsigned pointers.
    pub const FLAGS_NO_PTRAUTH: u32 = 0x1;

    /// `arm_thread_state64_t`, absent from mach2.
    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct ArmThreadState64 {
        pub x: [u64; 29],
        pub fp: u64,
        pub lr: u64,
        pub sp: u64,
        pub pc: u64,
        pub cpsr: u32,
        pub flags: u32,
    }

    impl ArmThreadState64 {
        pub fn count() -> mach_msg_type_number_t {
            (std::mem::size_of::<Self>() / std::mem::size_of::<u32>()) as mach_msg_type_number_t
        }
    }
}

/// Creates a thread in the target task that begins executing at
/// `entry_address` with `first_argument` in the ABI's first-argument slot.
///
/// A fresh remote stack is allocated for the thread; like all staged memory,
/// it is never reclaimed. No return address is set up, so the called
/// function must not return (loader entry points block in `dlopen` long
/// enough for this contract, and a returning thread faults without touching
/// the rest of the target).
///
/// # Errors
/// [`Error::AllocationFailed`] when the stack cannot be allocated;
/// [`Error::ThreadCreationFailed`] when the kernel refuses the thread.
pub fn start_thread(task: &TaskHandle, entry_address: u64, first_argument: u64) -> Result<()> {
    let stack = memory::allocate(task, REMOTE_STACK_SIZE)?;
    // Stack grows down: start at the top, 16-byte aligned per both ABIs.
    let stack_top = (stack.address + REMOTE_STACK_SIZE) & !0xf;

    #[cfg(target_arch = "x86_64")]
    let (flavor, mut state, count) = {
        use mach2::structs::x86_thread_state64_t;
        use mach2::thread_status::x86_THREAD_STATE64;

        let state = x86_thread_state64_t {
            __rip: entry_address,
            // SysV entry contract: rsp % 16 == 8, as if a call just pushed
            // the (absent) return address.
            __rsp: stack_top - 8,
            __rbp: stack_top,
            __rdi: first_argument,
            ..Default::default()
        };
        (x86_THREAD_STATE64, state, x86_thread_state64_t::count())
    };

    #[cfg(target_arch = "aarch64")]
    let (flavor, mut state, count) = {
        let mut state = arch::ArmThreadState64 {
            pc: entry_address,
            sp: stack_top,
            flags: arch::FLAGS_NO_PTRAUTH,
            ..Default::default()
        };
        state.x[0] = first_argument;
        (arch::ARM_THREAD_STATE64, state, arch::ArmThreadState64::count())
    };

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    compile_error!("no remote thread state defined for this architecture");

    let mut thread: thread_act_t = 0;
    let kr = unsafe {
        thread_create_running(
            task.port(),
            flavor,
            &mut state as *mut _ as thread_state_t,
            count,
            &mut thread,
        )
    };
    if kr != KERN_SUCCESS {
        return Err(Error::ThreadCreationFailed { code: kr });
    }

    debug!(
        "remote thread {} running at {:#x} in pid {} (arg {:#x})",
        thread,
        entry_address,
        task.pid(),
        first_argument
    );
    Ok(())
}
