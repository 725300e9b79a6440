//! Task handle acquisition for target processes.
//!
//! A mach task port is the capability every other operation in this crate is
//! built on: it grants memory read/write and thread creation rights over the
//! target. [`TaskHandle`] owns the port and deallocates it on drop.

use mach2::kern_return::KERN_SUCCESS;
use mach2::mach_port::mach_port_deallocate;
use mach2::port::mach_port_t;
use mach2::traps::{mach_task_self, task_for_pid};

use crate::debug;
use crate::error::{Error, Result};

/// An exclusively-owned mach task port for a target process.
///
/// Acquired from a pid via [`TaskHandle::for_pid`]. The port is released
/// exactly once when the handle is dropped; all remote-memory and
/// remote-thread operations borrow the handle and require the target to
/// still be live.
pub struct TaskHandle {
    port: mach_port_t,
    pid: libc::pid_t,
}

impl TaskHandle {
    /// Acquires a task port for `pid` with rights sufficient to read/write
    /// memory and create threads in that process.
    ///
    /// # Errors
    /// Returns [`Error::PermissionDenied`] when the kernel refuses control
    /// over a live target, and [`Error::NoSuchProcess`] when the pid does
    /// not name a live process.
    pub fn for_pid(pid: libc::pid_t) -> Result<Self> {
        let mut port: mach_port_t = 0;
        let kr = unsafe { task_for_pid(mach_task_self(), pid, &mut port) };
        if kr != KERN_SUCCESS {
            // task_for_pid reports KERN_FAILURE for both dead targets and
            // privilege rejections; kill(pid, 0) disambiguates.
            return Err(if unsafe { libc::kill(pid, 0) } == 0 {
                Error::PermissionDenied(pid)
            } else {
                Error::NoSuchProcess(pid)
            });
        }

        debug!("acquired task port {} for pid {}", port, pid);
        Ok(Self { port, pid })
    }

    /// The raw task port, for use in mach calls against the target.
    pub fn port(&self) -> mach_port_t {
        self.port
    }

    /// The pid this handle was acquired for.
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        unsafe { mach_port_deallocate(mach_task_self(), self.port) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_pid_is_no_such_process() {
        // pid_max on macOS is 99998; this pid can never be live.
        let result = TaskHandle::for_pid(999_999);
        assert!(matches!(result, Err(Error::NoSuchProcess(999_999))));
    }

    #[test]
    fn own_task_is_acquirable_when_permitted() {
        // Denied under SIP without the debugger entitlement; only assert on
        // the classification, not on success.
        match TaskHandle::for_pid(unsafe { libc::getpid() }) {
            Ok(task) => {
                assert_ne!(task.port(), 0);
                assert_eq!(task.pid(), unsafe { libc::getpid() });
            }
            Err(err) => assert!(matches!(err, Error::PermissionDenied(_))),
        }
    }
}
