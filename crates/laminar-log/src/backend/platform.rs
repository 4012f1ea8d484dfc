//! # Platform Adapter
//!
//! OS-specific thread setup applied once when the backend thread boots:
//! pinning it to a CPU and giving it an OS-visible name.
//!
//! | OS | CPU affinity | Thread name |
//! |----|--------------|-------------|
//! | Linux | `sched_setaffinity` | `prctl(PR_SET_NAME)`, 15 bytes |
//! | macOS | unsupported | `pthread_setname_np`, 63 bytes |
//! | Windows | `SetThreadAffinityMask` | unsupported |
//! | other | unsupported | unsupported |
//!
//! Unsupported operations return [`PlatformError::Unsupported`] instead of
//! silently doing nothing; the caller decides whether that is fatal.

/// Errors from OS thread configuration.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The operation has no implementation on this platform
    #[error("{operation} is not supported on this platform")]
    Unsupported {
        /// The operation that was requested
        operation: &'static str,
    },

    /// The CPU index cannot be represented in the OS affinity mask
    #[error("CPU index {cpu} is out of range (max {max})")]
    InvalidCpu {
        /// Requested CPU index
        cpu: usize,
        /// Largest index the platform accepts
        max: usize,
    },

    /// The thread name cannot be passed to the OS
    #[error("invalid thread name {name:?}: {reason}")]
    InvalidThreadName {
        /// The rejected name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// The OS call failed
    #[error("{operation} failed: {source}")]
    Os {
        /// The OS call that failed
        operation: &'static str,
        /// The OS error
        #[source]
        source: std::io::Error,
    },
}

/// Thread configuration capability used by the backend bootstrap.
pub trait PlatformAdapter: Send + Sync {
    /// Pins the calling thread to `cpu`.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot pin threads or the OS rejects
    /// the request.
    fn set_cpu_affinity(&self, cpu: usize) -> Result<(), PlatformError>;

    /// Sets the OS-visible name of the calling thread.
    ///
    /// Names longer than the platform limit are truncated.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no naming facility, the name
    /// contains a NUL byte, or the OS rejects the request.
    fn set_thread_name(&self, name: &str) -> Result<(), PlatformError>;
}

/// The adapter for the platform this crate was built for.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePlatform;

impl PlatformAdapter for NativePlatform {
    fn set_cpu_affinity(&self, cpu: usize) -> Result<(), PlatformError> {
        set_cpu_affinity(cpu)
    }

    fn set_thread_name(&self, name: &str) -> Result<(), PlatformError> {
        set_thread_name(name)
    }
}

/// Longest thread name the OS keeps, in bytes, if it has a naming facility.
pub const MAX_THREAD_NAME_LEN: Option<usize> = if cfg!(target_os = "linux") {
    Some(15)
} else if cfg!(target_os = "macos") {
    Some(63)
} else {
    None
};

/// Truncates `name` to at most `max` bytes on a char boundary.
#[cfg_attr(not(any(target_os = "linux", target_os = "macos")), allow(dead_code))]
fn truncate_name(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn to_c_name(name: &str, max: usize) -> Result<std::ffi::CString, PlatformError> {
    std::ffi::CString::new(truncate_name(name, max)).map_err(|_| {
        PlatformError::InvalidThreadName {
            name: name.to_string(),
            reason: "contains a NUL byte",
        }
    })
}

/// Pins the calling thread to `cpu`.
///
/// # Errors
///
/// See [`PlatformAdapter::set_cpu_affinity`].
pub fn set_cpu_affinity(cpu: usize) -> Result<(), PlatformError> {
    #[cfg(target_os = "linux")]
    {
        use libc::{cpu_set_t, sched_setaffinity, CPU_SET, CPU_SETSIZE, CPU_ZERO};
        use std::mem;

        #[allow(clippy::cast_sign_loss)]
        let max = CPU_SETSIZE as usize;
        if cpu >= max {
            return Err(PlatformError::InvalidCpu { cpu, max: max - 1 });
        }

        // SAFETY: cpu_set_t is plain data and fully initialized by CPU_ZERO.
        // `cpu` was checked against CPU_SETSIZE. Pid 0 means the calling thread.
        #[allow(unsafe_code)]
        unsafe {
            let mut set: cpu_set_t = mem::zeroed();
            CPU_ZERO(&mut set);
            CPU_SET(cpu, &mut set);

            if sched_setaffinity(0, mem::size_of::<cpu_set_t>(), &raw const set) != 0 {
                return Err(PlatformError::Os {
                    operation: "sched_setaffinity",
                    source: std::io::Error::last_os_error(),
                });
            }
        }
        Ok(())
    }

    #[cfg(target_os = "windows")]
    {
        use winapi::shared::basetsd::DWORD_PTR;
        use winapi::um::processthreadsapi::GetCurrentThread;
        use winapi::um::winbase::SetThreadAffinityMask;

        let max = usize::BITS as usize;
        if cpu >= max {
            return Err(PlatformError::InvalidCpu { cpu, max: max - 1 });
        }

        // SAFETY: GetCurrentThread returns a pseudo-handle that needs no
        // closing, and the mask has exactly one in-range bit set.
        #[allow(unsafe_code)]
        unsafe {
            let mask: DWORD_PTR = 1 << cpu;
            if SetThreadAffinityMask(GetCurrentThread(), mask) == 0 {
                return Err(PlatformError::Os {
                    operation: "SetThreadAffinityMask",
                    source: std::io::Error::last_os_error(),
                });
            }
        }
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        let _ = cpu;
        Err(PlatformError::Unsupported {
            operation: "CPU affinity",
        })
    }
}

/// Sets the OS-visible name of the calling thread.
///
/// # Errors
///
/// See [`PlatformAdapter::set_thread_name`].
pub fn set_thread_name(name: &str) -> Result<(), PlatformError> {
    #[cfg(target_os = "linux")]
    {
        let c_name = to_c_name(name, 15)?;

        // SAFETY: PR_SET_NAME reads a NUL-terminated string of at most 16
        // bytes; `c_name` is NUL-terminated and at most 15 bytes long.
        #[allow(unsafe_code)]
        let rc = unsafe {
            libc::prctl(
                libc::PR_SET_NAME,
                c_name.as_ptr(),
                0 as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
            )
        };
        if rc != 0 {
            return Err(PlatformError::Os {
                operation: "prctl(PR_SET_NAME)",
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    #[cfg(target_os = "macos")]
    {
        let c_name = to_c_name(name, 63)?;

        // SAFETY: `c_name` is a valid NUL-terminated string within the
        // 64-byte limit; macOS only names the calling thread.
        #[allow(unsafe_code)]
        let rc = unsafe { libc::pthread_setname_np(c_name.as_ptr()) };
        if rc != 0 {
            return Err(PlatformError::Os {
                operation: "pthread_setname_np",
                source: std::io::Error::from_raw_os_error(rc),
            });
        }
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = name;
        Err(PlatformError::Unsupported {
            operation: "thread naming",
        })
    }
}
