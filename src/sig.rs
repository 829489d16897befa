use std::error::Error;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::null_mut;

use libc::{c_int, c_void, sigaction, sigemptyset, sighandler_t, siginfo_t, SIG_DFL, SIG_ERR};

use crate::sys::{describe, errno};

#[derive(Debug, PartialEq)]
pub enum SigError {
    Syscall(c_int),
}

impl fmt::Display for SigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigError::Syscall(error_num) => write!(f, "{}", describe(*error_num)),
        }
    }
}

impl Error for SigError {}

/// Installed for `SIGINT`: the shell survives a terminal interrupt while the
/// foreground child, which gets the default disposition back on exec, dies.
pub(crate) extern "C" fn handler(_sig: c_int, _info: *mut siginfo_t, _gdata: *mut c_void) {}

pub(crate) fn install_sighandler(
    signum: c_int,
    handler: extern "C" fn(c_int, *mut siginfo_t, *mut c_void),
) -> Result<(), SigError> {
    let mut sa = unsafe { MaybeUninit::<sigaction>::zeroed().assume_init() };
    sa.sa_sigaction = handler as sighandler_t;
    sa.sa_flags = libc::SA_RESTART | libc::SA_SIGINFO;
    unsafe { sigemptyset(&mut sa.sa_mask as *mut _) };

    match unsafe { libc::sigaction(signum, &sa, null_mut()) } {
        -1 => Err(SigError::Syscall(errno())),
        _ => Ok(()),
    }
}

pub(crate) fn restore_default(signum: c_int) -> Result<(), SigError> {
    if unsafe { libc::signal(signum, SIG_DFL) } == SIG_ERR {
        Err(SigError::Syscall(errno()))
    } else {
        Ok(())
    }
}
