use std::ffi::CStr;
use std::io;
use std::mem::MaybeUninit;

use libc::{c_int, fstat, isatty, strerror};

pub(crate) fn errno() -> c_int {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

pub(crate) fn describe(error_num: c_int) -> String {
    unsafe { CStr::from_ptr(strerror(error_num)) }
        .to_string_lossy()
        .into_owned()
}

pub(crate) fn is_terminal(fd: c_int) -> bool {
    unsafe { isatty(fd) == 1 }
}

/// Device and inode of whatever an open descriptor currently points at.
///
/// Two snapshots of the same descriptor compare equal as long as nobody
/// re-pointed it with `dup2` in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StreamIdentity {
    dev: u64,
    ino: u64,
}

impl StreamIdentity {
    pub(crate) fn of(fd: c_int) -> Option<StreamIdentity> {
        let mut stat = MaybeUninit::<libc::stat>::uninit();
        match unsafe { fstat(fd, stat.as_mut_ptr()) } {
            -1 => None,
            _ => {
                let stat = unsafe { stat.assume_init() };
                Some(StreamIdentity {
                    dev: stat.st_dev as u64,
                    ino: stat.st_ino as u64,
                })
            }
        }
    }
}

/// Identity of standard input and standard output, in that order.
pub(crate) fn standard_streams() -> (Option<StreamIdentity>, Option<StreamIdentity>) {
    (
        StreamIdentity::of(libc::STDIN_FILENO),
        StreamIdentity::of(libc::STDOUT_FILENO),
    )
}
