//! `select(2)` for readability, with portable timeout accounting.
//!
//! Linux rewrites the `timeval` passed to `select` with the time that was not slept, which lets a
//! caller loop around `select` with one overall deadline. Other systems leave it untouched, so on
//! those the elapsed wall-clock time is deducted by hand after every call.

use {
    crate::os::unix::unixprelude::*,
    libc::{fd_set, suseconds_t, time_t, timeval},
    std::{
        fmt::{self, Debug, Formatter},
        io,
        mem::zeroed,
        ptr,
        time::Duration,
    },
};
#[cfg(not(select_updates_timeout))]
use std::time::Instant;

const MICROS_PER_SEC: u128 = 1_000_000;

#[cold]
fn descriptor_out_of_range(fd: RawFd) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!(
            "descriptor {fd} cannot be stored in an fd_set (FD_SETSIZE is {})",
            libc::FD_SETSIZE
        ),
    )
}

/// Read interest set.
pub(crate) struct FdSet {
    set: fd_set,
    max: RawFd,
}
impl FdSet {
    pub fn new() -> Self {
        // SAFETY: fd_set is a plain bit array, FD_ZERO makes the zeroing official
        let mut set = unsafe { zeroed::<fd_set>() };
        unsafe { libc::FD_ZERO(&mut set) };
        Self { set, max: -1 }
    }
    #[inline]
    fn in_range(fd: RawFd) -> bool {
        usize::try_from(fd).map_or(false, |fd| fd < libc::FD_SETSIZE as usize)
    }

    pub fn insert(&mut self, fd: RawFd) -> io::Result<()> {
        if !Self::in_range(fd) {
            return Err(descriptor_out_of_range(fd));
        }
        // SAFETY: bounds checked above
        unsafe { libc::FD_SET(fd, &mut self.set) };
        self.max = self.max.max(fd);
        Ok(())
    }
    pub fn contains(&self, fd: RawFd) -> bool {
        // SAFETY: as above
        Self::in_range(fd) && unsafe { libc::FD_ISSET(fd, &self.set) }
    }
}
impl Debug for FdSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_set();
        for fd in 0..=self.max {
            if self.contains(fd) {
                list.entry(&fd);
            }
        }
        list.finish()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub(crate) fn timeval_from(d: Duration) -> timeval {
    timeval {
        tv_sec: time_t::try_from(d.as_secs()).unwrap_or(time_t::MAX),
        tv_usec: d.subsec_micros() as suseconds_t,
    }
}

/// Subtracts `elapsed` from `tv`, whole seconds first, then the remaining microseconds from the
/// microsecond field, which bottoms out at zero.
#[cfg_attr(select_updates_timeout, allow(dead_code))]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::arithmetic_side_effects
)]
pub(crate) fn deduct_elapsed(tv: &mut timeval, elapsed: Duration) {
    let mut us = elapsed.as_micros();
    let whole_secs = us / MICROS_PER_SEC;
    let available = tv.tv_sec.max(0) as u128;
    let taken = whole_secs.min(available);
    tv.tv_sec -= taken as time_t;
    us -= taken * MICROS_PER_SEC;

    let usec = tv.tv_usec.max(0) as u128;
    tv.tv_usec = if us >= usec { 0 } else { (usec - us) as suseconds_t };
}

/// Blocks until a descriptor in `set` is readable or the timeout runs out, leaving only the ready
/// descriptors in `set`. With a timeout, the remaining time is written back into it.
pub(crate) fn select_read(set: &mut FdSet, timeout: Option<&mut timeval>) -> io::Result<usize> {
    #[allow(clippy::arithmetic_side_effects)] // max is below FD_SETSIZE
    let nfds = set.max + 1;
    let ret = match timeout {
        None => unsafe {
            libc::select(nfds, &mut set.set, ptr::null_mut(), ptr::null_mut(), ptr::null_mut())
        },
        #[cfg(select_updates_timeout)]
        Some(tv) => unsafe {
            libc::select(nfds, &mut set.set, ptr::null_mut(), ptr::null_mut(), tv)
        },
        #[cfg(not(select_updates_timeout))]
        Some(tv) => {
            let mut scratch = *tv;
            let start = Instant::now();
            let ret = unsafe {
                libc::select(nfds, &mut set.set, ptr::null_mut(), ptr::null_mut(), &mut scratch)
            };
            deduct_elapsed(tv, start.elapsed());
            ret
        }
    };
    ok_or_errno!(ret >= 0 => ret.unsigned_abs() as usize)
}
