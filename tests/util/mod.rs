//! Test utilities: error reporting, a watchdog, socket path generation and an interface monitor
//! double.
#![allow(dead_code, unused_macros)]

#[macro_use]
mod eyre;
#[macro_use]
mod namegen;
mod monitor;
mod xorshift;

#[allow(unused_imports)]
pub use {eyre::*, monitor::*, namegen::*, xorshift::*};

use {
    crate::os::unix::{c_wrappers, unixprelude::*},
    color_eyre::eyre::{bail, WrapErr},
    std::{
        io,
        mem::size_of,
        net::SocketAddr,
        sync::mpsc::{self, RecvTimeoutError},
        thread,
        time::Duration,
    },
};

/// Time after which a test is considered hung.
const WATCHDOG: Duration = Duration::from_secs(20);

/// Runs `f` on its own thread, failing the test if it does not finish in time.
pub fn test_wrapper(f: impl (FnOnce() -> TestResult) + Send + 'static) -> TestResult {
    eyre::install();
    let (tx, rx) = mpsc::channel();
    let handle = thread::Builder::new()
        .name("test body".to_owned())
        .spawn(move || {
            let _ = tx.send(f());
        })
        .context("failed to spawn test thread")?;
    match rx.recv_timeout(WATCHDOG) {
        Ok(result) => {
            let _ = handle.join();
            result
        }
        Err(RecvTimeoutError::Timeout) => bail!("test did not finish within {WATCHDOG:?}"),
        Err(RecvTimeoutError::Disconnected) => match handle.join() {
            Err(panic) => std::panic::resume_unwind(panic),
            Ok(()) => bail!("test thread exited without a result"),
        },
    }
}

/// Borrows a descriptor owned by a multiplexer for the duration of a test assertion.
pub fn borrow(fd: RawFd) -> BorrowedFd<'static> { unsafe { BorrowedFd::borrow_raw(fd) } }

/// Reads an integer socket option.
pub fn sockopt_int(fd: RawFd, level: c_int, name: c_int) -> io::Result<c_int> {
    let mut val: c_int = 0;
    let mut len = size_of::<c_int>() as libc::socklen_t;
    let ret =
        unsafe { libc::getsockopt(fd, level, name, (&mut val as *mut c_int).cast(), &mut len) };
    if ret == 0 {
        Ok(val)
    } else {
        Err(io::Error::last_os_error())
    }
}

pub fn is_nonblocking(fd: RawFd) -> io::Result<bool> { c_wrappers::get_nonblocking(borrow(fd)) }

/// The IP address a descriptor is bound to.
pub fn bound_addr(fd: RawFd) -> TestResult<SocketAddr> {
    let addr = c_wrappers::local_addr(borrow(fd)).context("getsockname failed")?;
    addr.to_ip().ok_or_else(|| color_eyre::eyre::eyre!("descriptor {fd} is not an IP socket"))
}
