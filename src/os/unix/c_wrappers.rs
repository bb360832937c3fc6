use {
    super::{unixprelude::*, SockAddr},
    crate::BoolExt,
    std::{
        ffi::{CStr, CString},
        io,
        mem::size_of,
        net::{IpAddr, Shutdown},
        ptr,
    },
};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: c_int = 0;

pub(crate) fn create_socket(domain: c_int, ty: c_int) -> io::Result<OwnedFd> {
    #[allow(unused_mut, clippy::let_and_return)]
    let ty = {
        let mut ty = ty;
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            ty |= libc::SOCK_CLOEXEC;
        }
        ty
    };
    let (success, fd) = unsafe {
        let result = libc::socket(domain, ty, 0);
        (result != -1, result)
    };
    // SAFETY: we just created this descriptor
    let fd = ok_or_errno!(success => unsafe { OwnedFd::from_raw_fd(fd) })?;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        set_cloexec(fd.as_fd())?;
    }
    Ok(fd)
}

/// Creates a pipe with both ends nonblocking and close-on-exec, returning `(reader, writer)`.
pub(crate) fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [c_int; 2] = [-1; 2];
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let success =
        unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) == 0 };
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let success = unsafe { libc::pipe(fds.as_mut_ptr()) == 0 };
    ok_or_errno!(success => ())?;

    let [r, w] = fds;
    let (r, w) = unsafe {
        // SAFETY: we just created both of those file descriptors, which means that neither of
        // them can be in use elsewhere.
        (OwnedFd::from_raw_fd(r), OwnedFd::from_raw_fd(w))
    };
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    for fd in [r.as_fd(), w.as_fd()] {
        set_cloexec(fd)?;
        set_nonblocking(fd, true)?;
    }
    Ok((r, w))
}

pub(crate) fn read(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
    let (success, bytes_read) = unsafe {
        let size_or_err = libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len());
        (size_or_err >= 0, size_or_err.unsigned_abs())
    };
    ok_or_errno!(success => bytes_read)
}
pub(crate) fn write(fd: BorrowedFd<'_>, buf: &[u8]) -> io::Result<usize> {
    let (success, bytes_written) = unsafe {
        let size_or_err = libc::write(fd.as_raw_fd(), buf.as_ptr().cast(), buf.len());
        (size_or_err >= 0, size_or_err.unsigned_abs())
    };
    ok_or_errno!(success => bytes_written)
}

pub(crate) fn bind(fd: BorrowedFd<'_>, addr: &SockAddr) -> io::Result<()> {
    let success = unsafe { libc::bind(fd.as_raw_fd(), addr.as_ptr(), addr.len()) != -1 };
    ok_or_errno!(success => ())
}

pub(crate) fn listen(fd: BorrowedFd<'_>, backlog: c_int) -> io::Result<()> {
    let success = unsafe { libc::listen(fd.as_raw_fd(), backlog) != -1 };
    ok_or_errno!(success => ())
}

pub(crate) fn accept(fd: BorrowedFd<'_>) -> io::Result<OwnedFd> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let (success, new_fd) = unsafe {
        let result =
            libc::accept4(fd.as_raw_fd(), ptr::null_mut(), ptr::null_mut(), libc::SOCK_CLOEXEC);
        (result != -1, result)
    };
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let (success, new_fd) = unsafe {
        let result = libc::accept(fd.as_raw_fd(), ptr::null_mut(), ptr::null_mut());
        (result != -1, result)
    };
    // SAFETY: accept just handed us this descriptor
    let new_fd = ok_or_errno!(success => unsafe { OwnedFd::from_raw_fd(new_fd) })?;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        set_cloexec(new_fd.as_fd())?;
    }
    Ok(new_fd)
}

pub(crate) fn shutdown(fd: BorrowedFd<'_>, how: Shutdown) -> io::Result<()> {
    let how = match how {
        Shutdown::Read => libc::SHUT_RD,
        Shutdown::Write => libc::SHUT_WR,
        Shutdown::Both => libc::SHUT_RDWR,
    };
    let success = unsafe { libc::shutdown(fd.as_raw_fd(), how) != -1 };
    ok_or_errno!(success => ())
}

pub(crate) fn local_addr(fd: BorrowedFd<'_>) -> io::Result<SockAddr> {
    let mut addr = SockAddr::uninit();
    let success = unsafe {
        let ptr = addr.as_mut_ptr();
        libc::getsockname(fd.as_raw_fd(), ptr, addr.len_mut()) != -1
    };
    ok_or_errno!(success => addr)
}

pub(crate) fn send_to(fd: BorrowedFd<'_>, buf: &[u8], addr: &SockAddr) -> io::Result<usize> {
    let (success, bytes_sent) = unsafe {
        let size_or_err = libc::sendto(
            fd.as_raw_fd(),
            buf.as_ptr().cast(),
            buf.len(),
            SEND_FLAGS,
            addr.as_ptr(),
            addr.len(),
        );
        (size_or_err >= 0, size_or_err.unsigned_abs())
    };
    ok_or_errno!(success => bytes_sent)
}

pub(crate) fn setsockopt<T: Copy>(
    fd: BorrowedFd<'_>,
    level: c_int,
    name: c_int,
    value: T,
) -> io::Result<()> {
    #[allow(clippy::cast_possible_truncation)] // option values are a handful of bytes
    let len = size_of::<T>() as socklen_t;
    let success = unsafe {
        libc::setsockopt(fd.as_raw_fd(), level, name, ptr::addr_of!(value).cast(), len) != -1
    };
    ok_or_errno!(success => ())
}
#[inline]
pub(crate) fn setsockopt_bool(
    fd: BorrowedFd<'_>,
    level: c_int,
    name: c_int,
    value: bool,
) -> io::Result<()> {
    setsockopt::<c_int>(fd, level, name, value.to_i32())
}

pub(crate) fn set_linger(fd: BorrowedFd<'_>, seconds: Option<u16>) -> io::Result<()> {
    let linger = libc::linger {
        l_onoff: seconds.is_some().to_i32(),
        l_linger: seconds.map(c_int::from).unwrap_or(0),
    };
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_LINGER, linger)
}

pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>, nonblocking: bool) -> io::Result<()> {
    let (old_flags, success) = unsafe {
        let result = libc::fcntl(fd.as_raw_fd(), libc::F_GETFL, 0);
        (result, result != -1)
    };
    ok_or_errno!(success => ())?;
    let new_flags = if nonblocking {
        old_flags | libc::O_NONBLOCK
    } else {
        // Inverting the O_NONBLOCK value sets all the bits in the flag set to 1 except for the
        // nonblocking flag, which clears the flag when ANDed.
        old_flags & !libc::O_NONBLOCK
    };
    if new_flags == old_flags {
        return Ok(());
    }
    let success = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, new_flags) != -1 };
    ok_or_errno!(success => ())
}
#[cfg(test)]
pub(crate) fn get_nonblocking(fd: BorrowedFd<'_>) -> io::Result<bool> {
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL, 0) };
    ok_or_errno!(flags != -1 => flags & libc::O_NONBLOCK != 0)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_cloexec(fd: BorrowedFd<'_>) -> io::Result<()> {
    let (flags, success) = unsafe {
        let ret = libc::fcntl(fd.as_raw_fd(), libc::F_GETFD, 0);
        (ret, ret != -1)
    };
    ok_or_errno!(success => ())?;
    let success =
        unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, flags | libc::FD_CLOEXEC) != -1 };
    ok_or_errno!(success => ())
}

/// Returns the index of the named interface, or 0 if it does not exist.
pub(crate) fn if_nametoindex(name: &str) -> u32 {
    let Ok(name) = CString::new(name) else { return 0 };
    unsafe { libc::if_nametoindex(name.as_ptr()) }
}

/// One address entry of one interface as reported by `getifaddrs`.
#[derive(Copy, Clone, Debug)]
pub(crate) struct IfAddr {
    pub ip: IpAddr,
    pub scope_id: u32,
    pub broadcast: bool,
}

/// Lists the addresses configured on the named interface, including its IPv4 broadcast address if
/// it has one.
pub(crate) fn interface_addresses(name: &str) -> io::Result<Vec<IfAddr>> {
    let mut head: *mut libc::ifaddrs = ptr::null_mut();
    let success = unsafe { libc::getifaddrs(&mut head) } == 0;
    ok_or_errno!(success => ())?;

    let mut out = Vec::new();
    let mut cur = head;
    while !cur.is_null() {
        // SAFETY: getifaddrs hands out a well-formed linked list that lives until freeifaddrs
        let ifa = unsafe { &*cur };
        cur = ifa.ifa_next;
        if ifa.ifa_name.is_null() {
            continue;
        }
        // SAFETY: checked for null above, and getifaddrs nul-terminates interface names
        if unsafe { CStr::from_ptr(ifa.ifa_name) }.to_bytes() != name.as_bytes() {
            continue;
        }
        // SAFETY: ifa_addr is either null or valid for its family
        if let Some((ip, scope_id)) = unsafe { SockAddr::ip_from_raw(ifa.ifa_addr) } {
            out.push(IfAddr { ip, scope_id, broadcast: false });
        }
        if ifa.ifa_flags & (libc::IFF_BROADCAST as libc::c_uint) != 0 {
            // SAFETY: with IFF_BROADCAST set, this union member holds the broadcast address
            if let Some((ip, _)) = unsafe { SockAddr::ip_from_raw(broadcast_addr(ifa)) } {
                out.push(IfAddr { ip, scope_id: 0, broadcast: true });
            }
        }
    }
    unsafe { libc::freeifaddrs(head) };
    Ok(out)
}
#[cfg(any(target_os = "linux", target_os = "android"))]
#[inline(always)]
fn broadcast_addr(ifa: &libc::ifaddrs) -> *const sockaddr { ifa.ifa_ifu }
#[cfg(not(any(target_os = "linux", target_os = "android")))]
#[inline(always)]
fn broadcast_addr(ifa: &libc::ifaddrs) -> *const sockaddr { ifa.ifa_dstaddr }
