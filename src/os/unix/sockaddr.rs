use {
    super::unixprelude::*,
    libc::{in6_addr, in_addr, sockaddr_in, sockaddr_in6, sockaddr_un},
    std::{
        io,
        mem::{size_of, zeroed},
        net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
        os::unix::ffi::OsStrExt,
        path::Path,
        ptr::{addr_of, addr_of_mut},
    },
};

#[cold]
#[inline(never)]
fn path_unrepresentable(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

/// Owned socket address large enough for every family this crate binds: IPv4, IPv6 and
/// filesystem Unix-domain paths.
#[derive(Copy, Clone)]
pub(crate) struct SockAddr {
    storage: sockaddr_storage,
    len: socklen_t,
}
impl SockAddr {
    /// An all-zero address with the full storage length, ready to be filled in by `getsockname`
    /// and friends.
    pub fn uninit() -> Self {
        Self {
            // SAFETY: sockaddr_storage is plain old data
            storage: unsafe { zeroed() },
            len: socklen_of::<sockaddr_storage>(),
        }
    }

    pub fn from_ip(addr: &SocketAddr) -> Self {
        let mut slf = Self::uninit();
        match addr {
            SocketAddr::V4(v4) => {
                // SAFETY: sockaddr_storage is sized and aligned for every sockaddr type
                let sin = unsafe { &mut *addr_of_mut!(slf.storage).cast::<sockaddr_in>() };
                sin.sin_family = libc::AF_INET as sa_family_t;
                sin.sin_port = v4.port().to_be();
                sin.sin_addr = in_addr { s_addr: u32::from_ne_bytes(v4.ip().octets()) };
                slf.len = socklen_of::<sockaddr_in>();
            }
            SocketAddr::V6(v6) => {
                // SAFETY: as above
                let sin6 = unsafe { &mut *addr_of_mut!(slf.storage).cast::<sockaddr_in6>() };
                sin6.sin6_family = libc::AF_INET6 as sa_family_t;
                sin6.sin6_port = v6.port().to_be();
                sin6.sin6_flowinfo = v6.flowinfo();
                sin6.sin6_addr = in6_addr { s6_addr: v6.ip().octets() };
                sin6.sin6_scope_id = v6.scope_id();
                slf.len = socklen_of::<sockaddr_in6>();
            }
        }
        slf
    }

    /// Builds a `sockaddr_un` for a filesystem path. Fails with `InvalidInput` if the path has an
    /// interior nul or does not fit into `sun_path` together with its terminator.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let bytes = path.as_os_str().as_bytes();
        if bytes.is_empty() {
            return Err(path_unrepresentable("Unix-domain socket path is empty"));
        }
        if bytes.contains(&0) {
            return Err(path_unrepresentable("Unix-domain socket path contains a nul byte"));
        }

        let mut slf = Self::uninit();
        // SAFETY: sockaddr_un fits into sockaddr_storage
        let sun = unsafe { &mut *addr_of_mut!(slf.storage).cast::<sockaddr_un>() };
        if bytes.len() >= sun.sun_path.len() {
            return Err(path_unrepresentable(
                "Unix-domain socket path exceeds the capacity of sun_path",
            ));
        }
        sun.sun_family = libc::AF_UNIX as sa_family_t;
        for (dst, src) in sun.sun_path.iter_mut().zip(bytes) {
            *dst = *src as libc::c_char;
        }
        // The terminator is already there thanks to zeroing.
        let path_offset = {
            let base = addr_of!(*sun).cast::<u8>();
            let path = addr_of!(sun.sun_path).cast::<u8>();
            // SAFETY: both pointers are derived from the same object
            unsafe { path.offset_from(base) }.unsigned_abs()
        };
        #[cfg(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "openbsd",
            target_os = "netbsd",
        ))]
        {
            sun.sun_len = u8::try_from(path_offset + bytes.len() + 1).unwrap_or(u8::MAX);
        }
        #[allow(clippy::arithmetic_side_effects)] // bounded by sun_path length above
        let len = path_offset + bytes.len() + 1;
        slf.len = len as socklen_t;
        Ok(slf)
    }

    #[inline]
    pub fn as_ptr(&self) -> *const sockaddr { addr_of!(self.storage).cast() }
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut sockaddr { addr_of_mut!(self.storage).cast() }
    #[inline]
    pub fn len(&self) -> socklen_t { self.len }
    #[inline]
    pub fn len_mut(&mut self) -> &mut socklen_t { &mut self.len }
    #[inline]
    pub fn family(&self) -> c_int { self.storage.ss_family as c_int }

    /// Interprets the address as an IP socket address, if it is one.
    pub fn to_ip(&self) -> Option<SocketAddr> {
        match self.family() {
            libc::AF_INET => {
                // SAFETY: family says this is a sockaddr_in
                let sin = unsafe { &*addr_of!(self.storage).cast::<sockaddr_in>() };
                let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
                Some(SocketAddrV4::new(ip, u16::from_be(sin.sin_port)).into())
            }
            libc::AF_INET6 => {
                // SAFETY: family says this is a sockaddr_in6
                let sin6 = unsafe { &*addr_of!(self.storage).cast::<sockaddr_in6>() };
                let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
                Some(
                    SocketAddrV6::new(
                        ip,
                        u16::from_be(sin6.sin6_port),
                        sin6.sin6_flowinfo,
                        sin6.sin6_scope_id,
                    )
                    .into(),
                )
            }
            _ => None,
        }
    }

    /// Reads an IP address out of a raw `sockaddr` pointer as handed out by `getifaddrs`.
    ///
    /// # Safety
    /// `sa` must be null or point to a valid socket address of the family it claims.
    pub unsafe fn ip_from_raw(sa: *const sockaddr) -> Option<(IpAddr, u32)> {
        if sa.is_null() {
            return None;
        }
        match unsafe { (*sa).sa_family } as c_int {
            libc::AF_INET => {
                let sin = unsafe { &*sa.cast::<sockaddr_in>() };
                Some((Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes()).into(), 0))
            }
            libc::AF_INET6 => {
                let sin6 = unsafe { &*sa.cast::<sockaddr_in6>() };
                Some((Ipv6Addr::from(sin6.sin6_addr.s6_addr).into(), sin6.sin6_scope_id))
            }
            _ => None,
        }
    }
}

#[inline(always)]
#[allow(clippy::cast_possible_truncation)] // sockaddr types are tiny
fn socklen_of<T>() -> socklen_t { size_of::<T>() as socklen_t }
