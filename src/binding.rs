//! A single OS socket owned by a multiplexer.
//!
//! A [`SocketBinding`] is created from a [`BindSpec`], which names the socket type and what to bind
//! to. Construction opens the socket; [`bind`](SocketBinding::bind) performs the OS bind call that
//! matches the [`BindingKind`]. Bindings compare equal by their logical identity (kind, address,
//! port, path), never by descriptor, which is how removal requests are matched against the live
//! set.

use {
    crate::{
        error::{Error, Result},
        iface::InterfaceName,
        options::SocketOptions,
        os::unix::{c_wrappers, unixprelude::*, SockAddr},
        RawOsErrorExt,
    },
    std::{
        fmt::{self, Debug, Formatter},
        fs, io,
        net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, SocketAddrV6},
        path::{Path, PathBuf},
    },
};

/// Socket type of a binding.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum SocketType {
    /// `SOCK_STREAM`: connection-oriented, can listen and accept.
    #[default]
    Stream,
    /// `SOCK_DGRAM`: connectionless datagrams.
    Datagram,
}
impl SocketType {
    #[inline]
    pub(crate) fn raw(self) -> c_int {
        match self {
            Self::Stream => libc::SOCK_STREAM,
            Self::Datagram => libc::SOCK_DGRAM,
        }
    }
}

/// Address family filter for handle queries.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// Matches every binding.
    #[default]
    Unspecified,
    /// IPv4 bindings.
    Ipv4,
    /// IPv6 bindings.
    Ipv6,
    /// Unix-domain bindings.
    Unix,
}
impl AddressFamily {
    /// The family of an IP address.
    #[inline]
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(..) => Self::Ipv4,
            IpAddr::V6(..) => Self::Ipv6,
        }
    }
    #[inline]
    pub(crate) fn matches(self, other: Self) -> bool {
        self == Self::Unspecified || self == other
    }
}

/// What a binding is bound to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// A descriptor supplied by the caller. It is never bound by the multiplexer.
    CustomHandle,
    /// An IP address with no port, so the OS picks an ephemeral one.
    AddressOnly,
    /// An IP address and port.
    AddressPort,
    /// A filesystem Unix-domain socket path.
    FilesystemPath,
}

/// Target of a bind request.
#[derive(Debug)]
pub enum BindTarget {
    /// Adopt an already open socket descriptor.
    Handle(OwnedFd),
    /// Bind to an address with an OS-assigned port.
    Address(IpAddr),
    /// Bind to an address and port.
    AddressPort(SocketAddr),
    /// Bind to a filesystem path, replacing any stale socket file at it.
    Path(PathBuf),
}

/// Everything needed to create a [`SocketBinding`].
#[derive(Debug)]
pub struct BindSpec {
    pub(crate) target: BindTarget,
    pub(crate) socket_type: SocketType,
    pub(crate) interface: Option<InterfaceName>,
}
impl BindSpec {
    /// Bind request for an arbitrary target.
    #[inline]
    pub fn new(target: BindTarget, socket_type: SocketType) -> Self {
        Self { target, socket_type, interface: None }
    }
    /// Adopts an existing descriptor.
    #[inline]
    pub fn handle(fd: OwnedFd) -> Self { Self::new(BindTarget::Handle(fd), SocketType::Stream) }
    /// Binds `ip:port`. A port of 0 requests an ephemeral port and yields an
    /// [`AddressOnly`](BindingKind::AddressOnly) binding.
    pub fn address(ip: IpAddr, port: u16, socket_type: SocketType) -> Self {
        let target = match port {
            0 => BindTarget::Address(ip),
            _ => BindTarget::AddressPort(SocketAddr::new(ip, port)),
        };
        Self::new(target, socket_type)
    }
    /// Binds the IPv4 wildcard address at `port`.
    #[inline]
    pub fn port(port: u16, socket_type: SocketType) -> Self {
        Self::address(Ipv4Addr::UNSPECIFIED.into(), port, socket_type)
    }
    /// Binds a Unix-domain socket at `path`.
    #[inline]
    pub fn path(path: impl Into<PathBuf>, socket_type: SocketType) -> Self {
        Self::new(BindTarget::Path(path.into()), socket_type)
    }
    /// Records the interface the address belongs to.
    #[must_use]
    #[inline]
    pub fn on_interface(mut self, interface: InterfaceName) -> Self {
        self.interface = Some(interface);
        self
    }
}

/// The part of a binding that identifies it, independent of its descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct BindingIdentity {
    pub kind: BindingKind,
    pub address: Option<IpAddr>,
    pub port: u16,
    pub path: Option<PathBuf>,
}
impl BindingIdentity {
    pub fn address(ip: IpAddr, port: u16) -> Self {
        Self {
            kind: if port == 0 { BindingKind::AddressOnly } else { BindingKind::AddressPort },
            address: Some(ip),
            port,
            path: None,
        }
    }
    pub fn path(path: PathBuf) -> Self {
        Self { kind: BindingKind::FilesystemPath, address: None, port: 0, path: Some(path) }
    }
}

/// One socket, exclusively owning its descriptor.
pub struct SocketBinding {
    fd: Option<OwnedFd>,
    identity: BindingIdentity,
    scope_id: u32,
    socket_type: SocketType,
    interface: Option<InterfaceName>,
}
impl SocketBinding {
    /// Opens the socket described by `spec`, or adopts the descriptor it carries.
    ///
    /// Fails with [`Error::Resource`] if the OS refuses to create the socket. Nothing is leaked on
    /// failure: a descriptor that was created is closed before the error is returned.
    pub fn new(spec: BindSpec) -> Result<Self> {
        let BindSpec { target, socket_type, interface } = spec;
        let (fd, identity, scope_id) = match target {
            BindTarget::Handle(fd) => {
                let identity = BindingIdentity {
                    kind: BindingKind::CustomHandle,
                    address: None,
                    port: 0,
                    path: None,
                };
                (fd, identity, 0)
            }
            BindTarget::Address(ip) => {
                let fd = Self::open_ip(&ip, socket_type)?;
                (fd, BindingIdentity::address(ip, 0), 0)
            }
            BindTarget::AddressPort(sa) => {
                let fd = Self::open_ip(&sa.ip(), socket_type)?;
                let scope_id = match sa {
                    SocketAddr::V6(v6) => v6.scope_id(),
                    SocketAddr::V4(..) => 0,
                };
                (fd, BindingIdentity::address(sa.ip(), sa.port()), scope_id)
            }
            BindTarget::Path(path) => {
                let fd = c_wrappers::create_socket(libc::AF_UNIX, socket_type.raw())
                    .map_err(Error::resource)?;
                (fd, BindingIdentity::path(path), 0)
            }
        };
        Ok(Self { fd: Some(fd), identity, scope_id, socket_type, interface })
    }
    fn open_ip(ip: &IpAddr, socket_type: SocketType) -> Result<OwnedFd> {
        let domain = match ip {
            IpAddr::V4(..) => libc::AF_INET,
            IpAddr::V6(..) => libc::AF_INET6,
        };
        let fd = c_wrappers::create_socket(domain, socket_type.raw()).map_err(Error::resource)?;
        if domain == libc::AF_INET6 {
            // Lets an IPv4 and an IPv6 binding share a port. If this fails, fd is dropped (and
            // thereby closed) on the way out.
            c_wrappers::setsockopt_bool(fd.as_fd(), libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, true)
                .map_err(Error::resource)?;
        }
        Ok(fd)
    }

    /// Performs the OS bind call appropriate for the binding's kind.
    ///
    /// Custom handles are left alone. Filesystem paths have any stale entry unlinked first.
    pub fn bind(&self) -> Result<()> {
        let fd = self.borrow_fd().map_err(Error::bind)?;
        let addr = match self.identity.kind {
            BindingKind::CustomHandle => return Ok(()),
            BindingKind::AddressOnly | BindingKind::AddressPort => {
                let Some(ip) = self.identity.address else { return Ok(()) };
                SockAddr::from_ip(&self.socket_addr(ip))
            }
            BindingKind::FilesystemPath => {
                let Some(path) = self.identity.path.as_deref() else { return Ok(()) };
                let addr = SockAddr::from_path(path).map_err(Error::bind)?;
                remove_stale_path(path);
                addr
            }
        };
        c_wrappers::bind(fd, &addr).map_err(Error::bind)
    }
    fn socket_addr(&self, ip: IpAddr) -> SocketAddr {
        match ip {
            IpAddr::V4(v4) => SocketAddr::new(v4.into(), self.identity.port),
            IpAddr::V6(v6) => SocketAddrV6::new(v6, self.identity.port, 0, self.scope_id).into(),
        }
    }

    /// Puts the socket into listening mode.
    pub fn listen(&self, backlog: c_int) -> Result<()> {
        self.borrow_fd().and_then(|fd| c_wrappers::listen(fd, backlog)).map_err(Error::Listen)
    }

    /// Applies every option in `options`, in application order.
    pub fn set(&self, options: SocketOptions) -> Result<()> {
        options.in_application_order().try_for_each(|o| self.toggle(o, true))
    }
    /// Clears every option in `options`.
    pub fn unset(&self, options: SocketOptions) -> Result<()> {
        options.in_application_order().try_for_each(|o| self.toggle(o, false))
    }

    fn toggle(&self, option: SocketOptions, on: bool) -> Result<()> {
        let fd = self.borrow_fd().map_err(|e| Error::option(option, e))?;
        let result = match option {
            SocketOptions::REUSE_ADDRESS => {
                c_wrappers::setsockopt_bool(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, on)
            }
            SocketOptions::BROADCAST => {
                c_wrappers::setsockopt_bool(fd, libc::SOL_SOCKET, libc::SO_BROADCAST, on)
            }
            SocketOptions::MULTICAST => self.multicast_v4(fd, on),
            SocketOptions::MULTICAST_V6 => self.multicast_v6(fd, on),
            SocketOptions::LINGER => c_wrappers::set_linger(
                fd,
                on.then_some(SocketOptions::LINGER_SECONDS),
            ),
            SocketOptions::NO_DELAY => {
                c_wrappers::setsockopt_bool(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, on)
            }
            SocketOptions::NON_BLOCKING => c_wrappers::set_nonblocking(fd, on),
            _ => Ok(()),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if is_unsupported(&e) => {
                tracing::trace!(?option, on, error = %e, "socket option not applicable, ignored");
                Ok(())
            }
            Err(e) => Err(Error::option(option, e)),
        }
    }

    #[cfg(multicast_opts)]
    fn multicast_v4(&self, fd: BorrowedFd<'_>, on: bool) -> io::Result<()> {
        if self.family() != AddressFamily::Ipv4 {
            return Ok(());
        }
        c_wrappers::setsockopt::<u8>(fd, libc::IPPROTO_IP, libc::IP_MULTICAST_LOOP, u8::from(on))?;
        if on {
            c_wrappers::setsockopt::<u8>(
                fd,
                libc::IPPROTO_IP,
                libc::IP_MULTICAST_TTL,
                SocketOptions::MULTICAST_HOPS,
            )?;
        }
        Ok(())
    }
    #[cfg(multicast_opts)]
    fn multicast_v6(&self, fd: BorrowedFd<'_>, on: bool) -> io::Result<()> {
        if self.family() != AddressFamily::Ipv6 {
            return Ok(());
        }
        c_wrappers::setsockopt_bool(fd, libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_LOOP, on)?;
        if on {
            c_wrappers::setsockopt::<c_int>(
                fd,
                libc::IPPROTO_IPV6,
                libc::IPV6_MULTICAST_HOPS,
                SocketOptions::MULTICAST_HOPS.into(),
            )?;
        }
        Ok(())
    }
    #[cfg(not(multicast_opts))]
    fn multicast_v4(&self, _fd: BorrowedFd<'_>, _on: bool) -> io::Result<()> { Ok(()) }
    #[cfg(not(multicast_opts))]
    fn multicast_v6(&self, _fd: BorrowedFd<'_>, _on: bool) -> io::Result<()> { Ok(()) }

    /// Closes the descriptor. Closing an already closed binding does nothing.
    pub fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            tracing::debug!(fd = fd.as_raw_fd(), identity = ?self.identity, "socket closed");
            drop(fd);
        }
    }

    /// Shuts down both directions of the socket without releasing the descriptor.
    pub fn shutdown(&self) -> io::Result<()> {
        match &self.fd {
            Some(fd) => c_wrappers::shutdown(fd.as_fd(), Shutdown::Both),
            None => Ok(()),
        }
    }

    /// The descriptor, or `None` once closed.
    #[inline]
    pub fn raw_fd(&self) -> Option<RawFd> { self.fd.as_ref().map(AsRawFd::as_raw_fd) }
    #[inline]
    pub(crate) fn borrow_fd(&self) -> io::Result<BorrowedFd<'_>> {
        self.fd.as_ref().map(AsFd::as_fd).ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }
    /// Whether the descriptor has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool { self.fd.is_none() }

    /// What the binding is bound to.
    #[inline]
    pub fn kind(&self) -> BindingKind { self.identity.kind }
    /// The bound address, for IP bindings.
    #[inline]
    pub fn address(&self) -> Option<IpAddr> { self.identity.address }
    /// The requested port; 0 for bindings whose port the OS picks.
    #[inline]
    pub fn port(&self) -> u16 { self.identity.port }
    /// The socket path, for Unix-domain bindings.
    #[inline]
    pub fn path(&self) -> Option<&Path> { self.identity.path.as_deref() }
    /// The interface the address was taken from, if any.
    #[inline]
    pub fn interface(&self) -> Option<&InterfaceName> { self.interface.as_ref() }
    /// The socket type the binding was created with.
    #[inline]
    pub fn socket_type(&self) -> SocketType { self.socket_type }
    #[inline]
    pub(crate) fn identity(&self) -> &BindingIdentity { &self.identity }

    /// Address family of the binding. Custom handles report
    /// [`Unspecified`](AddressFamily::Unspecified).
    pub fn family(&self) -> AddressFamily {
        match (&self.identity.address, &self.identity.path) {
            (Some(ip), _) => AddressFamily::of(ip),
            (None, Some(..)) => AddressFamily::Unix,
            (None, None) => AddressFamily::Unspecified,
        }
    }

    /// The address the socket is actually bound to, including an OS-assigned port. `None` for
    /// sockets that are not IP sockets.
    pub fn local_addr(&self) -> Result<Option<SocketAddr>> {
        let addr = self.borrow_fd().and_then(c_wrappers::local_addr).map_err(Error::resource)?;
        Ok(addr.to_ip())
    }
}
impl PartialEq for SocketBinding {
    #[inline]
    fn eq(&self, other: &Self) -> bool { self.identity == other.identity }
}
impl Eq for SocketBinding {}
impl Debug for SocketBinding {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketBinding")
            .field("fd", &self.raw_fd())
            .field("kind", &self.identity.kind)
            .field("address", &self.identity.address)
            .field("port", &self.identity.port)
            .field("path", &self.identity.path)
            .field("interface", &self.interface)
            .field("socket_type", &self.socket_type)
            .finish()
    }
}

fn remove_stale_path(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket path"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        // Whatever prevented the removal will resurface as a classified bind error.
        Err(e) => tracing::trace!(path = %path.display(), error = %e, "could not remove path"),
    }
}

fn is_unsupported(e: &io::Error) -> bool {
    [libc::ENOPROTOOPT, libc::EOPNOTSUPP, libc::ENOTSUP].iter().any(|&errno| e.is_errno(errno))
}
