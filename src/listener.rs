//! A stream server built on a [`SocketMultiplexer`].
//!
//! [`StreamListener`] binds a multiplexer to a port, the addresses of an interface or a filesystem
//! path, puts it into listening mode and accepts connections on whichever binding becomes ready.
//! The usual way to create one is through [`ListenerOptions`]:
//!
//! ```no_run
//! use sockmux::ListenerOptions;
//! # fn main() -> sockmux::Result<()> {
//! let listener = ListenerOptions::new().port(4556).reuse_address(true).create()?;
//! for conn in listener.incoming() {
//!     let conn = conn?;
//!     // ...
//! }
//! # Ok(()) }
//! ```

use {
    crate::{
        binding::SocketType,
        error::{Error, Result},
        iface::{InterfaceMonitor, InterfaceName},
        multiplexer::SocketMultiplexer,
        options::SocketOptions,
        os::unix::{c_wrappers, unixprelude::*},
    },
    std::{
        fmt::{self, Debug, Formatter},
        io::{self, Read, Write},
        iter::FusedIterator,
        net::{SocketAddr, TcpStream},
        os::unix::net::UnixStream,
        path::PathBuf,
        sync::Arc,
    },
};

/// Backlog used when none is specified.
pub const DEFAULT_BACKLOG: c_int = 5;

/// Where a listener created from [`ListenerOptions`] listens.
#[derive(Clone, Debug, PartialEq, Eq)]
enum ListenTarget {
    Port(u16),
    Interface(InterfaceName, u16),
    Path(PathBuf),
}

/// A builder for [`StreamListener`]s.
pub struct ListenerOptions {
    target: ListenTarget,
    reuse_address: bool,
    backlog: c_int,
    linger: bool,
    nonblocking: bool,
    monitor: Option<Arc<dyn InterfaceMonitor>>,
}

/// Creation.
impl ListenerOptions {
    /// Creates an options table with default values: an OS-assigned port on the IPv4 wildcard
    /// address, a backlog of 5, lingering close and nonblocking accepts.
    #[inline]
    pub fn new() -> Self {
        Self {
            target: ListenTarget::Port(0),
            reuse_address: false,
            backlog: DEFAULT_BACKLOG,
            linger: true,
            nonblocking: true,
            monitor: None,
        }
    }
}

/// Option setters.
impl ListenerOptions {
    builder_setters! {
        /// Sets whether addresses in `TIME_WAIT` may be rebound.
        ///
        /// This is disabled by default.
        reuse_address: bool,
        /// Sets the backlog of pending connections for every binding.
        ///
        /// The default value is 5.
        backlog: c_int,
        /// Sets whether closing a listening socket waits (for up to a second) for queued data.
        ///
        /// This is enabled by default.
        linger: bool,
        /// Sets whether the listening sockets are nonblocking. Accepted connections are always
        /// blocking.
        ///
        /// This is enabled by default.
        nonblocking: bool,
    }
    /// Listens on the IPv4 wildcard address at `port`.
    #[must_use = "builder setters take the entire structure and return the result"]
    pub fn port(mut self, port: u16) -> Self {
        self.target = ListenTarget::Port(port);
        self
    }
    /// Listens on every address of `interface` at `port`, following address changes.
    #[must_use = "builder setters take the entire structure and return the result"]
    pub fn interface(mut self, interface: impl Into<InterfaceName>, port: u16) -> Self {
        self.target = ListenTarget::Interface(interface.into(), port);
        self
    }
    /// Listens on a Unix-domain socket at `path`.
    #[must_use = "builder setters take the entire structure and return the result"]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.target = ListenTarget::Path(path.into());
        self
    }
    /// Sets the interface monitor used for interface targets. The process-wide
    /// [`LinkRegistry`](crate::LinkRegistry) is used by default.
    #[must_use = "builder setters take the entire structure and return the result"]
    pub fn monitor(mut self, monitor: Arc<dyn InterfaceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    fn socket_options(&self) -> SocketOptions {
        let mut options = SocketOptions::empty();
        options.set(SocketOptions::REUSE_ADDRESS, self.reuse_address);
        options.set(SocketOptions::LINGER, self.linger);
        options.set(SocketOptions::NON_BLOCKING, self.nonblocking);
        options
    }
}

/// Listener constructor.
impl ListenerOptions {
    /// Creates a bound, listening [`StreamListener`].
    pub fn create(self) -> Result<StreamListener> {
        let mux = match self.monitor.clone() {
            Some(monitor) => SocketMultiplexer::with_monitor(monitor)?,
            None => SocketMultiplexer::new()?,
        };
        mux.set(self.socket_options())?;
        let listener = StreamListener::from(mux);
        match &self.target {
            ListenTarget::Port(port) => {
                listener.mux.bind_port(*port, SocketType::Stream)?;
            }
            ListenTarget::Interface(interface, port) => {
                listener.mux.bind_interface(interface, *port, SocketType::Stream)?;
            }
            ListenTarget::Path(path) => {
                listener.mux.bind_path(path.clone(), SocketType::Stream)?;
            }
        }
        listener.listen(self.backlog)?;
        Ok(listener)
    }
}

impl Default for ListenerOptions {
    #[inline]
    fn default() -> Self { Self::new() }
}
impl Debug for ListenerOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerOptions")
            .field("target", &self.target)
            .field("reuse_address", &self.reuse_address)
            .field("backlog", &self.backlog)
            .field("linger", &self.linger)
            .field("nonblocking", &self.nonblocking)
            .field("monitor", &self.monitor.is_some())
            .finish()
    }
}

/// A connection accepted by a [`StreamListener`].
#[derive(Debug)]
pub enum Connection {
    /// Accepted on an IP binding.
    Tcp(TcpStream),
    /// Accepted on a Unix-domain binding.
    Unix(UnixStream),
}
impl Connection {
    /// The IP address of the peer, for TCP connections.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(s) => s.peer_addr().ok(),
            Self::Unix(..) => None,
        }
    }
}
impl AsFd for Connection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Self::Tcp(s) => s.as_fd(),
            Self::Unix(s) => s.as_fd(),
        }
    }
}
impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            Self::Unix(s) => s.read(buf),
        }
    }
}
impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            Self::Unix(s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            Self::Unix(s) => s.flush(),
        }
    }
}

/// Stream server accepting connections on all bindings of a multiplexer.
///
/// Dropping the listener closes all of its sockets.
#[derive(Debug)]
pub struct StreamListener {
    mux: SocketMultiplexer,
}
impl StreamListener {
    /// Creates a listener with no bindings, using the process-wide interface registry. Listening
    /// sockets linger on close and are nonblocking.
    pub fn new() -> Result<Self> {
        let mux = SocketMultiplexer::new()?;
        mux.set(SocketOptions::LINGER | SocketOptions::NON_BLOCKING)?;
        Ok(Self::from(mux))
    }

    /// Binds the IPv4 wildcard address at `port` and listens on it with the default backlog, unless
    /// [`listen`](Self::listen) was already called with another one.
    pub fn bind(&self, port: u16, reuse_address: bool) -> Result<RawFd> {
        self.prepare(reuse_address)?;
        let fd = self.mux.bind_port(port, SocketType::Stream)?;
        self.listen_default()?;
        Ok(fd)
    }
    /// Binds every address of `interface` at `port`, following address changes.
    pub fn bind_interface(
        &self,
        interface: &InterfaceName,
        port: u16,
        reuse_address: bool,
    ) -> Result<Vec<RawFd>> {
        self.prepare(reuse_address)?;
        let fds = self.mux.bind_interface(interface, port, SocketType::Stream)?;
        self.listen_default()?;
        Ok(fds)
    }
    /// Binds a Unix-domain socket at `path`.
    pub fn bind_path(&self, path: impl Into<PathBuf>) -> Result<RawFd> {
        let fd = self.mux.bind_path(path, SocketType::Stream)?;
        self.listen_default()?;
        Ok(fd)
    }

    fn prepare(&self, reuse_address: bool) -> Result<()> {
        if reuse_address {
            self.mux.set(SocketOptions::REUSE_ADDRESS)?;
        }
        Ok(())
    }
    fn listen_default(&self) -> Result<()> {
        self.listen(self.mux.backlog().unwrap_or(DEFAULT_BACKLOG))
    }

    /// Puts every binding into listening mode with the given backlog.
    #[inline]
    pub fn listen(&self, backlog: c_int) -> Result<()> { self.mux.listen(backlog) }

    /// Waits for and accepts one connection.
    ///
    /// A connection that was accepted but could not be turned into a stream is dropped and the
    /// wait resumes. Any other failure, including one of the wait itself, means the listener is
    /// down.
    pub fn accept(&self) -> Result<Connection> {
        loop {
            for fd in self.mux.wait(None)? {
                // SAFETY: the descriptor belongs to a live binding; bindings are only closed by
                // `wait` itself or by `close`, after which the accept fails with EBADF.
                let listener = unsafe { BorrowedFd::borrow_raw(fd) };
                let accepted = match c_wrappers::accept(listener) {
                    Ok(accepted) => accepted,
                    Err(e) if is_transient_accept_error(&e) => continue,
                    Err(e) => return Err(Error::Accept(e)),
                };
                match wrap(accepted) {
                    Ok(conn) => return Ok(conn),
                    Err(e) => tracing::debug!(error = %e, "discarding accepted connection"),
                }
            }
        }
    }

    /// An infinite iterator over [`accept`](Self::accept).
    #[inline]
    pub fn incoming(&self) -> Incoming<'_> { Incoming { listener: self } }

    /// Closes every binding and interrupts a pending [`accept`](Self::accept).
    #[inline]
    pub fn close(&self) { self.mux.close() }
    /// Shuts down every binding and interrupts a pending [`accept`](Self::accept).
    #[inline]
    pub fn shutdown(&self) { self.mux.shutdown() }
    /// Makes a pending (or the next) [`accept`](Self::accept) fail with [`Error::Interrupted`].
    #[inline]
    pub fn interrupt(&self) { self.mux.interrupt() }

    /// Borrows the underlying multiplexer.
    #[inline(always)]
    pub fn multiplexer(&self) -> &SocketMultiplexer { &self.mux }
}
impl From<SocketMultiplexer> for StreamListener {
    #[inline]
    fn from(mux: SocketMultiplexer) -> Self { Self { mux } }
}
impl From<StreamListener> for SocketMultiplexer {
    #[inline]
    fn from(l: StreamListener) -> Self { l.mux }
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
        || e.raw_os_error() == Some(libc::ECONNABORTED)
}

fn wrap(fd: OwnedFd) -> io::Result<Connection> {
    #[cfg(test)]
    take_injected_wrap_failure()?;
    c_wrappers::set_nonblocking(fd.as_fd(), false)?;
    let local = c_wrappers::local_addr(fd.as_fd())?;
    Ok(match local.family() {
        libc::AF_UNIX => Connection::Unix(UnixStream::from(fd)),
        _ => Connection::Tcp(TcpStream::from(fd)),
    })
}

#[cfg(test)]
thread_local! {
    /// Number of upcoming `wrap` calls on this thread that fail without looking at the descriptor.
    pub(crate) static WRAP_FAILURES: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}
#[cfg(test)]
fn take_injected_wrap_failure() -> io::Result<()> {
    let remaining = WRAP_FAILURES.with(|n| n.replace(n.get().saturating_sub(1)));
    if remaining > 0 {
        return Err(io::Error::other("injected wrap failure"));
    }
    Ok(())
}

/// Iterator over connections accepted by a [`StreamListener`]. Never returns `None`.
#[derive(Debug)]
pub struct Incoming<'l> {
    listener: &'l StreamListener,
}
impl Iterator for Incoming<'_> {
    type Item = Result<Connection>;
    #[inline(always)]
    fn next(&mut self) -> Option<Self::Item> { Some(self.listener.accept()) }
}
impl FusedIterator for Incoming<'_> {}
