//! Error taxonomy shared by bindings, the multiplexer and the listener.
//!
//! Every failure that leaves this crate is one of the [`Error`] variants. OS error codes are kept
//! as the `source` of the variant they were classified into, so they remain available for
//! diagnostics, but callers are expected to branch on the variant and its coarse reason rather
//! than on the code or message.

use {
    crate::options::SocketOptions,
    std::{
        fmt::{self, Display, Formatter},
        io,
    },
};

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All the ways an operation on a binding, multiplexer or listener can fail.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The OS refused to create a socket (or the interrupt pipe). Not retryable without operator
    /// intervention.
    #[error("cannot create socket: {reason}")]
    Resource {
        /// Coarse classification of the refusal.
        reason: ResourceReason,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The OS bind call failed. Retrying with the same request will fail the same way.
    #[error("cannot bind socket: {reason}")]
    Bind {
        /// Coarse classification of the failure.
        reason: BindReason,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },
    /// A binding could not be put into listening mode. Only that binding is affected.
    #[error("cannot listen on socket")]
    Listen(#[source] io::Error),
    /// A socket option was refused for a reason other than being unsupported on the socket.
    #[error("cannot apply socket option {option:?}")]
    Option {
        /// The option that was being applied or cleared.
        option: SocketOptions,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The readiness wait syscall itself failed. The multiplexer's state is unaffected.
    #[error("readiness wait failed")]
    Wait(#[source] io::Error),
    /// No handle became ready before the caller-supplied timeout expired.
    #[error("readiness wait timed out")]
    Timeout,
    /// The wait was cancelled with [`interrupt()`](crate::SocketMultiplexer::interrupt).
    #[error("readiness wait interrupted")]
    Interrupted,
    /// A readiness wait was attempted on a multiplexer without any bindings.
    #[error("no bindings to wait on")]
    NoBindings,
    /// Accepting an incoming connection failed; the listener is presumed down.
    #[error("cannot accept connection")]
    Accept(#[source] io::Error),
}
impl Error {
    pub(crate) fn resource(source: io::Error) -> Self {
        Self::Resource { reason: ResourceReason::from_io(&source), source }
    }
    pub(crate) fn bind(source: io::Error) -> Self {
        Self::Bind { reason: BindReason::from_io(&source), source }
    }
    pub(crate) fn option(option: SocketOptions, source: io::Error) -> Self {
        Self::Option { option, source }
    }

    /// Whether this is the expected outcome of a readiness wait with a timeout.
    #[inline]
    pub fn is_timeout(&self) -> bool { matches!(self, Self::Timeout) }
    /// Whether this is the expected outcome of an explicit interrupt.
    #[inline]
    pub fn is_interrupted(&self) -> bool { matches!(self, Self::Interrupted) }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        use io::ErrorKind::*;
        match e {
            Error::Timeout => io::Error::new(TimedOut, e),
            Error::Interrupted => io::Error::new(Interrupted, e),
            Error::NoBindings => io::Error::new(InvalidInput, e),
            Error::Resource { .. }
            | Error::Bind { .. }
            | Error::Listen(..)
            | Error::Option { .. }
            | Error::Wait(..)
            | Error::Accept(..) => {
                let kind = std::error::Error::source(&e)
                    .and_then(|s| s.downcast_ref::<io::Error>())
                    .map_or(Other, io::Error::kind);
                io::Error::new(kind, e)
            }
        }
    }
}

/// Why the OS refused to create a socket.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ResourceReason {
    /// Creating a socket of this type or protocol is not permitted.
    PermissionDenied,
    /// The address family is not supported.
    UnsupportedFamily,
    /// The per-process or system-wide descriptor table is full.
    DescriptorsExhausted,
    /// Not enough kernel memory or buffer space.
    OutOfMemory,
    /// The protocol or socket type is not supported within the domain.
    UnsupportedProtocol,
    /// Anything else.
    Other,
}
impl ResourceReason {
    /// Classifies a raw `errno` value returned by `socket(2)` or `pipe(2)`.
    pub fn from_errno(errno: i32) -> Self {
        use ResourceReason::*;
        match errno {
            libc::EACCES | libc::EPERM => PermissionDenied,
            libc::EAFNOSUPPORT => UnsupportedFamily,
            libc::EMFILE | libc::ENFILE => DescriptorsExhausted,
            libc::ENOBUFS | libc::ENOMEM => OutOfMemory,
            libc::EPROTONOSUPPORT | libc::EPROTOTYPE | libc::EINVAL => UnsupportedProtocol,
            _ => Other,
        }
    }
    fn from_io(e: &io::Error) -> Self { e.raw_os_error().map_or(Self::Other, Self::from_errno) }
    const fn msg(self) -> &'static str {
        use ResourceReason::*;
        match self {
            PermissionDenied => "permission to create a socket of this type is denied",
            UnsupportedFamily => "the address family is not supported",
            DescriptorsExhausted => "the descriptor table is full",
            OutOfMemory => "insufficient memory is available",
            UnsupportedProtocol => "the protocol is not supported within this domain",
            Other => "unclassified failure",
        }
    }
}
impl Display for ResourceReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(self.msg()) }
}

/// Why the OS bind call failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BindReason {
    /// The address or path is already in use.
    Conflict,
    /// The address is not configured on this host (any more).
    AddressUnavailable,
    /// Binding to this address or creating the path entry is not permitted.
    Permission,
    /// The address is malformed or has the wrong length, or the path cannot be represented.
    InvalidArgument,
    /// A directory along the path does not exist or is not a directory.
    MissingPathComponent,
    /// The path would reside on a read-only filesystem.
    ReadOnlyFilesystem,
    /// Too many symbolic links were encountered while resolving the path.
    SymlinkLoop,
    /// Anything else.
    Other,
}
impl BindReason {
    /// Classifies a raw `errno` value returned by `bind(2)`.
    pub fn from_errno(errno: i32) -> Self {
        use BindReason::*;
        match errno {
            libc::EADDRINUSE => Conflict,
            libc::EADDRNOTAVAIL => AddressUnavailable,
            libc::EACCES | libc::EPERM => Permission,
            libc::EINVAL | libc::EFAULT | libc::ENAMETOOLONG | libc::EAFNOSUPPORT => {
                InvalidArgument
            }
            libc::ENOENT | libc::ENOTDIR => MissingPathComponent,
            libc::EROFS => ReadOnlyFilesystem,
            libc::ELOOP => SymlinkLoop,
            _ => Other,
        }
    }
    fn from_io(e: &io::Error) -> Self {
        match e.raw_os_error() {
            Some(errno) => Self::from_errno(errno),
            // Produced by our own sockaddr construction, which rejects unrepresentable paths.
            None if e.kind() == io::ErrorKind::InvalidInput => Self::InvalidArgument,
            None => Self::Other,
        }
    }
    const fn msg(self) -> &'static str {
        use BindReason::*;
        match self {
            Conflict => "address already in use",
            AddressUnavailable => "address not available",
            Permission => "permission denied",
            InvalidArgument => "invalid address",
            MissingPathComponent => "a component of the path does not exist",
            ReadOnlyFilesystem => "read-only filesystem",
            SymlinkLoop => "too many levels of symbolic links",
            Other => "unclassified failure",
        }
    }
}
impl Display for BindReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(self.msg()) }
}
