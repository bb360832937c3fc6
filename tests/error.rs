use {
    super::util::*,
    crate::{BindReason, Error, ResourceReason},
    std::io,
};

#[test]
fn errno_classification() -> TestResult {
    ensure_eq!(BindReason::from_errno(libc::EADDRINUSE), BindReason::Conflict);
    ensure_eq!(BindReason::from_errno(libc::EACCES), BindReason::Permission);
    ensure_eq!(BindReason::from_errno(libc::ENOENT), BindReason::MissingPathComponent);
    ensure_eq!(BindReason::from_errno(libc::EROFS), BindReason::ReadOnlyFilesystem);
    ensure_eq!(BindReason::from_errno(libc::ELOOP), BindReason::SymlinkLoop);
    ensure_eq!(BindReason::from_errno(libc::EIO), BindReason::Other);

    ensure_eq!(ResourceReason::from_errno(libc::EMFILE), ResourceReason::DescriptorsExhausted);
    ensure_eq!(ResourceReason::from_errno(libc::EAFNOSUPPORT), ResourceReason::UnsupportedFamily);
    ensure_eq!(ResourceReason::from_errno(libc::ENOBUFS), ResourceReason::OutOfMemory);
    Ok(())
}

#[test]
fn conversion_to_io_error() -> TestResult {
    ensure_eq!(io::Error::from(Error::Timeout).kind(), io::ErrorKind::TimedOut);
    ensure_eq!(io::Error::from(Error::Interrupted).kind(), io::ErrorKind::Interrupted);
    ensure_eq!(io::Error::from(Error::NoBindings).kind(), io::ErrorKind::InvalidInput);
    let listen = Error::Listen(io::Error::from(io::ErrorKind::PermissionDenied));
    ensure_eq!(io::Error::from(listen).kind(), io::ErrorKind::PermissionDenied);
    Ok(())
}
