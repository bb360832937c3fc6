use {
    super::util::*,
    crate::{
        binding::SocketBinding, AddressFamily, BindReason, BindSpec, BindingKind, Error,
        SocketOptions, SocketType,
    },
    color_eyre::eyre::{bail, ensure},
    std::{
        net::{IpAddr, Ipv4Addr},
        path::PathBuf,
    },
};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[test]
fn equality_ignores_descriptor() -> TestResult {
    let a = SocketBinding::new(BindSpec::address(LOCALHOST, 0, SocketType::Datagram))?;
    let b = SocketBinding::new(BindSpec::address(LOCALHOST, 0, SocketType::Datagram))?;
    let c = SocketBinding::new(BindSpec::address(LOCALHOST, 4556, SocketType::Datagram))?;
    ensure!(a.raw_fd() != b.raw_fd(), "two bindings share a descriptor");
    ensure_eq!(a, b);
    ensure!(a != c, "bindings with different ports compare equal");
    ensure_eq!(a.kind(), BindingKind::AddressOnly);
    ensure_eq!(c.kind(), BindingKind::AddressPort);
    ensure_eq!(c.family(), AddressFamily::Ipv4);
    Ok(())
}

#[test]
fn close_is_idempotent() -> TestResult {
    let mut binding = SocketBinding::new(BindSpec::address(LOCALHOST, 0, SocketType::Stream))?;
    ensure!(!binding.is_closed(), "fresh binding reports closed");
    binding.close();
    binding.close();
    ensure!(binding.is_closed(), "closed binding reports open");
    ensure_eq!(binding.raw_fd(), None);
    binding.shutdown()?;
    Ok(())
}

#[test]
fn address_only_learns_ephemeral_port() -> TestResult {
    let binding = SocketBinding::new(BindSpec::address(LOCALHOST, 0, SocketType::Datagram))?;
    binding.bind()?;
    let Some(addr) = binding.local_addr()? else { bail!("no local address for an IP binding") };
    ensure_eq!(addr.ip(), LOCALHOST);
    ensure!(addr.port() != 0, "OS did not assign a port");
    ensure_eq!(binding.port(), 0);
    Ok(())
}

#[test]
fn conflicting_bind_is_classified() -> TestResult {
    let first = SocketBinding::new(BindSpec::address(LOCALHOST, 0, SocketType::Stream))?;
    first.bind()?;
    let port = first.local_addr()?.map(|a| a.port()).unwrap_or_default();
    ensure!(port != 0, "OS did not assign a port");

    let second = SocketBinding::new(BindSpec::address(LOCALHOST, port, SocketType::Stream))?;
    match second.bind() {
        Err(Error::Bind { reason: BindReason::Conflict, .. }) => Ok(()),
        other => bail!("expected an address conflict, got {other:?}"),
    }
}

#[test]
fn unix_path_errors_are_classified() -> TestResult {
    let missing = PathBuf::from("/nonexistent-sockmux-dir/x.sock");
    let binding = SocketBinding::new(BindSpec::path(missing, SocketType::Stream))?;
    match binding.bind() {
        Err(Error::Bind { reason: BindReason::MissingPathComponent, .. }) => {}
        other => bail!("expected a missing path component, got {other:?}"),
    }

    let nul = PathBuf::from("/tmp/sockmux\0test.sock");
    let binding = SocketBinding::new(BindSpec::path(nul, SocketType::Stream))?;
    match binding.bind() {
        Err(Error::Bind { reason: BindReason::InvalidArgument, .. }) => Ok(()),
        other => bail!("expected an invalid argument, got {other:?}"),
    }
}

#[test]
fn stale_path_is_replaced() -> TestResult {
    let path = TempPath::fresh(make_id!());
    let first = SocketBinding::new(BindSpec::path(path.0.clone(), SocketType::Stream))?;
    first.bind()?;
    ensure!(path.0.exists(), "socket file not created");
    // An unclean shutdown leaves the file behind.
    drop(first);
    ensure!(path.0.exists(), "socket file vanished on close");

    let second = SocketBinding::new(BindSpec::path(path.0.clone(), SocketType::Stream))?;
    second.bind()?;
    second.listen(1)?;
    ensure_eq!(second.family(), AddressFamily::Unix);
    Ok(())
}

#[test]
fn options_toggle_on_descriptor() -> TestResult {
    let binding = SocketBinding::new(BindSpec::address(LOCALHOST, 0, SocketType::Stream))?;
    let fd = binding.raw_fd().unwrap();

    binding.set(SocketOptions::REUSE_ADDRESS | SocketOptions::NON_BLOCKING)?;
    ensure!(sockopt_int(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR)? != 0, "SO_REUSEADDR not set");
    ensure!(is_nonblocking(fd)?, "O_NONBLOCK not set");

    binding.unset(SocketOptions::NON_BLOCKING)?;
    ensure!(!is_nonblocking(fd)?, "O_NONBLOCK not cleared");

    // Inapplicable options are accepted anyway.
    let udp = SocketBinding::new(BindSpec::address(LOCALHOST, 0, SocketType::Datagram))?;
    udp.set(SocketOptions::NO_DELAY | SocketOptions::MULTICAST_V6)?;
    let path = TempPath::fresh(make_id!());
    let unix = SocketBinding::new(BindSpec::path(path.0.clone(), SocketType::Datagram))?;
    unix.set(SocketOptions::MULTICAST | SocketOptions::MULTICAST_V6)?;
    Ok(())
}

#[test]
fn adopted_handle_is_custom() -> TestResult {
    let sock = std::net::UdpSocket::bind((LOCALHOST, 0))?;
    let binding = SocketBinding::new(BindSpec::handle(sock.into()))?;
    ensure_eq!(binding.kind(), BindingKind::CustomHandle);
    ensure_eq!(binding.family(), AddressFamily::Unspecified);
    binding.bind()?;
    Ok(())
}
