#[cfg(not(unix))]
compile_error!(
    "sockmux drives BSD sockets through select(2) and a self-pipe, which only exist on Unix-like \
     systems"
);

// The select wrapper stores descriptors in fd_set and the binding layer passes them around as
// RawFd; both assume a 32-bit or wider c_int.
#[cfg(unix)]
const _: () = assert!(
    std::mem::size_of::<libc::c_int>() >= 4,
    "c_int narrower than 32 bits is not supported"
);
