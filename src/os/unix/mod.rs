//! Raw libc plumbing for sockets, pipes and interface enumeration.
//!
//! Everything here returns `io::Result` with the untouched OS error; classification into the
//! crate's [`Error`](crate::Error) taxonomy happens one layer up, where the operation being
//! attempted is known.

pub(crate) mod c_wrappers;
mod sockaddr;

pub(crate) use sockaddr::SockAddr;

pub(crate) mod unixprelude {
    #[allow(unused_imports)]
    pub(crate) use {
        libc::{c_int, c_void, sa_family_t, sockaddr, sockaddr_storage, socklen_t},
        std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd},
    };
}
