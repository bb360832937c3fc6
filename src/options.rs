//! Socket options that a multiplexer applies uniformly to all of its bindings.

use std::fmt::{self, Debug, Formatter};

bitflags::bitflags! {
    /// A set of socket options.
    ///
    /// A multiplexer keeps one of these as its global option mask and applies every set bit to
    /// every binding, including ones created after the bit was set. The application order is fixed:
    /// the [`PRE_BIND`](Self::PRE_BIND) options are applied before the OS bind call, the
    /// [`POST_BIND`](Self::POST_BIND) ones after it, and within each group bits are applied in
    /// declaration order.
    ///
    /// Options that make no sense for a particular socket (no-delay on a datagram socket,
    /// IPv4 multicast on a Unix-domain socket and so on) are accepted and ignored.
    #[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct SocketOptions: u32 {
        /// `SO_REUSEADDR`: allow rebinding an address that is still in `TIME_WAIT`.
        const REUSE_ADDRESS = 1 << 0;
        /// `SO_BROADCAST`: allow sending to broadcast addresses. Datagram sockets only.
        const BROADCAST     = 1 << 1;
        /// Enables IPv4 multicast loopback and sets the multicast TTL to 255.
        const MULTICAST     = 1 << 2;
        /// Enables IPv6 multicast loopback and sets the multicast hop limit to 255.
        const MULTICAST_V6  = 1 << 3;
        /// `SO_LINGER` with a one second timeout: `close` blocks until queued data is sent.
        const LINGER        = 1 << 4;
        /// `TCP_NODELAY`: disables Nagle's algorithm.
        const NO_DELAY      = 1 << 5;
        /// `O_NONBLOCK` on the descriptor.
        const NON_BLOCKING  = 1 << 6;
    }
}

impl SocketOptions {
    /// Options that have to be in place before the socket is bound.
    pub const PRE_BIND: Self = Self::REUSE_ADDRESS
        .union(Self::BROADCAST)
        .union(Self::MULTICAST)
        .union(Self::MULTICAST_V6);
    /// Options applied once the socket is bound.
    pub const POST_BIND: Self = Self::LINGER.union(Self::NO_DELAY).union(Self::NON_BLOCKING);

    /// Multicast TTL and hop limit set alongside multicast loopback.
    pub(crate) const MULTICAST_HOPS: u8 = 255;
    /// `SO_LINGER` timeout used by [`LINGER`](Self::LINGER).
    pub(crate) const LINGER_SECONDS: u16 = 1;

    /// Iterates over the individual options in the order they are applied to a fresh binding.
    pub(crate) fn in_application_order(self) -> impl Iterator<Item = Self> {
        (self & Self::PRE_BIND).iter().chain((self & Self::POST_BIND).iter())
    }
}

impl Debug for SocketOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("SocketOptions(empty)");
        }
        f.write_str("SocketOptions(")?;
        bitflags::parser::to_writer(self, &mut *f)?;
        f.write_str(")")
    }
}
