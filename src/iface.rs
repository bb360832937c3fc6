//! Network interfaces as seen by the multiplexer: names, their addresses, and change events.
//!
//! The multiplexer never talks to the OS routing layer itself. It asks an [`InterfaceMonitor`] for
//! the addresses of an interface and subscribes to it for [`InterfaceEvent`]s. [`LinkRegistry`] is
//! the stock monitor: it enumerates addresses with `getifaddrs` and fans out whatever events its
//! producer hands to [`publish`](LinkRegistry::publish).

use {
    crate::{os::unix::c_wrappers, LockExt},
    std::{
        borrow::Borrow,
        fmt::{self, Debug, Display, Formatter},
        io,
        net::IpAddr,
        sync::{Arc, Mutex, OnceLock, Weak},
    },
};

/// The name of a network interface, such as `eth0` or `lo`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceName(Box<str>);
impl InterfaceName {
    /// Wraps an interface name.
    #[inline]
    pub fn new(name: impl Into<Box<str>>) -> Self { Self(name.into()) }
    /// Borrows the name as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str { &self.0 }
    /// An empty name stands for "no particular interface".
    #[inline]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    /// Looks up the OS index of the interface, or `None` if it does not exist.
    pub fn index(&self) -> Option<u32> {
        match c_wrappers::if_nametoindex(&self.0) {
            0 => None,
            idx => Some(idx),
        }
    }
}
impl Debug for InterfaceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { Debug::fmt(&*self.0, f) }
}
impl Display for InterfaceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}
impl From<&str> for InterfaceName {
    #[inline]
    fn from(s: &str) -> Self { Self::new(s) }
}
impl From<String> for InterfaceName {
    #[inline]
    fn from(s: String) -> Self { Self::new(s) }
}
impl Borrow<str> for InterfaceName {
    #[inline]
    fn borrow(&self) -> &str { &self.0 }
}

/// One address configured on an interface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct InterfaceAddress {
    /// The address itself.
    pub ip: IpAddr,
    /// IPv6 scope ID, nonzero for link-local addresses.
    pub scope_id: u32,
    /// Whether this is the interface's broadcast address rather than an address of the host.
    pub broadcast: bool,
}
impl InterfaceAddress {
    /// A host address with no scope.
    #[inline]
    pub const fn new(ip: IpAddr) -> Self { Self { ip, scope_id: 0, broadcast: false } }
    /// A broadcast address.
    #[inline]
    pub const fn broadcast(ip: IpAddr) -> Self { Self { ip, scope_id: 0, broadcast: true } }
}

/// A change to the set of addresses configured on an interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InterfaceEvent {
    /// `address` appeared on `interface`.
    AddressAdded {
        /// The interface that changed.
        interface: InterfaceName,
        /// The new address.
        address: InterfaceAddress,
    },
    /// `address` disappeared from `interface`.
    AddressRemoved {
        /// The interface that changed.
        interface: InterfaceName,
        /// The address that is gone.
        address: InterfaceAddress,
    },
}
impl InterfaceEvent {
    /// The interface the event is about.
    pub fn interface(&self) -> &InterfaceName {
        match self {
            Self::AddressAdded { interface, .. } | Self::AddressRemoved { interface, .. } => {
                interface
            }
        }
    }
    /// The address that was added or removed.
    pub fn address(&self) -> &InterfaceAddress {
        match self {
            Self::AddressAdded { address, .. } | Self::AddressRemoved { address, .. } => address,
        }
    }
}

/// Receiver of interface events.
///
/// Implemented by [`SocketMultiplexer`](crate::SocketMultiplexer)'s internals, which subscribe to
/// a monitor, and by any closure taking `&InterfaceEvent`, which is how external observers are
/// attached with [`set_event_callback`](crate::SocketMultiplexer::set_event_callback).
pub trait InterfaceEventSink: Send + Sync {
    /// Handles one event. Called on whatever thread the monitor delivers events on.
    fn on_interface_event(&self, event: &InterfaceEvent);
}
impl<F: Fn(&InterfaceEvent) + Send + Sync> InterfaceEventSink for F {
    #[inline]
    fn on_interface_event(&self, event: &InterfaceEvent) { self(event) }
}

/// Source of interface addresses and change notifications.
///
/// Subscriptions are held as [`Weak`] references so that a monitor never keeps a multiplexer
/// alive; dead subscriptions may be pruned lazily.
pub trait InterfaceMonitor: Send + Sync {
    /// Lists the addresses currently configured on `interface`.
    fn addresses(&self, interface: &InterfaceName) -> io::Result<Vec<InterfaceAddress>>;
    /// Subscribes `sink` to events concerning `interface`. Subscribing twice is a no-op.
    fn register(&self, interface: &InterfaceName, sink: Weak<dyn InterfaceEventSink>);
    /// Cancels the subscription of `sink` to `interface`, if any.
    fn unregister(&self, interface: &InterfaceName, sink: &Weak<dyn InterfaceEventSink>);
    /// Cancels every subscription of `sink`.
    fn unregister_all(&self, sink: &Weak<dyn InterfaceEventSink>);
}

struct Watch {
    interface: InterfaceName,
    sink: Weak<dyn InterfaceEventSink>,
}

/// Interface monitor backed by `getifaddrs`, with an in-process subscriber list.
///
/// Whatever watches the OS for address changes (a netlink or routing socket reader, typically)
/// reports them through [`publish`](Self::publish).
#[derive(Default)]
pub struct LinkRegistry {
    watches: Mutex<Vec<Watch>>,
}
impl LinkRegistry {
    /// Creates a registry with no subscribers.
    pub fn new() -> Self { Self::default() }

    /// The process-wide registry used by [`SocketMultiplexer::new`](crate::SocketMultiplexer::new).
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<LinkRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(LinkRegistry::new())))
    }

    /// Delivers `event` to every live subscriber of its interface.
    ///
    /// Subscribers are invoked after the subscriber list is unlocked, so they may register and
    /// unregister freely from within the callback.
    pub fn publish(&self, event: &InterfaceEvent) {
        let sinks = {
            let mut watches = self.watches.lock_unpoisoned();
            watches.retain(|w| w.sink.strong_count() > 0);
            watches
                .iter()
                .filter(|w| &w.interface == event.interface())
                .filter_map(|w| w.sink.upgrade())
                .collect::<Vec<_>>()
        };
        tracing::debug!(?event, subscribers = sinks.len(), "publishing interface event");
        for sink in sinks {
            sink.on_interface_event(event);
        }
    }

    /// Number of live subscriptions across all interfaces.
    pub fn subscriptions(&self) -> usize {
        self.watches.lock_unpoisoned().iter().filter(|w| w.sink.strong_count() > 0).count()
    }
}
impl InterfaceMonitor for LinkRegistry {
    fn addresses(&self, interface: &InterfaceName) -> io::Result<Vec<InterfaceAddress>> {
        let addrs = c_wrappers::interface_addresses(interface.as_str())?
            .into_iter()
            .map(|a| InterfaceAddress { ip: a.ip, scope_id: a.scope_id, broadcast: a.broadcast })
            .collect();
        Ok(addrs)
    }
    fn register(&self, interface: &InterfaceName, sink: Weak<dyn InterfaceEventSink>) {
        let mut watches = self.watches.lock_unpoisoned();
        let dup = watches.iter().any(|w| &w.interface == interface && w.sink.ptr_eq(&sink));
        if !dup {
            watches.push(Watch { interface: interface.clone(), sink });
        }
    }
    fn unregister(&self, interface: &InterfaceName, sink: &Weak<dyn InterfaceEventSink>) {
        self.watches
            .lock_unpoisoned()
            .retain(|w| !(&w.interface == interface && w.sink.ptr_eq(sink)));
    }
    fn unregister_all(&self, sink: &Weak<dyn InterfaceEventSink>) {
        self.watches.lock_unpoisoned().retain(|w| !w.sink.ptr_eq(sink));
    }
}
impl Debug for LinkRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let watches = self.watches.lock_unpoisoned();
        f.debug_struct("LinkRegistry")
            .field("watched", &watches.iter().map(|w| &w.interface).collect::<Vec<_>>())
            .finish()
    }
}
