use {
    crate::{
        InterfaceAddress, InterfaceEvent, InterfaceEventSink, InterfaceMonitor, InterfaceName,
        LinkRegistry,
    },
    std::{
        io,
        net::IpAddr,
        sync::{Mutex, Weak},
    },
};

/// Interface monitor with a fixed, test-controlled address list. Subscriptions are kept in a real
/// [`LinkRegistry`] so that [`publish`](Self::publish) behaves like the stock monitor.
#[derive(Debug, Default)]
pub struct StaticMonitor {
    addresses: Mutex<Vec<InterfaceAddress>>,
    registry: LinkRegistry,
}
impl StaticMonitor {
    pub fn new(ips: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            addresses: Mutex::new(ips.into_iter().map(InterfaceAddress::new).collect()),
            registry: LinkRegistry::new(),
        }
    }
    pub fn empty() -> Self { Self::default() }
    pub fn set_addresses(&self, addresses: Vec<InterfaceAddress>) {
        *self.addresses.lock().unwrap() = addresses;
    }
    pub fn publish(&self, event: &InterfaceEvent) { self.registry.publish(event) }
    pub fn subscriptions(&self) -> usize { self.registry.subscriptions() }
}
impl InterfaceMonitor for StaticMonitor {
    fn addresses(&self, _: &InterfaceName) -> io::Result<Vec<InterfaceAddress>> {
        Ok(self.addresses.lock().unwrap().clone())
    }
    fn register(&self, interface: &InterfaceName, sink: Weak<dyn InterfaceEventSink>) {
        self.registry.register(interface, sink)
    }
    fn unregister(&self, interface: &InterfaceName, sink: &Weak<dyn InterfaceEventSink>) {
        self.registry.unregister(interface, sink)
    }
    fn unregister_all(&self, sink: &Weak<dyn InterfaceEventSink>) {
        self.registry.unregister_all(sink)
    }
}
