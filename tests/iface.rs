use {
    super::util::*,
    crate::{
        InterfaceAddress, InterfaceEvent, InterfaceEventSink, InterfaceMonitor, InterfaceName,
        LinkRegistry,
    },
    color_eyre::eyre::ensure,
    std::{
        net::{IpAddr, Ipv4Addr},
        sync::{
            atomic::{AtomicUsize, Ordering::SeqCst},
            Arc, Weak,
        },
    },
};

#[derive(Default)]
struct Counter(AtomicUsize);
impl InterfaceEventSink for Counter {
    fn on_interface_event(&self, _: &InterfaceEvent) { self.0.fetch_add(1, SeqCst); }
}

fn added(interface: &str) -> InterfaceEvent {
    InterfaceEvent::AddressAdded {
        interface: interface.into(),
        address: InterfaceAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    }
}

#[test]
fn registry_routes_by_interface() -> TestResult {
    let registry = LinkRegistry::new();
    let counter = Arc::new(Counter::default());
    let sink: Weak<dyn InterfaceEventSink> = {
        let weak: Weak<Counter> = Arc::downgrade(&counter);
        weak
    };
    let eth0 = InterfaceName::from("eth0");
    registry.register(&eth0, sink.clone());
    registry.register(&eth0, sink.clone());
    ensure_eq!(registry.subscriptions(), 1, "duplicate registration kept");

    registry.publish(&added("eth0"));
    registry.publish(&added("wlan0"));
    ensure_eq!(counter.0.load(SeqCst), 1);

    registry.unregister(&eth0, &sink);
    registry.publish(&added("eth0"));
    ensure_eq!(counter.0.load(SeqCst), 1, "event delivered after unregister");
    Ok(())
}

#[test]
fn registry_forgets_dropped_sinks() -> TestResult {
    let registry = LinkRegistry::new();
    let counter = Arc::new(Counter::default());
    let weak: Weak<Counter> = Arc::downgrade(&counter);
    registry.register(&"eth0".into(), weak.clone());
    registry.register(&"eth1".into(), weak);
    ensure_eq!(registry.subscriptions(), 2);
    drop(counter);
    ensure_eq!(registry.subscriptions(), 0);
    registry.publish(&added("eth0"));
    Ok(())
}

#[test]
fn event_accessors() -> TestResult {
    let ev = added("eth0");
    ensure_eq!(ev.interface().as_str(), "eth0");
    ensure!(!ev.address().broadcast, "host address flagged as broadcast");
    ensure!(InterfaceName::from("").is_empty(), "empty name not empty");
    ensure_eq!(InterfaceName::from("sockmux-none0").index(), None);
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
#[test]
fn loopback_addresses_are_listed() -> TestResult {
    let addrs = LinkRegistry::new().addresses(&"lo".into())?;
    ensure!(
        addrs.iter().any(|a| a.ip == IpAddr::V4(Ipv4Addr::LOCALHOST)),
        "127.0.0.1 missing from loopback addresses {addrs:?}"
    );
    let phantom = LinkRegistry::new().addresses(&"sockmux-none0".into())?;
    ensure!(phantom.is_empty(), "addresses listed for a missing interface: {phantom:?}");
    Ok(())
}
