//! The socket multiplexer: a dynamic set of bindings behind one readiness wait.
//!
//! # Threading
//! Any number of threads may mutate a [`SocketMultiplexer`] (bind, unbind, set options, deliver
//! interface events) while one thread is blocked in [`wait`](SocketMultiplexer::wait). The binding
//! set is guarded by a lock that is never held across the blocking `select` call. Removals are not
//! performed by the thread requesting them: they are queued and a byte is written to the
//! multiplexer's self-pipe, and the waiting thread, which always has the read end of that pipe in
//! its wait-set, wakes up and performs the removal itself. This keeps a descriptor from being
//! closed (and its number reused) while another thread is inspecting it.
//!
//! # Removal pacing
//! Each wake-up through the self-pipe applies at most one queued removal. A burst of N removals is
//! worked off over N wake-ups; since every enqueue writes its own wake-up byte, they all complete
//! within the same `wait` call unless an interrupt ends it first.

use {
    crate::{
        binding::{AddressFamily, BindSpec, BindTarget, BindingIdentity, SocketBinding, SocketType},
        error::{Error, Result},
        iface::{
            InterfaceAddress, InterfaceEvent, InterfaceEventSink, InterfaceMonitor, InterfaceName,
            LinkRegistry,
        },
        interrupt::InterruptPipe,
        options::SocketOptions,
        os::unix::{c_wrappers, unixprelude::*, SockAddr},
        select::{self, FdSet},
        LockExt,
    },
    std::{
        collections::{HashMap, VecDeque},
        fmt::{self, Debug, Formatter},
        io,
        net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6},
        path::PathBuf,
        sync::{
            atomic::{AtomicBool, Ordering::SeqCst},
            Arc, Mutex, Weak,
        },
        time::Duration,
    },
};

/// A set of sockets that is waited on as one.
///
/// Dropping the multiplexer cancels its interface subscriptions and closes every binding.
pub struct SocketMultiplexer {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    pending: Mutex<VecDeque<BindingIdentity>>,
    interrupt_requested: AtomicBool,
    pipe: InterruptPipe,
    monitor: Arc<dyn InterfaceMonitor>,
    callback: Mutex<Option<Arc<dyn InterfaceEventSink>>>,
}

#[derive(Default)]
struct State {
    bindings: Vec<SocketBinding>,
    options: SocketOptions,
    backlog: Option<c_int>,
    ports: HashMap<InterfaceName, u16>,
    types: HashMap<InterfaceName, SocketType>,
}

impl SocketMultiplexer {
    /// Creates an empty multiplexer subscribed to the process-wide [`LinkRegistry`].
    pub fn new() -> Result<Self> { Self::with_monitor(LinkRegistry::global()) }

    /// Creates an empty multiplexer that learns about interfaces from `monitor`.
    ///
    /// Fails only if the self-pipe cannot be created.
    pub fn with_monitor(monitor: Arc<dyn InterfaceMonitor>) -> Result<Self> {
        let shared = Shared {
            state: Mutex::new(State::default()),
            pending: Mutex::new(VecDeque::new()),
            interrupt_requested: AtomicBool::new(false),
            pipe: InterruptPipe::new()?,
            monitor,
            callback: Mutex::new(None),
        };
        Ok(Self { shared: Arc::new(shared) })
    }

    fn sink(&self) -> Weak<dyn InterfaceEventSink> {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        weak
    }

    /// Creates a binding from `spec` and adds it to the set, returning its descriptor.
    ///
    /// Every option in the global mask is applied to the new socket, the pre-bind group before
    /// the OS bind call and the post-bind group after it. If the multiplexer is in listening mode,
    /// stream sockets are put into listening mode with the stored backlog as well. The binding
    /// only becomes visible to other operations once all of that has succeeded; on failure it is
    /// closed and the set is left as it was.
    ///
    /// A thread that is already blocked in [`wait`](Self::wait) only starts watching the new
    /// descriptor after its next wake-up; call [`refresh`](Self::refresh) to force one.
    pub fn bind(&self, spec: BindSpec) -> Result<RawFd> { self.shared.bind(spec) }

    /// Adds an externally created socket. It is never bound, but global options still apply.
    #[inline]
    pub fn adopt(&self, fd: OwnedFd) -> Result<RawFd> { self.bind(BindSpec::handle(fd)) }

    /// Binds `ip:port`. Port 0 lets the OS pick one.
    #[inline]
    pub fn bind_address(&self, ip: IpAddr, port: u16, socket_type: SocketType) -> Result<RawFd> {
        self.bind(BindSpec::address(ip, port, socket_type))
    }

    /// Binds the IPv4 wildcard address at `port`.
    #[inline]
    pub fn bind_port(&self, port: u16, socket_type: SocketType) -> Result<RawFd> {
        self.bind(BindSpec::port(port, socket_type))
    }

    /// Binds a Unix-domain socket at `path`, replacing a stale socket file if there is one.
    #[inline]
    pub fn bind_path(&self, path: impl Into<PathBuf>, socket_type: SocketType) -> Result<RawFd> {
        self.bind(BindSpec::path(path, socket_type))
    }

    /// Binds every non-broadcast address of `interface` at `port` and keeps doing so as
    /// addresses come and go.
    ///
    /// The port and socket type are remembered for the interface, and the multiplexer subscribes
    /// to its monitor for events about it, so addresses that appear later are bound automatically
    /// and ones that disappear are unbound. An empty interface name means the wildcard address,
    /// as with [`bind_port`](Self::bind_port).
    ///
    /// Stops at the first address that fails to bind; addresses bound before it stay bound.
    pub fn bind_interface(
        &self,
        interface: &InterfaceName,
        port: u16,
        socket_type: SocketType,
    ) -> Result<Vec<RawFd>> {
        if interface.is_empty() {
            return self.bind_port(port, socket_type).map(|fd| vec![fd]);
        }
        {
            let mut state = self.shared.state.lock_unpoisoned();
            state.ports.insert(interface.clone(), port);
            state.types.insert(interface.clone(), socket_type);
        }
        self.shared.monitor.register(interface, self.sink());

        let addresses = self.shared.monitor.addresses(interface).map_err(Error::resource)?;
        let mut fds = Vec::with_capacity(addresses.len());
        for address in addresses.iter().filter(|a| !a.broadcast) {
            fds.push(self.bind(interface_spec(interface, address, port, socket_type))?);
        }
        tracing::debug!(%interface, port, bound = fds.len(), "bound interface addresses");
        Ok(fds)
    }

    /// Schedules every binding at `ip:port` for removal.
    ///
    /// Nothing is closed right away: the removals are carried out by the thread in
    /// [`wait`](Self::wait), one per wake-up.
    pub fn unbind(&self, ip: IpAddr, port: u16) {
        self.shared.unbind(|b| b.address() == Some(ip) && b.port() == port);
    }

    /// Schedules every binding at the wildcard IPv4 address and `port` for removal.
    #[inline]
    pub fn unbind_port(&self, port: u16) { self.unbind(Ipv4Addr::UNSPECIFIED.into(), port) }

    /// Schedules the binding at `path` for removal.
    pub fn unbind_path(&self, path: impl AsRef<std::path::Path>) {
        let path = path.as_ref();
        self.shared.unbind(|b| b.path() == Some(path));
    }

    /// Stops watching `interface` and schedules the removal of the bindings for each of its
    /// current addresses at `port`.
    pub fn unbind_interface(&self, interface: &InterfaceName, port: u16) -> Result<()> {
        if interface.is_empty() {
            self.unbind_port(port);
            return Ok(());
        }
        self.shared.monitor.unregister(interface, &self.sink());
        {
            let mut state = self.shared.state.lock_unpoisoned();
            state.ports.remove(interface);
            state.types.remove(interface);
        }
        let addresses = self.shared.monitor.addresses(interface).map_err(Error::resource)?;
        for address in addresses.iter().filter(|a| !a.broadcast) {
            self.unbind(address.ip, port);
        }
        Ok(())
    }

    /// Puts every stream binding into listening mode, now and for bindings added later.
    ///
    /// A failure only affects the binding it happened on; the others are still put into listening
    /// mode, and the first error is returned.
    pub fn listen(&self, backlog: c_int) -> Result<()> {
        let mut state = self.shared.state.lock_unpoisoned();
        state.backlog = Some(backlog);
        let mut first_err = None;
        for binding in listenable(&state.bindings) {
            if let Err(e) = binding.listen(backlog) {
                tracing::warn!(?binding, error = %e, "listen failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Adds `options` to the global mask and applies them to every binding.
    pub fn set(&self, options: SocketOptions) -> Result<()> {
        let mut state = self.shared.state.lock_unpoisoned();
        state.options |= options;
        first_error(state.bindings.iter().map(|b| b.set(options)))
    }

    /// Removes `options` from the global mask and clears them on every binding.
    pub fn unset(&self, options: SocketOptions) -> Result<()> {
        let mut state = self.shared.state.lock_unpoisoned();
        state.options.remove(options);
        first_error(state.bindings.iter().map(|b| b.unset(options)))
    }

    /// Closes and removes every binding, then interrupts a blocked [`wait`](Self::wait).
    ///
    /// Calling this on an already empty multiplexer is harmless.
    pub fn close(&self) {
        self.shared.close_all();
        self.interrupt();
    }

    /// Shuts down every binding without removing it, then interrupts a blocked
    /// [`wait`](Self::wait).
    pub fn shutdown(&self) {
        for binding in &self.shared.state.lock_unpoisoned().bindings {
            if let Err(e) = binding.shutdown() {
                tracing::debug!(?binding, error = %e, "shutdown failed");
            }
        }
        self.interrupt();
    }

    /// Makes the current (or next) [`wait`](Self::wait) fail with [`Error::Interrupted`].
    pub fn interrupt(&self) {
        self.shared.interrupt_requested.store(true, SeqCst);
        self.shared.pipe.signal();
    }

    /// Wakes up a blocked [`wait`](Self::wait) so that it rebuilds its wait-set, without making
    /// it return.
    #[inline]
    pub fn refresh(&self) { self.shared.pipe.signal() }

    /// Blocks until at least one binding is readable and returns the readable descriptors, in
    /// insertion order.
    ///
    /// Wake-ups through the self-pipe are handled internally: each one carries out at most one
    /// queued removal and re-applies listening mode, then the wait resumes unless an
    /// [`interrupt`](Self::interrupt) was requested. The timeout covers the whole call, across
    /// internal wake-ups.
    ///
    /// # Errors
    /// - [`Error::NoBindings`] immediately if there is nothing to wait on.
    /// - [`Error::Timeout`] if `timeout` runs out first. The binding set is left untouched.
    /// - [`Error::Interrupted`] once per call to [`interrupt`](Self::interrupt).
    /// - [`Error::Wait`] if `select` itself fails.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Vec<RawFd>> {
        let shared = &*self.shared;
        let pipe_fd = shared.pipe.read_fd();
        let mut remaining = timeout.map(select::timeval_from);
        loop {
            let mut set = FdSet::new();
            set.insert(pipe_fd).map_err(Error::Wait)?;
            {
                let state = shared.state.lock_unpoisoned();
                if state.bindings.is_empty() {
                    return Err(Error::NoBindings);
                }
                for fd in state.bindings.iter().filter_map(SocketBinding::raw_fd) {
                    set.insert(fd).map_err(Error::Wait)?;
                }
            }

            match select::select_read(&mut set, remaining.as_mut()) {
                Ok(0) => return Err(Error::Timeout),
                Ok(..) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Wait(e)),
            }

            if set.contains(pipe_fd) {
                tracing::trace!("unblocked by self-pipe");
                shared.pipe.drain_one();
                shared.apply_one_removal();
                shared.relisten();
                if shared.interrupt_requested.swap(false, SeqCst) {
                    return Err(Error::Interrupted);
                }
                continue;
            }

            let ready = shared
                .state
                .lock_unpoisoned()
                .bindings
                .iter()
                .filter_map(SocketBinding::raw_fd)
                .filter(|&fd| set.contains(fd))
                .collect::<Vec<_>>();
            if !ready.is_empty() {
                return Ok(ready);
            }
        }
    }

    /// Handles an interface event as if it had been delivered by the monitor.
    #[inline]
    pub fn on_interface_event(&self, event: &InterfaceEvent) {
        self.shared.on_interface_event(event)
    }

    /// Sets the observer that every interface event is forwarded to after it has been handled.
    /// `None` removes it.
    pub fn set_event_callback(&self, callback: Option<Arc<dyn InterfaceEventSink>>) {
        *self.shared.callback.lock_unpoisoned() = callback;
    }

    /// Descriptors of all bindings, in insertion order.
    pub fn handles(&self, family: AddressFamily) -> Vec<RawFd> {
        self.handles_where(|b| family.matches(b.family()))
    }

    /// Descriptors of the bindings created for addresses of `interface`.
    pub fn handles_on(&self, interface: &InterfaceName, family: AddressFamily) -> Vec<RawFd> {
        self.handles_where(|b| b.interface() == Some(interface) && family.matches(b.family()))
    }

    fn handles_where(&self, mut filter: impl FnMut(&SocketBinding) -> bool) -> Vec<RawFd> {
        let state = self.shared.state.lock_unpoisoned();
        state.bindings.iter().filter(|b| filter(b)).filter_map(SocketBinding::raw_fd).collect()
    }

    /// The descriptor of the oldest binding.
    pub fn first_handle(&self) -> Option<RawFd> {
        self.shared.state.lock_unpoisoned().bindings.first().and_then(SocketBinding::raw_fd)
    }

    /// Sends one datagram to `dest` through every binding of the same address family.
    ///
    /// Returns the outcome of the last send, or `Ok(0)` if no binding matched. Failures of the
    /// other sends are logged.
    pub fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        let family = AddressFamily::of(&dest.ip());
        let addr = SockAddr::from_ip(&dest);
        let state = self.shared.state.lock_unpoisoned();
        let mut last = Ok(0);
        for binding in state.bindings.iter().filter(|b| b.family() == family) {
            if let Err(e) = &last {
                tracing::debug!(%dest, error = %e, "datagram send failed");
            }
            last = binding.borrow_fd().and_then(|fd| c_wrappers::send_to(fd, buf, &addr));
        }
        last
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize { self.shared.state.lock_unpoisoned().bindings.len() }
    /// Whether there are no live bindings.
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    /// Number of removals queued but not yet carried out.
    pub fn pending_removals(&self) -> usize { self.shared.pending.lock_unpoisoned().len() }
    /// The global option mask.
    pub fn options(&self) -> SocketOptions { self.shared.state.lock_unpoisoned().options }
    /// The stored backlog, if the multiplexer is in listening mode.
    pub fn backlog(&self) -> Option<c_int> { self.shared.state.lock_unpoisoned().backlog }
}

impl Shared {
    fn bind(&self, spec: BindSpec) -> Result<RawFd> {
        let binding = SocketBinding::new(spec)?;
        let mut state = self.state.lock_unpoisoned();
        binding.set(state.options & SocketOptions::PRE_BIND)?;
        binding.bind()?;
        binding.set(state.options & SocketOptions::POST_BIND)?;
        if let Some(backlog) = state.backlog {
            if binding.socket_type() == SocketType::Stream {
                binding.listen(backlog)?;
            }
        }
        let fd = binding.borrow_fd().map_err(Error::resource)?.as_raw_fd();
        tracing::debug!(fd, ?binding, "binding added");
        state.bindings.push(binding);
        Ok(fd)
    }

    fn unbind(&self, mut matches: impl FnMut(&SocketBinding) -> bool) {
        let count = {
            // Queued under the state lock, so `close_all` never leaves an entry behind.
            let state = self.state.lock_unpoisoned();
            let doomed = state
                .bindings
                .iter()
                .filter(|b| matches(b))
                .map(|b| b.identity().clone())
                .collect::<Vec<_>>();
            let count = doomed.len();
            self.pending.lock_unpoisoned().extend(doomed);
            count
        };
        if count == 0 {
            tracing::trace!("unbind matched no bindings");
            return;
        }
        for _ in 0..count {
            self.pipe.signal();
        }
    }

    fn apply_one_removal(&self) {
        let Some(identity) = self.pending.lock_unpoisoned().pop_front() else { return };
        let mut state = self.state.lock_unpoisoned();
        if let Some(pos) = state.bindings.iter().position(|b| b.identity() == &identity) {
            let mut binding = state.bindings.remove(pos);
            binding.close();
        }
    }

    fn relisten(&self) {
        let state = self.state.lock_unpoisoned();
        let Some(backlog) = state.backlog else { return };
        for binding in listenable(&state.bindings) {
            if let Err(e) = binding.listen(backlog) {
                tracing::warn!(?binding, error = %e, "relisten failed");
            }
        }
    }

    /// Removes every binding along with every removal still queued for one.
    fn close_all(&self) {
        let bindings = {
            let mut state = self.state.lock_unpoisoned();
            let dropped = std::mem::take(&mut *self.pending.lock_unpoisoned());
            if !dropped.is_empty() {
                tracing::debug!(count = dropped.len(), "discarding queued removals");
            }
            std::mem::take(&mut state.bindings)
        };
        for mut binding in bindings {
            binding.close();
        }
    }

    fn watched(&self, interface: &InterfaceName) -> Option<(u16, SocketType)> {
        let state = self.state.lock_unpoisoned();
        let port = *state.ports.get(interface)?;
        Some((port, state.types.get(interface).copied().unwrap_or_default()))
    }
}

impl InterfaceEventSink for Shared {
    fn on_interface_event(&self, event: &InterfaceEvent) {
        let interface = event.interface();
        tracing::debug!(%interface, "updating bindings after interface event");

        if let Some((port, socket_type)) = self.watched(interface) {
            match event {
                InterfaceEvent::AddressAdded { address, .. } if !address.broadcast => {
                    tracing::debug!(ip = %address.ip, port, "dynamic bind");
                    let spec = interface_spec(interface, address, port, socket_type);
                    if let Err(e) = self.bind(spec) {
                        tracing::warn!(ip = %address.ip, port, error = %e, "dynamic bind failed");
                    }
                }
                InterfaceEvent::AddressRemoved { address, .. } if !address.broadcast => {
                    tracing::debug!(ip = %address.ip, port, "dynamic unbind");
                    let ip = address.ip;
                    self.unbind(|b| b.address() == Some(ip) && b.port() == port);
                }
                _ => {}
            }
        }

        let callback = self.callback.lock_unpoisoned().clone();
        if let Some(callback) = callback {
            callback.on_interface_event(event);
        }
        self.pipe.signal();
    }
}

impl Drop for SocketMultiplexer {
    fn drop(&mut self) {
        self.shared.monitor.unregister_all(&self.sink());
        self.shared.close_all();
    }
}

impl Debug for SocketMultiplexer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock_unpoisoned();
        f.debug_struct("SocketMultiplexer")
            .field("bindings", &state.bindings)
            .field("options", &state.options)
            .field("backlog", &state.backlog)
            .field("watched", &state.ports)
            .field("pipe", &self.shared.pipe)
            .finish_non_exhaustive()
    }
}

fn listenable(bindings: &[SocketBinding]) -> impl Iterator<Item = &SocketBinding> {
    bindings.iter().filter(|b| b.socket_type() == SocketType::Stream)
}

fn first_error(results: impl Iterator<Item = Result<()>>) -> Result<()> {
    let mut first = Ok(());
    for result in results {
        if let (Ok(()), Err(e)) = (&first, result) {
            first = Err(e);
        }
    }
    first
}

/// Bind request for an address that belongs to `interface`. Link-local IPv6 addresses are scoped
/// to the interface; everything else is bound like [`BindSpec::address`].
pub(crate) fn interface_spec(
    interface: &InterfaceName,
    address: &InterfaceAddress,
    port: u16,
    socket_type: SocketType,
) -> BindSpec {
    let spec = match address.ip {
        IpAddr::V6(v6) if is_link_local(&v6) => {
            let scope_id = match address.scope_id {
                0 => interface.index().unwrap_or(0),
                id => id,
            };
            let sa = SocketAddrV6::new(v6, port, 0, scope_id);
            BindSpec::new(BindTarget::AddressPort(sa.into()), socket_type)
        }
        ip => BindSpec::address(ip, port, socket_type),
    };
    spec.on_interface(interface.clone())
}

fn is_link_local(ip: &Ipv6Addr) -> bool {
    let [first, ..] = ip.segments();
    first & 0xffc0 == 0xfe80
}
