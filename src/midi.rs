//! MIDI router: one input port, hot-plugged sources, verbatim forwarding.
//!
//! An explicitly constructed, injectable router instance — no process-wide
//! singleton. The platform sits behind [`MidiBackend`], so hot-plug handling
//! and forwarding are testable with a fake backend; the real backend wraps
//! `midir`. Packets are forwarded untouched to whichever event sink the
//! graph manager registered last; with none registered they are dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use midir::{Ignore, MidiInput, MidiInputConnection};
use tracing::{error, info, warn};

use crate::error::MidiError;
use crate::event::UmpPacket;
use crate::processor::SharedEventSink;

/// One discoverable MIDI source endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiSourceInfo {
    pub id: String,
    pub name: String,
}

/// Hot-plug notifications consumed by the router.
#[derive(Debug, Clone)]
pub enum HotplugEvent {
    SourceAdded(MidiSourceInfo),
    SourceRemoved(String),
}

/// Invoked on the delivery thread for every incoming packet.
pub type PacketForwarder = Arc<dyn Fn(UmpPacket) + Send + Sync>;

/// Platform seam under the router.
pub trait MidiBackend: Send {
    /// Creates the input client/port pair. Called at most once per router.
    fn create_port(&mut self) -> Result<(), MidiError>;

    /// Currently available sources.
    fn sources(&self) -> Result<Vec<MidiSourceInfo>, MidiError>;

    /// Connects `source` to the port, delivering its packets to `forward`.
    fn connect(&mut self, source: &MidiSourceInfo, forward: PacketForwarder)
        -> Result<(), MidiError>;

    fn disconnect(&mut self, id: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    NotStarted,
    Ready,
    Failed,
}

/// Routes external MIDI into the installed unit's event sink.
pub struct MidiRouter<B: MidiBackend> {
    backend: B,
    connected: BTreeMap<String, MidiSourceInfo>,
    sink: SharedEventSink,
    init: InitState,
}

impl<B: MidiBackend> MidiRouter<B> {
    pub fn new(backend: B, sink: SharedEventSink) -> Self {
        Self {
            backend,
            connected: BTreeMap::new(),
            sink,
            init: InitState::NotStarted,
        }
    }

    fn forwarder(&self) -> PacketForwarder {
        let sink = self.sink.clone();
        // Delivery path: one atomic load plus a lock-free push. A full queue
        // or an absent sink drops the packet rather than blocking here.
        Arc::new(move |packet| {
            if let Some(queue) = &*sink.load() {
                let _ = queue.push(packet);
            }
        })
    }

    /// Creates the client/port once and connects every available source.
    /// Idempotent; a creation failure is reported and not silently retried.
    pub fn initialize(&mut self) -> Result<(), MidiError> {
        match self.init {
            InitState::Ready => return Ok(()),
            InitState::Failed => {
                return Err(MidiError::ClientCreate(
                    "MIDI input port creation already failed".into(),
                ))
            }
            InitState::NotStarted => {}
        }
        if let Err(e) = self.backend.create_port() {
            self.init = InitState::Failed;
            error!("could not create MIDI input port: {e}");
            return Err(e);
        }
        self.init = InitState::Ready;

        match self.backend.sources() {
            Ok(sources) => {
                for source in sources {
                    self.connect_source(source);
                }
            }
            // Enumeration hiccups are transient; the next poll retries.
            Err(e) => warn!("could not enumerate MIDI sources: {e}"),
        }
        Ok(())
    }

    fn connect_source(&mut self, source: MidiSourceInfo) {
        if self.connected.contains_key(&source.id) {
            return;
        }
        let forward = self.forwarder();
        match self.backend.connect(&source, forward) {
            Ok(()) => {
                info!(name = %source.name, "connected MIDI source");
                self.connected.insert(source.id.clone(), source);
            }
            // Keep routing the remaining sources.
            Err(e) => warn!(name = %source.name, "failed to connect MIDI source: {e}"),
        }
    }

    /// Applies one hot-plug notification.
    pub fn handle_hotplug(&mut self, event: HotplugEvent) {
        match event {
            HotplugEvent::SourceAdded(info) => self.connect_source(info),
            HotplugEvent::SourceRemoved(id) => {
                if let Some(info) = self.connected.remove(&id) {
                    self.backend.disconnect(&id);
                    info!(name = %info.name, "disconnected MIDI source");
                }
            }
        }
    }

    /// Diffs the backend's source list against the connected set and applies
    /// the difference as hot-plug events. One call is one notification cycle.
    pub fn poll(&mut self) {
        let sources = match self.backend.sources() {
            Ok(sources) => sources,
            Err(e) => {
                warn!("could not enumerate MIDI sources: {e}");
                return;
            }
        };
        let removed: Vec<String> = self
            .connected
            .keys()
            .filter(|id| !sources.iter().any(|s| s.id == **id))
            .cloned()
            .collect();
        for id in removed {
            self.handle_hotplug(HotplugEvent::SourceRemoved(id));
        }
        for source in sources {
            if !self.connected.contains_key(&source.id) {
                self.handle_hotplug(HotplugEvent::SourceAdded(source));
            }
        }
    }

    /// Snapshot of the connected source set.
    pub fn connected_sources(&self) -> Vec<MidiSourceInfo> {
        self.connected.values().cloned().collect()
    }
}

/// `midir`-based backend over the platform MIDI system.
pub struct MidirBackend {
    client_name: String,
    connections: HashMap<String, MidiInputConnection<()>>,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            connections: HashMap::new(),
        }
    }

    fn open_input(&self) -> Result<MidiInput, MidiError> {
        let mut input = MidiInput::new(&self.client_name)
            .map_err(|e| MidiError::ClientCreate(e.to_string()))?;
        // Sysex and timing clutter is not forwarded.
        input.ignore(Ignore::Sysex | Ignore::Time);
        Ok(input)
    }
}

impl MidiBackend for MidirBackend {
    fn create_port(&mut self) -> Result<(), MidiError> {
        self.open_input().map(|_| ())
    }

    fn sources(&self) -> Result<Vec<MidiSourceInfo>, MidiError> {
        let input = self
            .open_input()
            .map_err(|e| MidiError::Enumerate(e.to_string()))?;
        Ok(input
            .ports()
            .iter()
            .filter_map(|port| {
                input
                    .port_name(port)
                    .ok()
                    .map(|name| MidiSourceInfo {
                        id: port.id(),
                        name,
                    })
            })
            .collect())
    }

    fn connect(
        &mut self,
        source: &MidiSourceInfo,
        forward: PacketForwarder,
    ) -> Result<(), MidiError> {
        let input = self.open_input()?;
        let port = input
            .ports()
            .into_iter()
            .find(|p| p.id() == source.id)
            .ok_or_else(|| MidiError::Connect {
                name: source.name.clone(),
                reason: "port disappeared before connect".into(),
            })?;
        let connection = input
            .connect(
                &port,
                "patchbay-in",
                move |_timestamp, bytes, _| {
                    if let Some(packet) = UmpPacket::from_midi1(bytes) {
                        forward(packet);
                    }
                },
                (),
            )
            .map_err(|e| MidiError::Connect {
                name: source.name.clone(),
                reason: e.to_string(),
            })?;
        self.connections.insert(source.id.clone(), connection);
        Ok(())
    }

    fn disconnect(&mut self, id: &str) {
        if let Some(connection) = self.connections.remove(id) {
            connection.close();
        }
    }
}

/// Runs a router on its own service thread, synthesizing hot-plug events by
/// polling the source list.
pub struct MidiService {
    shutdown: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MidiService {
    pub fn spawn<B: MidiBackend + 'static>(
        mut router: MidiRouter<B>,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown, shutdown_rx) = bounded(1);
        let handle = thread::spawn(move || {
            if let Err(e) = router.initialize() {
                error!("MIDI router unavailable: {e}");
                return;
            }
            loop {
                match shutdown_rx.recv_timeout(poll_interval) {
                    Err(RecvTimeoutError::Timeout) => router.poll(),
                    _ => break,
                }
            }
        });
        Self {
            shutdown,
            handle: Some(handle),
        }
    }
}

impl Drop for MidiService {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::EventQueue;
    use arc_swap::ArcSwapOption;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Scriptable in-memory backend.
    #[derive(Clone, Default)]
    struct FakeBackend {
        sources: Arc<Mutex<Vec<MidiSourceInfo>>>,
        forwarders: Arc<Mutex<HashMap<String, PacketForwarder>>>,
        failing: Arc<Mutex<HashSet<String>>>,
        fail_port: bool,
        port_creations: Arc<Mutex<u32>>,
    }

    impl FakeBackend {
        fn with_sources(names: &[&str]) -> Self {
            let backend = Self::default();
            *backend.sources.lock().unwrap() = names
                .iter()
                .map(|n| MidiSourceInfo {
                    id: format!("id-{n}"),
                    name: n.to_string(),
                })
                .collect();
            backend
        }

        fn add_source(&self, name: &str) {
            self.sources.lock().unwrap().push(MidiSourceInfo {
                id: format!("id-{name}"),
                name: name.to_string(),
            });
        }

        fn remove_source(&self, name: &str) {
            let id = format!("id-{name}");
            self.sources.lock().unwrap().retain(|s| s.id != id);
        }
    }

    impl MidiBackend for FakeBackend {
        fn create_port(&mut self) -> Result<(), MidiError> {
            *self.port_creations.lock().unwrap() += 1;
            if self.fail_port {
                return Err(MidiError::ClientCreate("no MIDI services".into()));
            }
            Ok(())
        }

        fn sources(&self) -> Result<Vec<MidiSourceInfo>, MidiError> {
            Ok(self.sources.lock().unwrap().clone())
        }

        fn connect(
            &mut self,
            source: &MidiSourceInfo,
            forward: PacketForwarder,
        ) -> Result<(), MidiError> {
            if self.failing.lock().unwrap().contains(&source.id) {
                return Err(MidiError::Connect {
                    name: source.name.clone(),
                    reason: "resource busy".into(),
                });
            }
            self.forwarders
                .lock()
                .unwrap()
                .insert(source.id.clone(), forward);
            Ok(())
        }

        fn disconnect(&mut self, id: &str) {
            self.forwarders.lock().unwrap().remove(id);
        }
    }

    fn sink() -> SharedEventSink {
        Arc::new(ArcSwapOption::empty())
    }

    fn names(router: &MidiRouter<FakeBackend>) -> Vec<String> {
        router
            .connected_sources()
            .into_iter()
            .map(|s| s.name)
            .collect()
    }

    #[test]
    fn startup_sources_are_all_connected() {
        let backend = FakeBackend::with_sources(&["kbd", "pads"]);
        let mut router = MidiRouter::new(backend, sink());
        router.initialize().unwrap();
        assert_eq!(names(&router), vec!["kbd", "pads"]);
    }

    #[test]
    fn hotplug_add_and_remove_touch_only_their_source() {
        let backend = FakeBackend::with_sources(&["kbd", "pads"]);
        let mut router = MidiRouter::new(backend.clone(), sink());
        router.initialize().unwrap();

        // A source plugged in later connects within one poll cycle.
        backend.add_source("wheel");
        router.poll();
        assert_eq!(names(&router), vec!["kbd", "pads", "wheel"]);

        // Removing one disconnects only that one.
        backend.remove_source("pads");
        router.poll();
        assert_eq!(names(&router), vec!["kbd", "wheel"]);
        assert!(backend.forwarders.lock().unwrap().contains_key("id-kbd"));
        assert!(!backend.forwarders.lock().unwrap().contains_key("id-pads"));
    }

    #[test]
    fn connect_failure_is_tolerated() {
        let backend = FakeBackend::with_sources(&["kbd", "broken", "pads"]);
        backend.failing.lock().unwrap().insert("id-broken".into());
        let mut router = MidiRouter::new(backend.clone(), sink());
        router.initialize().unwrap();
        // The failing source is skipped; the router keeps the others.
        assert_eq!(names(&router), vec!["kbd", "pads"]);

        // Once the source recovers, the next cycle picks it up.
        backend.failing.lock().unwrap().clear();
        router.poll();
        assert_eq!(names(&router), vec!["broken", "kbd", "pads"]);
    }

    #[test]
    fn port_creation_failure_is_reported_once_not_retried() {
        let backend = FakeBackend {
            fail_port: true,
            ..FakeBackend::default()
        };
        let creations = backend.port_creations.clone();
        let mut router = MidiRouter::new(backend, sink());
        assert!(router.initialize().is_err());
        assert!(router.initialize().is_err());
        assert_eq!(*creations.lock().unwrap(), 1);
    }

    #[test]
    fn initialize_is_idempotent() {
        let backend = FakeBackend::with_sources(&["kbd"]);
        let creations = backend.port_creations.clone();
        let mut router = MidiRouter::new(backend, sink());
        router.initialize().unwrap();
        router.initialize().unwrap();
        assert_eq!(*creations.lock().unwrap(), 1);
    }

    #[test]
    fn packets_are_forwarded_verbatim_or_dropped() {
        let backend = FakeBackend::with_sources(&["kbd"]);
        let sink = sink();
        let mut router = MidiRouter::new(backend.clone(), sink.clone());
        router.initialize().unwrap();

        let forward = backend.forwarders.lock().unwrap()["id-kbd"].clone();
        let packet = UmpPacket::from_midi1(&[0x90, 60, 100]).unwrap();

        // No sink registered: the packet is dropped.
        forward(packet);

        // Sink registered: forwarded untouched.
        let queue = Arc::new(EventQueue::new(8));
        sink.store(Some(queue.clone()));
        forward(packet);
        assert_eq!(queue.pop(), Some(packet));
        assert!(queue.pop().is_none());

        // Sink re-pointed (rewire): the old queue stays empty.
        let replacement = Arc::new(EventQueue::new(8));
        sink.store(Some(replacement.clone()));
        forward(packet);
        assert!(queue.pop().is_none());
        assert_eq!(replacement.pop(), Some(packet));
    }
}
