//! The processing-unit trait and everything a unit carries with it into the
//! graph: parameter map, event queue, and control surface.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam_queue::ArrayQueue;

use crate::component::Capability;
use crate::error::ComponentError;
use crate::event::UmpPacket;

/// Per-block render context.
#[derive(Debug, Clone, Copy)]
pub struct BlockLayout {
    pub channels: usize,
    pub sample_rate: u32,
}

/// A hot-swappable audio processing unit.
///
/// `render` runs on the realtime audio thread and must not block or
/// allocate. Effect-like units receive the source feed as `input`;
/// free-running units are called with `input == None` and render
/// autonomously.
pub trait ProcessingUnit: Send {
    fn name(&self) -> &str;

    /// Handles one event from the unit's queue. Called on the audio thread
    /// immediately before `render`.
    fn handle_event(&mut self, packet: &UmpPacket);

    fn render(&mut self, input: Option<&[f32]>, output: &mut [f32], layout: BlockLayout);

    /// The unit's parameter tree, shared with control surfaces.
    fn parameters(&self) -> ParameterMap;

    /// Units may supply their own control surface; the host substitutes a
    /// generic one when this returns `None`.
    fn control_surface(&self) -> Option<ControlSurface> {
        None
    }

    /// Names of MIDI output streams the unit exposes, if any. The host
    /// attaches a discarding sink for these.
    fn midi_output_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Drops transient state (held voices, filter memory).
    fn reset(&mut self) {}
}

/// Static description of one numeric control.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    /// Stable string identifier, unique within one unit's map.
    pub id: &'static str,
    pub name: &'static str,
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

/// Lock-free f32 cell shared between control surfaces and the render thread.
#[derive(Debug, Clone)]
struct ParamCell(Arc<AtomicU32>);

impl ParamCell {
    fn new(value: f32) -> Self {
        Self(Arc::new(AtomicU32::new(value.to_bits())))
    }

    fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// One parameter: spec plus live value.
#[derive(Debug, Clone)]
pub struct ParamHandle {
    spec: ParamSpec,
    cell: ParamCell,
}

impl ParamHandle {
    pub fn new(spec: ParamSpec) -> Self {
        Self {
            cell: ParamCell::new(spec.default),
            spec,
        }
    }

    pub fn spec(&self) -> &ParamSpec {
        &self.spec
    }

    pub fn value(&self) -> f32 {
        self.cell.get()
    }

    /// Sets the value, clamped to the spec's range.
    pub fn set(&self, value: f32) {
        self.cell.set(value.clamp(self.spec.min, self.spec.max));
    }
}

/// Explicit typed mapping from stable string identifiers to parameter
/// handles, validated when the tree is built rather than at access time.
#[derive(Debug, Clone)]
pub struct ParameterMap {
    params: Arc<Vec<ParamHandle>>,
}

impl ParameterMap {
    /// Builds the map, rejecting duplicate ids.
    pub fn new(params: Vec<ParamHandle>) -> Result<Self, ComponentError> {
        for (i, a) in params.iter().enumerate() {
            if params[..i].iter().any(|b| b.spec.id == a.spec.id) {
                return Err(ComponentError::DuplicateParameter {
                    id: a.spec.id.to_string(),
                });
            }
        }
        Ok(Self {
            params: Arc::new(params),
        })
    }

    pub fn empty() -> Self {
        Self {
            params: Arc::new(Vec::new()),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ParamHandle> {
        self.params.iter().find(|p| p.spec.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamHandle> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// The optional UI handle a unit may supply, or the generic fallback built
/// from its parameter map.
#[derive(Debug, Clone)]
pub struct ControlSurface {
    pub title: String,
    pub params: ParameterMap,
    /// False when this is the generic substitute surface.
    pub provided_by_unit: bool,
}

impl ControlSurface {
    pub fn generic(title: impl Into<String>, params: ParameterMap) -> Self {
        Self {
            title: title.into(),
            params,
            provided_by_unit: false,
        }
    }
}

/// Bounded lock-free queue carrying UMP packets from the MIDI delivery
/// context to the render thread.
pub struct EventQueue {
    packets: ArrayQueue<UmpPacket>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            packets: ArrayQueue::new(capacity),
        }
    }

    /// Pushes a packet; returns false when the queue is full and the packet
    /// was dropped.
    pub fn push(&self, packet: UmpPacket) -> bool {
        self.packets.push(packet).is_ok()
    }

    pub fn pop(&self) -> Option<UmpPacket> {
        self.packets.pop()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// The event sink the MIDI router forwards into. Re-pointed atomically by
/// rewire; `None` while no unit is installed, in which case packets are
/// dropped.
pub type SharedEventSink = Arc<ArcSwapOption<EventQueue>>;

/// Queue depth per installed unit. Generous for burst traffic; overflow
/// drops packets rather than blocking the delivery thread.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// A unit plus the wiring metadata the graph needs to install it.
pub struct InstalledUnit {
    pub(crate) unit: Box<dyn ProcessingUnit>,
    pub capability: Capability,
    pub(crate) events: Arc<EventQueue>,
}

impl InstalledUnit {
    pub fn new(unit: Box<dyn ProcessingUnit>, capability: Capability) -> Self {
        Self {
            unit,
            capability,
            events: Arc::new(EventQueue::new(EVENT_QUEUE_CAPACITY)),
        }
    }

    /// The queue the MIDI router should forward into while this unit is
    /// installed.
    pub fn event_queue(&self) -> Arc<EventQueue> {
        self.events.clone()
    }

    /// Drains pending events into the unit. Audio-thread side.
    pub(crate) fn drain_events(&mut self) {
        while let Some(packet) = self.events.pop() {
            self.unit.handle_event(&packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_map_rejects_duplicate_ids() {
        let spec = ParamSpec {
            id: "output-gain",
            name: "Output Gain",
            min: 0.0,
            max: 1.0,
            default: 0.25,
        };
        let err = ParameterMap::new(vec![ParamHandle::new(spec), ParamHandle::new(spec)]);
        assert!(matches!(
            err,
            Err(ComponentError::DuplicateParameter { .. })
        ));
    }

    #[test]
    fn param_set_clamps_to_range() {
        let handle = ParamHandle::new(ParamSpec {
            id: "output-gain",
            name: "Output Gain",
            min: 0.0,
            max: 1.0,
            default: 0.25,
        });
        assert!((handle.value() - 0.25).abs() < f32::EPSILON);
        handle.set(2.0);
        assert!((handle.value() - 1.0).abs() < f32::EPSILON);
        handle.set(-1.0);
        assert!(handle.value().abs() < f32::EPSILON);
    }

    #[test]
    fn event_queue_drops_on_overflow() {
        let queue = EventQueue::new(2);
        let pkt = UmpPacket::from_midi1(&[0x90, 60, 100]).unwrap();
        assert!(queue.push(pkt));
        assert!(queue.push(pkt));
        assert!(!queue.push(pkt));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(pkt));
    }
}
