//! The fixed four-slot audio graph and the render chain the audio thread
//! walks.
//!
//! Topology is an explicit edge list over four node slots. The control side
//! mutates it (and the matching `RenderChain`) only through the engine's
//! gate; the audio thread never takes the gate — it try-locks the chain and
//! emits a single silent buffer if a rewire happens to be mid-flight.

use std::sync::Mutex;

use crate::player::SourcePlayer;
use crate::processor::{BlockLayout, InstalledUnit};

/// Stream format of one graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    /// The standard two-channel format at a given rate, used for autonomous
    /// units that receive no source feed.
    pub fn stereo(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 2,
        }
    }
}

/// The four fixed node slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeId {
    Source,
    Processor,
    Mixer,
    Output,
}

/// One directed connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub format: StreamFormat,
}

/// Control-side bookkeeping of the wired connections.
#[derive(Debug, Default)]
pub(crate) struct Topology {
    edges: Vec<Edge>,
}

impl Topology {
    /// Connects `from → to`, replacing any existing edge between the pair.
    pub fn connect(&mut self, from: NodeId, to: NodeId, format: StreamFormat) {
        self.edges.retain(|e| !(e.from == from && e.to == to));
        self.edges.push(Edge { from, to, format });
    }

    /// Removes every inbound edge of `to`.
    pub fn disconnect_input(&mut self, to: NodeId) {
        self.edges.retain(|e| e.to != to);
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.edges.clone()
    }

    /// Whether a `Source → … → Output` path exists. Holds whenever the graph
    /// is prepared and no rewire transaction is in flight.
    pub fn has_path_source_to_output(&self) -> bool {
        let mut node = NodeId::Source;
        for _ in 0..self.edges.len() + 1 {
            if node == NodeId::Output {
                return true;
            }
            match self.edges.iter().find(|e| e.from == node) {
                Some(edge) => node = edge.to,
                None => return false,
            }
        }
        false
    }
}

/// Which path the render walk takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignalRoute {
    /// Nothing prepared yet.
    Silent,
    /// `Source → Mixer` directly (no unit installed).
    SourceToMixer,
    /// `Source → Processor → Mixer` (effect-style unit).
    SourceThroughUnit,
    /// `Processor → Mixer` (free-running unit); the source keeps its
    /// mixer-direct edge alongside.
    UnitToMixer,
}

/// Everything the audio thread touches. Owned behind one mutex that control
/// code holds only while the nodes being changed are already quiesced.
pub(crate) struct RenderChain {
    pub source: Option<SourcePlayer>,
    pub unit: Option<InstalledUnit>,
    pub route: SignalRoute,
    pub sample_rate: u32,
    scratch: Vec<f32>,
}

/// Scratch capacity covering the largest callback buffer we expect;
/// `render` only grows it beyond this if a device asks for more.
const SCRATCH_SAMPLES: usize = 8192;

impl RenderChain {
    pub fn new() -> Self {
        Self {
            source: None,
            unit: None,
            route: SignalRoute::Silent,
            sample_rate: 0,
            scratch: vec![0.0; SCRATCH_SAMPLES],
        }
    }

    fn render(&mut self, out: &mut [f32], channels: usize) {
        let layout = BlockLayout {
            channels,
            sample_rate: self.sample_rate,
        };
        match self.route {
            SignalRoute::Silent => {}
            SignalRoute::SourceToMixer => {
                if let Some(source) = &mut self.source {
                    source.fill(out, channels);
                }
            }
            SignalRoute::SourceThroughUnit => {
                if out.len() > self.scratch.len() {
                    self.scratch.resize(out.len(), 0.0);
                }
                {
                    let feed = &mut self.scratch[..out.len()];
                    match &mut self.source {
                        Some(source) => source.fill(feed, channels),
                        None => feed.fill(0.0),
                    }
                }
                if let Some(slot) = &mut self.unit {
                    slot.drain_events();
                    slot.unit.render(Some(&self.scratch[..out.len()]), out, layout);
                }
            }
            SignalRoute::UnitToMixer => {
                if let Some(slot) = &mut self.unit {
                    slot.drain_events();
                    slot.unit.render(None, out, layout);
                }
                // The source can stay wired mixer-direct alongside an
                // autonomous unit; the mixer sums it in whenever it rolls
                // (e.g. playback carried across an effect → generator swap).
                if out.len() > self.scratch.len() {
                    self.scratch.resize(out.len(), 0.0);
                }
                {
                    let feed = &mut self.scratch[..out.len()];
                    match &mut self.source {
                        Some(source) => source.fill(feed, channels),
                        None => feed.fill(0.0),
                    }
                }
                let len = out.len();
                for (sample, src) in out.iter_mut().zip(self.scratch[..len].iter()) {
                    *sample += *src;
                }
            }
        }
        // Mixer stage: hard ceiling so a misbehaving unit cannot overdrive
        // the output edge.
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

/// Renders one buffer from the chain. Runs on the realtime thread: never
/// waits on a lock — if the control side holds the chain for a rewire, this
/// buffer stays silent and the next one picks the new wiring up.
pub(crate) fn render_block(chain: &Mutex<RenderChain>, out: &mut [f32], channels: usize) {
    out.fill(0.0);
    if channels == 0 || out.len() < channels {
        return;
    }
    if let Ok(mut chain) = chain.try_lock() {
        chain.render(out, channels);
    }
}
