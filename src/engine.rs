//! The play engine: owns the graph, serializes every mutating operation
//! through the serial state gate, and keeps the looping playback alive.
//!
//! Modeled as three cooperating pieces sharing one gated state: the graph
//! manager (`prepare` / `rewire` / `reset`), the playback loop scheduler
//! (`start_playing` / `stop_playing` plus the completion pump), and the
//! render endpoint the chain is pulled from.

use std::sync::{Arc, Mutex};
use std::thread;

use arc_swap::ArcSwapOption;
use crossbeam::channel::{unbounded, Receiver, Sender};
use tracing::{debug, info};

use crate::asset::SourceAsset;
use crate::component::Capability;
use crate::error::GraphError;
use crate::gate::Gate;
use crate::graph::{
    render_block, Edge, NodeId, RenderChain, SignalRoute, StreamFormat, Topology,
};
use crate::output::{CpalOutput, OfflineOutput, OutputEndpoint};
use crate::player::{PlayerEvent, SourcePlayer};
use crate::processor::{InstalledUnit, SharedEventSink};

/// Gated host state: playback flag plus control-side topology bookkeeping.
struct HostState {
    prepared: bool,
    playing: bool,
    topology: Topology,
    source_format: Option<StreamFormat>,
    /// Capability of the currently installed unit.
    capability: Option<Capability>,
}

impl HostState {
    fn new() -> Self {
        Self {
            prepared: false,
            playing: false,
            topology: Topology::default(),
            source_format: None,
            capability: None,
        }
    }
}

struct EngineCore {
    gate: Gate<HostState>,
    chain: Arc<Mutex<RenderChain>>,
    sink: SharedEventSink,
    output: Box<dyn OutputEndpoint>,
    events_tx: Sender<PlayerEvent>,
}

/// The live audio graph host.
pub struct PlayEngine {
    core: Arc<EngineCore>,
    pump: Mutex<Option<thread::JoinHandle<()>>>,
}

impl PlayEngine {
    /// Engine over the default audio device.
    pub fn with_default_output() -> Result<Self, GraphError> {
        let chain = Arc::new(Mutex::new(RenderChain::new()));
        let output = CpalOutput::spawn(chain.clone())?;
        Ok(Self::with_parts(chain, Box::new(output)))
    }

    /// Engine over a fixed-format offline endpoint; pull audio with
    /// [`PlayEngine::render_offline`].
    pub fn offline(format: StreamFormat) -> Self {
        let chain = Arc::new(Mutex::new(RenderChain::new()));
        Self::with_parts(chain, Box::new(OfflineOutput::new(format)))
    }

    /// Engine over an injected endpoint.
    pub fn with_endpoint(output: Box<dyn OutputEndpoint>) -> Self {
        let chain = Arc::new(Mutex::new(RenderChain::new()));
        Self::with_parts(chain, output)
    }

    fn with_parts(chain: Arc<Mutex<RenderChain>>, output: Box<dyn OutputEndpoint>) -> Self {
        let (events_tx, events_rx) = unbounded();
        let core = Arc::new(EngineCore {
            gate: Gate::new(HostState::new()),
            chain,
            sink: Arc::new(ArcSwapOption::empty()),
            output,
            events_tx,
        });
        let pump_core = core.clone();
        let pump = thread::spawn(move || completion_pump(pump_core, events_rx));
        Self {
            core,
            pump: Mutex::new(Some(pump)),
        }
    }

    /// Builds the initial graph around the bundled test tone.
    pub fn prepare(&self) -> Result<(), GraphError> {
        self.prepare_with(SourceAsset::bundled()?)
    }

    /// Builds the initial graph: `Source → Mixer` at the asset's native
    /// format, `Mixer → Output` at the endpoint's current format. Idempotent.
    pub fn prepare_with(&self, asset: SourceAsset) -> Result<(), GraphError> {
        self.core.gate.with(|st| {
            if st.prepared {
                return Ok(());
            }
            let source_format = asset.format;
            let hw = self.core.output.format();
            {
                let mut chain = self.core.chain.lock().unwrap();
                chain.source = Some(SourcePlayer::new(asset, self.core.events_tx.clone()));
                chain.route = SignalRoute::SourceToMixer;
                chain.sample_rate = hw.sample_rate;
            }
            st.topology
                .connect(NodeId::Source, NodeId::Mixer, source_format);
            st.topology.connect(NodeId::Mixer, NodeId::Output, hw);
            st.source_format = Some(source_format);
            st.prepared = true;
            info!(
                source_rate = source_format.sample_rate,
                source_channels = source_format.channels,
                output_rate = hw.sample_rate,
                "graph prepared"
            );
            Ok(())
        })
    }

    /// Starts looping playback. No-op when already playing or when no unit
    /// is installed.
    pub fn start_playing(&self) -> Result<(), GraphError> {
        self.core.gate.with(|st| self.core.start_locked(st))
    }

    /// Stops playback. No-op when already stopped: no endpoint stop call, no
    /// state change.
    pub fn stop_playing(&self) {
        self.core.gate.with(|st| self.core.stop_locked(st));
    }

    /// Toggles playback and returns whether the engine is now playing.
    pub fn toggle_play(&self) -> Result<bool, GraphError> {
        self.core.gate.with(|st| {
            if st.playing {
                self.core.stop_locked(st);
                Ok(false)
            } else {
                self.core.start_locked(st)?;
                Ok(st.playing)
            }
        })
    }

    /// Atomically swaps the installed unit (or removes it with `None`),
    /// preserving the playback state across the swap.
    pub fn rewire(&self, new_unit: Option<InstalledUnit>) -> Result<(), GraphError> {
        self.rewire_with(new_unit, || {})
    }

    /// Like [`PlayEngine::rewire`], invoking `completion` inside the gate
    /// once rewiring has finished.
    pub fn rewire_with(
        &self,
        new_unit: Option<InstalledUnit>,
        completion: impl FnOnce(),
    ) -> Result<(), GraphError> {
        self.core.gate.with(|st| {
            self.core.rewire_locked(st, new_unit)?;
            completion();
            Ok(())
        })
    }

    /// Tears down any installed unit; equivalent to `rewire(None)`.
    pub fn reset(&self) -> Result<(), GraphError> {
        self.rewire(None)
    }

    pub fn is_playing(&self) -> bool {
        self.core.gate.with(|st| st.playing)
    }

    pub fn is_prepared(&self) -> bool {
        self.core.gate.with(|st| st.prepared)
    }

    /// Current topology snapshot.
    pub fn edges(&self) -> Vec<Edge> {
        self.core.gate.with(|st| st.topology.edges())
    }

    /// Capability of the installed unit, if any.
    pub fn installed_capability(&self) -> Option<Capability> {
        self.core.gate.with(|st| st.capability)
    }

    /// The sink the MIDI router forwards into. Re-pointed on every rewire.
    pub fn event_sink(&self) -> SharedEventSink {
        self.core.sink.clone()
    }

    /// The endpoint's current output format.
    pub fn output_format(&self) -> StreamFormat {
        self.core.output.format()
    }

    /// Pulls `frames` frames through the chain the way a device callback
    /// would, in callback-sized blocks. Interleaved at the endpoint's
    /// channel count. Meant for offline/test endpoints.
    pub fn render_offline(&self, frames: usize) -> Vec<f32> {
        let channels = usize::from(self.core.output.format().channels.max(1));
        let mut out = vec![0.0f32; frames * channels];
        for chunk in out.chunks_mut(512 * channels) {
            render_block(&self.core.chain, chunk, channels);
        }
        out
    }
}

impl Drop for PlayEngine {
    fn drop(&mut self) {
        let _ = self.core.events_tx.send(PlayerEvent::Shutdown);
        if let Some(pump) = self.pump.lock().unwrap().take() {
            let _ = pump.join();
        }
    }
}

impl EngineCore {
    fn start_locked(&self, st: &mut HostState) -> Result<(), GraphError> {
        if st.playing {
            return Ok(());
        }
        if !st.prepared {
            return Err(GraphError::NotPrepared);
        }
        // Playback only makes sense with a unit in the chain.
        let Some(capability) = st.capability else {
            return Ok(());
        };

        let mut chain = self.chain.lock().unwrap();
        if capability.wants_audio_input {
            if let Some(source) = &mut chain.source {
                // Two passes back-to-back: double-buffering margin against
                // scheduling latency.
                source.schedule_pass();
                source.schedule_pass();
            }
        }

        // Connect the final output stage at the current hardware format.
        let hw = self.output.format();
        st.topology.connect(NodeId::Mixer, NodeId::Output, hw);
        chain.sample_rate = hw.sample_rate;

        if let Err(e) = self.output.start() {
            // Leave the graph stopped; discard the seeded passes.
            if let Some(source) = &mut chain.source {
                source.stop();
            }
            return Err(e);
        }

        if capability.wants_audio_input {
            if let Some(source) = &mut chain.source {
                source.play();
            }
        }
        st.playing = true;
        info!("playback started");
        Ok(())
    }

    fn stop_locked(&self, st: &mut HostState) {
        if !st.playing {
            return;
        }
        let wants_input = st.capability.is_some_and(|c| c.wants_audio_input);
        {
            let mut chain = self.chain.lock().unwrap();
            if wants_input {
                if let Some(source) = &mut chain.source {
                    source.stop();
                }
            }
        }
        self.output.stop();
        st.playing = false;
        info!("playback stopped");
    }

    /// The rewire transaction, steps in order. Holds the chain for the whole
    /// transaction; the render callback skips at most one buffer meanwhile.
    fn rewire_locked(
        &self,
        st: &mut HostState,
        new_unit: Option<InstalledUnit>,
    ) -> Result<(), GraphError> {
        if !st.prepared {
            return Err(GraphError::NotPrepared);
        }
        let source_format = st.source_format.ok_or(GraphError::NotPrepared)?;
        let mut chain = self.chain.lock().unwrap();

        if chain.unit.is_none() && new_unit.is_none() {
            return Ok(());
        }

        // Detach the old unit: break the mixer's inbound edge, undo the
        // effect detour if it had one.
        if let Some(old) = chain.unit.take() {
            st.topology.disconnect_input(NodeId::Mixer);
            if old.capability.wants_audio_input {
                st.topology.disconnect_input(NodeId::Processor);
                st.topology
                    .connect(NodeId::Source, NodeId::Mixer, source_format);
            }
            debug!(unit = old.unit.name(), "detached unit");
        }

        // Pause — not stop — the source: playback must survive the swap
        // without an audible full restart.
        if st.playing {
            if let Some(source) = &mut chain.source {
                source.pause();
            }
        }

        // The hardware output format may have changed; query it fresh.
        let hw = self.output.format();
        st.topology.connect(NodeId::Mixer, NodeId::Output, hw);
        chain.sample_rate = hw.sample_rate;

        match new_unit {
            Some(installed) => {
                let capability = installed.capability;
                if !installed.unit.midi_output_names().is_empty() {
                    debug!(
                        unit = installed.unit.name(),
                        "unit MIDI output attached to a discarding sink"
                    );
                }
                if capability.wants_audio_input {
                    st.topology.disconnect_input(NodeId::Mixer);
                    st.topology
                        .connect(NodeId::Source, NodeId::Processor, source_format);
                    st.topology
                        .connect(NodeId::Processor, NodeId::Mixer, source_format);
                    chain.route = SignalRoute::SourceThroughUnit;
                } else {
                    // Autonomous units receive no source feed; they join the
                    // mixer next to the source's direct edge.
                    st.topology
                        .connect(NodeId::Source, NodeId::Mixer, source_format);
                    st.topology.connect(
                        NodeId::Processor,
                        NodeId::Mixer,
                        StreamFormat::stereo(hw.sample_rate),
                    );
                    chain.route = SignalRoute::UnitToMixer;
                }
                // Re-point the MIDI event sink before playback resumes.
                self.sink.store(Some(installed.event_queue()));
                info!(
                    unit = installed.unit.name(),
                    wants_audio_input = capability.wants_audio_input,
                    "installed unit"
                );
                st.capability = Some(capability);
                chain.unit = Some(installed);
            }
            None => {
                // Keep exactly one source-to-output path alive.
                st.topology
                    .connect(NodeId::Source, NodeId::Mixer, source_format);
                chain.route = SignalRoute::SourceToMixer;
                st.capability = None;
                self.sink.store(None);
                info!("graph reset, no unit installed");
            }
        }

        if st.playing {
            if let Some(source) = &mut chain.source {
                source.play();
            }
        }
        debug_assert!(st.topology.has_path_source_to_output());
        Ok(())
    }

    /// Completion handler for one finished pass. Re-enters the gate and
    /// re-checks the looping flag at invocation time — a completion racing
    /// `stop()` is discharged as a no-op.
    fn handle_pass_complete(&self) {
        self.gate.with(|st| {
            if !st.playing {
                return;
            }
            let mut chain = self.chain.lock().unwrap();
            if let Some(source) = &mut chain.source {
                source.schedule_pass();
            }
        });
    }
}

fn completion_pump(core: Arc<EngineCore>, events: Receiver<PlayerEvent>) {
    while let Ok(event) = events.recv() {
        match event {
            PlayerEvent::PassComplete => core.handle_pass_complete(),
            PlayerEvent::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Capability, TYPE_EFFECT, TYPE_MUSIC_DEVICE};
    use crate::units::{SineBank, SoftClip};

    fn offline_engine() -> PlayEngine {
        let engine = PlayEngine::offline(StreamFormat::stereo(44100));
        engine.prepare().unwrap();
        engine
    }

    fn effect_unit() -> InstalledUnit {
        InstalledUnit::new(
            Box::new(SoftClip::new().unwrap()),
            Capability::classify(TYPE_EFFECT),
        )
    }

    fn instrument_unit() -> InstalledUnit {
        InstalledUnit::new(
            Box::new(SineBank::new().unwrap()),
            Capability::classify(TYPE_MUSIC_DEVICE),
        )
    }

    fn edge_pairs(engine: &PlayEngine) -> Vec<(NodeId, NodeId)> {
        let mut pairs: Vec<_> = engine.edges().iter().map(|e| (e.from, e.to)).collect();
        pairs.sort_by_key(|p| format!("{p:?}"));
        pairs
    }

    #[test]
    fn prepare_builds_source_mixer_output() {
        let engine = offline_engine();
        assert_eq!(
            edge_pairs(&engine),
            vec![
                (NodeId::Mixer, NodeId::Output),
                (NodeId::Source, NodeId::Mixer),
            ]
        );
        assert!(!engine.is_playing());
    }

    #[test]
    fn start_requires_an_installed_unit() {
        let engine = offline_engine();
        engine.start_playing().unwrap();
        assert!(!engine.is_playing());
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let engine = offline_engine();
        engine.rewire(Some(effect_unit())).unwrap();

        engine.start_playing().unwrap();
        assert!(engine.is_playing());
        let queued = {
            let chain = engine.core.chain.lock().unwrap();
            chain.source.as_ref().unwrap().queued_passes()
        };
        assert_eq!(queued, 2, "double-buffered seed");

        // Second start is a no-op: no re-seeding.
        engine.start_playing().unwrap();
        let queued = {
            let chain = engine.core.chain.lock().unwrap();
            chain.source.as_ref().unwrap().queued_passes()
        };
        assert_eq!(queued, 2);

        engine.stop_playing();
        assert!(!engine.is_playing());
        // Stop while stopped: no state change.
        engine.stop_playing();
        assert!(!engine.is_playing());
    }

    #[test]
    fn rewire_effect_builds_the_detour() {
        let engine = offline_engine();
        engine.rewire(Some(effect_unit())).unwrap();
        assert_eq!(
            edge_pairs(&engine),
            vec![
                (NodeId::Mixer, NodeId::Output),
                (NodeId::Processor, NodeId::Mixer),
                (NodeId::Source, NodeId::Processor),
            ]
        );
        // Effect edges carry the source's native format.
        for edge in engine.edges() {
            if edge.from == NodeId::Source {
                assert_eq!(edge.format.sample_rate, 44100);
            }
        }
    }

    #[test]
    fn rewire_instrument_skips_the_source_feed() {
        let engine = offline_engine();
        engine.rewire(Some(instrument_unit())).unwrap();
        assert_eq!(
            edge_pairs(&engine),
            vec![
                (NodeId::Mixer, NodeId::Output),
                (NodeId::Processor, NodeId::Mixer),
                (NodeId::Source, NodeId::Mixer),
            ]
        );
    }

    #[test]
    fn rewire_none_restores_the_direct_path() {
        let engine = offline_engine();
        engine.rewire(Some(effect_unit())).unwrap();
        engine.reset().unwrap();
        assert_eq!(
            edge_pairs(&engine),
            vec![
                (NodeId::Mixer, NodeId::Output),
                (NodeId::Source, NodeId::Mixer),
            ]
        );
        assert!(engine.installed_capability().is_none());
    }

    #[test]
    fn rewire_while_playing_preserves_playback() {
        let engine = offline_engine();
        engine.rewire(Some(effect_unit())).unwrap();
        engine.start_playing().unwrap();
        assert!(engine.is_playing());

        // Audio flows through the effect.
        let out = engine.render_offline(256);
        assert!(out.iter().any(|s| s.abs() > 0.0));

        // Swap to another effect while playing.
        engine.rewire(Some(effect_unit())).unwrap();
        assert!(engine.is_playing(), "playback survives the swap");

        // Audio resumes without a separate start().
        let out = engine.render_offline(256);
        assert!(out.iter().any(|s| s.abs() > 0.0));
    }

    #[test]
    fn completion_after_stop_does_not_rearm() {
        let engine = offline_engine();
        engine.rewire(Some(effect_unit())).unwrap();
        engine.start_playing().unwrap();
        engine.stop_playing();

        // A late completion from an in-flight buffer must be discharged as
        // a no-op: the flag is re-checked inside the gate at invocation time.
        engine.core.handle_pass_complete();
        let chain = engine.core.chain.lock().unwrap();
        assert_eq!(chain.source.as_ref().unwrap().queued_passes(), 0);
    }

    #[test]
    fn completion_while_playing_rearms_the_loop() {
        let engine = offline_engine();
        engine.rewire(Some(effect_unit())).unwrap();
        engine.start_playing().unwrap();
        engine.core.handle_pass_complete();
        let chain = engine.core.chain.lock().unwrap();
        assert_eq!(chain.source.as_ref().unwrap().queued_passes(), 3);
    }

    #[test]
    fn rewire_completion_runs_inside_the_operation() {
        let engine = offline_engine();
        let mut ran = false;
        engine
            .rewire_with(Some(effect_unit()), || ran = true)
            .unwrap();
        assert!(ran);
    }

    #[test]
    fn toggle_flips_the_playback_state() {
        let engine = offline_engine();
        engine.rewire(Some(effect_unit())).unwrap();
        assert!(engine.toggle_play().unwrap());
        assert!(engine.is_playing());
        assert!(!engine.toggle_play().unwrap());
        assert!(!engine.is_playing());
    }

    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingOutput {
        stops: AtomicU32,
    }

    impl OutputEndpoint for CountingOutput {
        fn format(&self) -> StreamFormat {
            StreamFormat::stereo(44100)
        }
        fn start(&self) -> Result<(), GraphError> {
            Ok(())
        }
        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn stop_while_stopped_never_touches_the_endpoint() {
        let output = Arc::new(CountingOutput {
            stops: AtomicU32::new(0),
        });
        struct Shared(Arc<CountingOutput>);
        impl OutputEndpoint for Shared {
            fn format(&self) -> StreamFormat {
                self.0.format()
            }
            fn start(&self) -> Result<(), GraphError> {
                self.0.start()
            }
            fn stop(&self) {
                self.0.stop()
            }
        }
        let engine = PlayEngine::with_endpoint(Box::new(Shared(output.clone())));
        engine.prepare().unwrap();
        engine.rewire(Some(effect_unit())).unwrap();

        engine.stop_playing();
        assert_eq!(output.stops.load(Ordering::SeqCst), 0);

        engine.start_playing().unwrap();
        engine.stop_playing();
        engine.stop_playing();
        assert_eq!(output.stops.load(Ordering::SeqCst), 1);
    }

    struct FailingOutput;

    impl OutputEndpoint for FailingOutput {
        fn format(&self) -> StreamFormat {
            StreamFormat::stereo(44100)
        }
        fn start(&self) -> Result<(), GraphError> {
            Err(GraphError::EngineStart("device unplugged".into()))
        }
        fn stop(&self) {}
    }

    #[test]
    fn endpoint_start_failure_leaves_graph_stopped() {
        let engine = PlayEngine::with_endpoint(Box::new(FailingOutput));
        engine.prepare().unwrap();
        engine.rewire(Some(effect_unit())).unwrap();
        let err = engine.start_playing().unwrap_err();
        assert!(matches!(err, GraphError::EngineStart(_)));
        assert!(!engine.is_playing());
        let chain = engine.core.chain.lock().unwrap();
        assert_eq!(
            chain.source.as_ref().unwrap().queued_passes(),
            0,
            "seeded passes are discarded on start failure"
        );
    }

    #[test]
    fn operations_before_prepare_are_rejected() {
        let engine = PlayEngine::offline(StreamFormat::stereo(44100));
        assert!(matches!(
            engine.start_playing(),
            Err(GraphError::NotPrepared)
        ));
        assert!(matches!(
            engine.rewire(Some(effect_unit())),
            Err(GraphError::NotPrepared)
        ));
    }
}
