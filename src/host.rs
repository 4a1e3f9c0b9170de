//! Plugin lifecycle coordinator: discovery, asynchronous instantiation, and
//! hand-off into the graph.

use std::sync::Arc;

use tracing::info;

use crate::component::{Capability, ComponentIdentity, ComponentRegistry, InstantiateOptions};
use crate::engine::PlayEngine;
use crate::error::LoadError;
use crate::processor::{ControlSurface, InstalledUnit};

/// Outcome of a successful load.
#[derive(Debug)]
pub struct LoadReport {
    pub identity: ComponentIdentity,
    pub capability: Capability,
    /// The unit's own surface, or the generic substitute.
    pub surface: ControlSurface,
    pub message: String,
    /// Whether audio-processing controls make sense for this unit. Derived
    /// from the same classification as the render wiring, intentionally.
    pub offers_audio_controls: bool,
    pub offers_midi_controls: bool,
}

/// Orchestrates loading one processing unit into the engine.
pub struct UnitHost {
    engine: Arc<PlayEngine>,
    registry: Arc<ComponentRegistry>,
    options: InstantiateOptions,
    /// Serializes loads: only one may be outstanding.
    load_lock: tokio::sync::Mutex<()>,
}

impl UnitHost {
    pub fn new(engine: Arc<PlayEngine>, registry: Arc<ComponentRegistry>) -> Self {
        Self::with_options(engine, registry, InstantiateOptions::default())
    }

    pub fn with_options(
        engine: Arc<PlayEngine>,
        registry: Arc<ComponentRegistry>,
        options: InstantiateOptions,
    ) -> Self {
        Self {
            engine,
            registry,
            options,
            load_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &Arc<PlayEngine> {
        &self.engine
    }

    /// Loads the unit selected by `identity`.
    ///
    /// Always resets the graph first, so a new load supersedes any stale
    /// one. Discovery failure is a configuration error; instantiation
    /// failure is reported with its cause and performs no graph mutation
    /// beyond that reset. Free-running units start playing without an
    /// explicit `start_playing()`.
    pub async fn load(&self, identity: ComponentIdentity) -> Result<LoadReport, LoadError> {
        let _serial = self.load_lock.lock().await;

        self.engine.reset()?;

        let descriptor = self
            .registry
            .find(&identity)
            .ok_or(LoadError::ComponentNotFound { identity })?;

        let unit = self
            .registry
            .instantiate(&descriptor, self.options)
            .await
            .map_err(|source| LoadError::Instantiation { identity, source })?;

        let capability = Capability::classify(identity.kind);
        let surface = unit.control_surface().unwrap_or_else(|| {
            // The unit declined to supply a surface; substitute the generic
            // one over its parameter tree.
            ControlSurface::generic(descriptor.name.clone(), unit.parameters())
        });

        self.engine
            .rewire(Some(InstalledUnit::new(unit, capability)))?;

        if capability.is_free_running {
            self.engine.start_playing()?;
        }

        info!(identity = %identity, "unit loaded");
        Ok(LoadReport {
            identity,
            capability,
            surface,
            message: format!("Successfully loaded ({identity})"),
            offers_audio_controls: capability.wants_audio_input,
            offers_midi_controls: capability.wants_midi,
        })
    }
}
