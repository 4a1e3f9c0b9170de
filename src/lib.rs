//! # Patchbay — live audio graph host
//!
//! A small runtime that owns a fixed chain of audio nodes — source →
//! optional processing unit → mixer → output — and keeps it alive while the
//! processing unit is hot-swapped underneath it. External MIDI input is
//! multiplexed into whichever unit is currently installed, and a looping
//! test tone keeps the signal path fed for units that consume audio.
//!
//! ## Core pieces
//!
//! - [`engine::PlayEngine`] — owns the graph and the render endpoint;
//!   serializes start/stop/rewire through one serial gate
//! - [`host::UnitHost`] — discovers, asynchronously instantiates, and
//!   installs processing units
//! - [`midi::MidiRouter`] — connects hot-plugged MIDI sources and forwards
//!   Universal MIDI Packets to the installed unit
//! - [`component::ComponentRegistry`] — four-character-code component
//!   discovery and factories
//! - [`processor::ProcessingUnit`] — the trait hot-swappable units implement
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use patchbay::units::builtin_registry;
//! use patchbay::{ComponentIdentity, PlayEngine, UnitHost};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(PlayEngine::with_default_output()?);
//! engine.prepare()?;
//!
//! let host = UnitHost::new(engine.clone(), Arc::new(builtin_registry()));
//! let report = host
//!     .load(ComponentIdentity::from_codes("aumu", "sine", "Pbay")?)
//!     .await?;
//! println!("{}", report.message);
//! # Ok(())
//! # }
//! ```
//!
//! Rendering runs on the audio device's realtime thread and never waits on
//! the control gate; MIDI forwarding consults only an atomically swapped
//! sink reference. See the module docs for the concurrency contracts.

pub mod asset;
pub mod component;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
mod gate;
pub mod graph;
pub mod host;
pub mod midi;
pub mod output;
mod player;
pub mod processor;
pub mod units;

pub use asset::SourceAsset;
pub use component::{
    Capability, ComponentDescriptor, ComponentIdentity, ComponentRegistry, FourCc,
    InstantiateOptions,
};
pub use config::HostConfig;
pub use engine::PlayEngine;
pub use error::{
    ComponentError, ConfigError, GraphError, InstantiateError, LoadError, MidiError,
};
pub use event::{UmpMessage, UmpPacket};
pub use graph::{Edge, NodeId, StreamFormat};
pub use host::{LoadReport, UnitHost};
pub use midi::{HotplugEvent, MidiBackend, MidiRouter, MidiService, MidiSourceInfo, MidirBackend};
pub use processor::{ControlSurface, InstalledUnit, ParameterMap, ProcessingUnit};
