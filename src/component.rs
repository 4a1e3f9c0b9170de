//! Component identities, capability classification, and the registry used to
//! discover and instantiate processing units.

use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{ComponentError, InstantiateError};
use crate::processor::ProcessingUnit;

/// A four-character component code, e.g. `aumu`.
///
/// Codes must be exactly 4 ASCII bytes; anything else is a configuration
/// error raised before any discovery or instantiation attempt.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc([u8; 4]);

/// Effect units: consume the source signal.
pub const TYPE_EFFECT: FourCc = FourCc(*b"aufx");
/// Music effects: consume audio and accept MIDI.
pub const TYPE_MUSIC_EFFECT: FourCc = FourCc(*b"aumf");
/// MIDI processors: no audio input, free-running.
pub const TYPE_MIDI_PROCESSOR: FourCc = FourCc(*b"aumi");
/// Music devices (instruments): MIDI-driven, free-running.
pub const TYPE_MUSIC_DEVICE: FourCc = FourCc(*b"aumu");
/// Generators: produce audio with no input, free-running.
pub const TYPE_GENERATOR: FourCc = FourCc(*b"augn");

impl FourCc {
    /// Parses a code, validating the exactly-4-ASCII-bytes rule.
    pub fn new(code: &str) -> Result<Self, ComponentError> {
        let bytes = code.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii()) {
            return Err(ComponentError::BadFourCc {
                code: code.to_string(),
            });
        }
        Ok(Self([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn as_str(&self) -> &str {
        // Constructor guarantees ASCII.
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self.as_str())
    }
}

/// The triple selecting one component from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentIdentity {
    pub kind: FourCc,
    pub subtype: FourCc,
    pub manufacturer: FourCc,
}

impl ComponentIdentity {
    pub fn new(kind: FourCc, subtype: FourCc, manufacturer: FourCc) -> Self {
        Self {
            kind,
            subtype,
            manufacturer,
        }
    }

    /// Parses all three codes, failing on the first invalid one.
    pub fn from_codes(
        kind: &str,
        subtype: &str,
        manufacturer: &str,
    ) -> Result<Self, ComponentError> {
        Ok(Self {
            kind: FourCc::new(kind)?,
            subtype: FourCc::new(subtype)?,
            manufacturer: FourCc::new(manufacturer)?,
        })
    }
}

impl fmt::Display for ComponentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind, self.subtype, self.manufacturer)
    }
}

/// What a unit's type code says about how it must be wired.
///
/// `wants_audio_input` intentionally drives two things at once: whether the
/// unit is fed the looping source signal, and whether audio-processing
/// controls are offered in the load report. The classifications are derived
/// independently from the type code and are not mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    /// Effect-like: the unit consumes the source feed.
    pub wants_audio_input: bool,
    /// The unit accepts MIDI events.
    pub wants_midi: bool,
    /// Instrument/generator-like: renders without any external feed and may
    /// auto-start after loading.
    pub is_free_running: bool,
}

impl Capability {
    /// The exact type-code mapping. Effects and music effects want input;
    /// MIDI processors, music devices, and generators are free-running.
    pub fn classify(kind: FourCc) -> Self {
        Self {
            wants_audio_input: kind == TYPE_EFFECT || kind == TYPE_MUSIC_EFFECT,
            wants_midi: kind == TYPE_MIDI_PROCESSOR
                || kind == TYPE_MUSIC_DEVICE
                || kind == TYPE_MUSIC_EFFECT,
            is_free_running: kind == TYPE_MIDI_PROCESSOR
                || kind == TYPE_MUSIC_DEVICE
                || kind == TYPE_GENERATOR,
        }
    }
}

/// Descriptor returned by discovery.
#[derive(Debug, Clone)]
pub struct ComponentDescriptor {
    pub identity: ComponentIdentity,
    pub name: String,
}

/// Factory producing a fresh unit instance. Runs on an isolated blocking
/// task when out-of-process loading is requested.
pub type UnitFactory =
    Arc<dyn Fn() -> Result<Box<dyn ProcessingUnit>, InstantiateError> + Send + Sync>;

/// How a unit is instantiated.
#[derive(Debug, Clone, Copy)]
pub struct InstantiateOptions {
    /// Isolate instantiation from the control context, mirroring
    /// out-of-process component loading.
    pub load_out_of_process: bool,
}

impl Default for InstantiateOptions {
    fn default() -> Self {
        Self {
            load_out_of_process: true,
        }
    }
}

struct RegistryEntry {
    descriptor: ComponentDescriptor,
    factory: UnitFactory,
}

/// Registry of instantiable components.
///
/// Discovery yields zero or one descriptor per identity; registering the
/// same identity twice replaces the earlier entry so lookups stay
/// deterministic.
#[derive(Default)]
pub struct ComponentRegistry {
    entries: RwLock<Vec<RegistryEntry>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: ComponentDescriptor, factory: UnitFactory) {
        let mut entries = self.entries.write().unwrap();
        entries.retain(|e| e.descriptor.identity != descriptor.identity);
        debug!(identity = %descriptor.identity, name = %descriptor.name, "registered component");
        entries.push(RegistryEntry {
            descriptor,
            factory,
        });
    }

    /// Discovery query: zero-or-one descriptor for the identity.
    pub fn find(&self, identity: &ComponentIdentity) -> Option<ComponentDescriptor> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .find(|e| e.descriptor.identity == *identity)
            .map(|e| e.descriptor.clone())
    }

    /// All registered descriptors, for listing.
    pub fn descriptors(&self) -> Vec<ComponentDescriptor> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// Asynchronously instantiates the component behind `descriptor`.
    pub async fn instantiate(
        &self,
        descriptor: &ComponentDescriptor,
        options: InstantiateOptions,
    ) -> Result<Box<dyn ProcessingUnit>, InstantiateError> {
        let factory = {
            let entries = self.entries.read().unwrap();
            entries
                .iter()
                .find(|e| e.descriptor.identity == descriptor.identity)
                .map(|e| e.factory.clone())
        }
        .ok_or(InstantiateError::NotRegistered {
            identity: descriptor.identity,
        })?;

        if options.load_out_of_process {
            tokio::task::spawn_blocking(move || factory())
                .await
                .map_err(|_| InstantiateError::Cancelled)?
        } else {
            factory()
        }
    }
}
