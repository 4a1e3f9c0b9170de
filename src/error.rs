//! Typed errors for the graph host.
//!
//! Configuration problems (bad component codes, unknown components, unreadable
//! source assets) surface as `Result`s to the caller instead of aborting the
//! process; only truly unrecoverable conditions are left to panic.

use std::path::PathBuf;

use thiserror::Error;

use crate::component::ComponentIdentity;

/// Errors constructing component identities or parameter trees.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// Component codes must decode from exactly 4 ASCII characters.
    #[error("component code {code:?} must be exactly 4 ASCII characters")]
    BadFourCc { code: String },

    /// A parameter id appeared twice while building a parameter map.
    #[error("duplicate parameter id {id:?}")]
    DuplicateParameter { id: String },
}

/// Errors from graph preparation, rewiring, and the render endpoint.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("source asset could not be read: {0}")]
    AssetIo(#[from] std::io::Error),

    #[error("source asset could not be decoded: {0}")]
    AssetDecode(#[from] hound::Error),

    #[error("source asset {path:?} contains no audio frames")]
    AssetEmpty { path: PathBuf },

    /// A mutating operation ran before `prepare()`.
    #[error("the audio graph has not been prepared")]
    NotPrepared,

    #[error("render endpoint failed to start: {0}")]
    EngineStart(String),
}

/// Asynchronous instantiation failures. Recoverable: the caller may retry
/// with a different identity.
#[derive(Debug, Error)]
pub enum InstantiateError {
    #[error("no factory registered for {identity}")]
    NotRegistered { identity: ComponentIdentity },

    #[error("component factory failed: {0}")]
    Factory(String),

    /// The isolated instantiation task died before producing a result.
    #[error("instantiation task was cancelled")]
    Cancelled,
}

/// Outcome errors reported by [`crate::host::UnitHost::load`].
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Component(#[from] ComponentError),

    /// Discovery found nothing for the identity. This is a static
    /// configuration error, not a runtime fault to recover from.
    #[error("no component matches {identity}")]
    ComponentNotFound { identity: ComponentIdentity },

    #[error("failed to instantiate {identity}: {source}")]
    Instantiation {
        identity: ComponentIdentity,
        #[source]
        source: InstantiateError,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// MIDI router errors. Per-source connect/disconnect failures are logged and
/// skipped by the router itself; these surface only for client/port setup.
#[derive(Debug, Error)]
pub enum MidiError {
    #[error("MIDI input client could not be created: {0}")]
    ClientCreate(String),

    #[error("failed to enumerate MIDI sources: {0}")]
    Enumerate(String),

    #[error("failed to connect MIDI source {name:?}: {reason}")]
    Connect { name: String, reason: String },
}

/// Errors loading a [`crate::config::HostConfig`] from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
