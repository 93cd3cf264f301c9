//! Messages exchanged between the coordinator and a build worker
//!
//! Worker to coordinator: `READY`, then any number of `LOG`, then exactly one
//! of `BUNDLED` or `FAILED`. Coordinator to worker: a single `BUNDLE`.
//!
//! ```text
//! {"event":"LOG","message":"[lodash]: Installing dependencies"}
//! {"event":"BUNDLE","data":{"hash":"…","registryMetadata":{…},"resolvedVersion":"4.17.21"}}
//! ```

mod wire;

pub use wire::{
    decode, encode, read_frame, read_message, write_frame, write_message, ProtocolError,
    MAX_MESSAGE_SIZE,
};

use crate::outcome::BuildFailure;
use crate::registry::RegistryMetadata;
use serde::{Deserialize, Serialize};

/// Events sent by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerEvent {
    /// The worker can accept one build instruction
    Ready,
    /// Progress line for the coordinator's log
    Log { message: String },
    /// The compiled script
    Bundled { result: String },
    /// Terminal pipeline failure
    Failed { error: BuildFailure },
}

impl WorkerEvent {
    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Bundled { .. } | Self::Failed { .. })
    }
}

/// Instructions sent to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Instruction {
    Bundle(BundleJob),
}

/// Everything a worker needs to build one package version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleJob {
    pub hash: String,
    pub registry_metadata: RegistryMetadata,
    pub resolved_version: String,
}
