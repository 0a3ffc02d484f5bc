// Protocol messages between generation clients and the server.
//
// - `ClientMessage`: requests a client sends.
// - `ServerMessage`: replies and pushed notifications from the server.
//
// The record structs below are wire copies of the music library's catalog
// and training types. They are declared here so the protocol crate stays
// independent of the library; the server converts between the two. Every
// field a client may leave out is an `Option`, and the server fills the gap
// from its own configuration.

use serde::{Deserialize, Serialize};

use crate::types::{ClientId, RequestId, RunStatus};

/// Messages sent by a client to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Handshake; must be the first message on a connection.
    Hello {
        protocol_version: u32,
        client_name: String,
    },
    /// Generate one track. Answered by `Generated` or `GenerationFailed`
    /// carrying the same `request_id`.
    Generate {
        request_id: RequestId,
        title: Option<String>,
        composer: Option<String>,
        params: GenerateParams,
    },
    /// Start a training run on the preprocessed dataset.
    StartTraining {
        epochs: Option<u32>,
        batch_size: Option<u32>,
    },
    /// Ask the active run to stop after its current epoch.
    StopTraining,
    /// Request the current or most recent run's record.
    TrainingStatus,
    /// Receive `TrainingProgress` / `TrainingFinished` pushes.
    SubscribeTraining,
    UnsubscribeTraining,
    /// List catalog entries. `filter` is a split name or "all".
    ListCatalog {
        filter: Option<String>,
        search: Option<String>,
    },
    GetItem { id: u32 },
    /// Client is leaving.
    Goodbye,
}

/// Messages sent by the server to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Handshake accepted.
    Welcome {
        client_id: ClientId,
        protocol_version: u32,
        /// Encoding revision of the server's vocabulary.
        encoding_version: u32,
        /// A trained model is loaded (otherwise generation is uniform).
        model_trained: bool,
    },
    Generated {
        request_id: RequestId,
        generation_id: String,
        item: CatalogEntry,
        /// Server-side path of the written MIDI file.
        midi_path: String,
        events: u32,
    },
    GenerationFailed {
        request_id: RequestId,
        reason: String,
    },
    TrainingStarted {
        session_id: String,
        total_epochs: u32,
    },
    TrainingRejected { reason: String },
    /// Stop was requested; the run ends after its current epoch.
    TrainingStopped { session_id: String },
    TrainingProgress(ProgressReport),
    TrainingFinished {
        session_id: String,
        status: RunStatus,
        error: Option<String>,
    },
    /// `None` when no run has been started yet.
    TrainingStatus { session: Option<SessionInfo> },
    Catalog { items: Vec<CatalogEntry> },
    Item { item: Option<CatalogEntry> },
    /// Request could not be served, or the handshake was refused.
    Error { message: String },
}

/// Sampling overrides for one generation request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateParams {
    pub temperature: Option<f64>,
    pub target_length: Option<u32>,
    pub tempo_bpm: Option<u16>,
    pub instrument: Option<String>,
    pub seed: Option<u64>,
}

/// One catalog record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: u32,
    pub title: Option<String>,
    pub composer: Option<String>,
    pub year: Option<i32>,
    pub split: String,
    /// Whole seconds.
    pub duration: Option<u32>,
    pub created: Option<u64>,
    pub plays: u32,
    pub tags: Vec<String>,
    pub midi_filename: Option<String>,
    pub audio_filename: Option<String>,
}

/// Progress pushed after each training epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub epoch: u32,
    pub total_epochs: u32,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub batch_size: u32,
    pub windows_seen: u64,
    pub time_elapsed: f64,
    pub eta: f64,
    pub stopping: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: u32,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub timestamp: u64,
}

/// Record of a training run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub status: RunStatus,
    pub total_epochs: u32,
    pub current_epoch: u32,
    pub start_time: u64,
    pub end_time: Option<u64>,
    pub elapsed_time: f64,
    pub epochs: Vec<EpochReport>,
    pub error: Option<String>,
}
