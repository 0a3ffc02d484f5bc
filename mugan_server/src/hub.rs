// Server state owned by the main loop.
//
// `Hub` is the data structure `server.rs` drives: connected clients and
// their write halves, the catalog, the training session and the predictor
// used for new generation requests. All mutation happens on the server's
// main thread, so there is no internal locking.
//
// Responsibilities:
// - Client management: handshake checks, `Welcome`, removal.
// - Request dispatch: catalog queries and training control are answered
//   inline; a generation request becomes a `GenerationJob` that the server
//   runs on a worker thread and hands back through `finish_generation`.
// - Training: `poll_training` drains the session. Subscribers were already
//   notified by the session; a completed run's model is saved to disk and
//   replaces the current predictor. Jobs already running keep the `Arc` they
//   were given.
//
// Writes to a client stream that fail are logged and otherwise ignored; the
// client's reader thread notices the broken connection and reports a
// disconnect.

use std::collections::BTreeMap;
use std::io::BufWriter;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mugan_music::catalog::Catalog;
use mugan_music::compose::{GenerateRequest, GeneratedTrack, compose};
use mugan_music::config::{EncodingConfig, MuganConfig};
use mugan_music::corpus::Dataset;
use mugan_music::predictor::Predictor;
use mugan_music::subscribers::{Subscriber, SubscriberId};
use mugan_music::training::{TrainingEvent, TrainingNotice, TrainingSession, TrainingStatus};
use mugan_protocol::framing::send;
use mugan_protocol::message::{ClientMessage, ServerMessage};
use mugan_protocol::types::{ClientId, PROTOCOL_VERSION, RequestId};

use crate::convert::{
    catalog_entry, generate_request, progress_report, run_status, session_info,
};

struct ClientState {
    name: String,
    writer: BufWriter<TcpStream>,
    training_subscription: Option<SubscriberId>,
}

/// Pushes training events to one client over its own cloned stream.
struct StreamSubscriber {
    writer: BufWriter<TcpStream>,
}

impl Subscriber<TrainingEvent> for StreamSubscriber {
    fn deliver(&mut self, event: &TrainingEvent) -> Result<(), String> {
        let msg = match event {
            TrainingEvent::Progress(stats) => ServerMessage::TrainingProgress(progress_report(stats)),
            TrainingEvent::Finished {
                session_id,
                status,
                error,
            } => ServerMessage::TrainingFinished {
                session_id: session_id.clone(),
                status: run_status(*status),
                error: error.clone(),
            },
        };
        send(&mut self.writer, &msg).map_err(|e| e.to_string())
    }
}

/// A generation request ready to run off the main thread.
pub struct GenerationJob {
    pub client: ClientId,
    pub request_id: RequestId,
    request: GenerateRequest,
    predictor: Arc<dyn Predictor>,
    encoding: EncodingConfig,
    output_dir: PathBuf,
    cancel: Arc<AtomicBool>,
}

impl GenerationJob {
    pub fn run(&self) -> mugan_music::Result<GeneratedTrack> {
        compose(
            self.predictor.as_ref(),
            &self.request,
            &self.encoding,
            &self.output_dir,
            Some(&self.cancel),
        )
    }
}

pub struct Hub {
    config: MuganConfig,
    model_path: PathBuf,
    clients: BTreeMap<ClientId, ClientState>,
    next_client_id: u32,
    catalog: Box<dyn Catalog>,
    training: TrainingSession,
    predictor: Arc<dyn Predictor>,
    model_trained: bool,
    /// Raised on shutdown; running generations return early.
    cancel: Arc<AtomicBool>,
}

impl Hub {
    /// `model_trained` tells clients whether `predictor` came from a model
    /// file or is the untrained fallback.
    pub fn new(
        config: MuganConfig,
        model_path: PathBuf,
        catalog: Box<dyn Catalog>,
        predictor: Arc<dyn Predictor>,
        model_trained: bool,
    ) -> Self {
        Self {
            config,
            model_path,
            clients: BTreeMap::new(),
            next_client_id: 0,
            catalog,
            training: TrainingSession::new(),
            predictor,
            model_trained,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn model_trained(&self) -> bool {
        self.model_trained
    }

    pub fn training_running(&self) -> bool {
        self.training.is_running()
    }

    /// Admit a client after its `Hello`. On success `Welcome` has been sent;
    /// on failure the caller reports the reason and drops the connection.
    pub fn add_client(
        &mut self,
        client_name: String,
        protocol_version: u32,
        stream: TcpStream,
    ) -> Result<ClientId, String> {
        if protocol_version != PROTOCOL_VERSION {
            return Err(format!(
                "protocol version mismatch: client {protocol_version}, server {PROTOCOL_VERSION}"
            ));
        }
        let id = ClientId(self.next_client_id);
        self.next_client_id += 1;

        tracing::info!("client {} ({client_name}) connected", id.0);
        self.clients.insert(
            id,
            ClientState {
                name: client_name,
                writer: BufWriter::new(stream),
                training_subscription: None,
            },
        );
        let welcome = ServerMessage::Welcome {
            client_id: id,
            protocol_version: PROTOCOL_VERSION,
            encoding_version: self.config.encoding.version,
            model_trained: self.model_trained,
        };
        self.send_to(id, &welcome);
        Ok(id)
    }

    pub fn remove_client(&mut self, id: ClientId) {
        if let Some(client) = self.clients.remove(&id) {
            if let Some(sub) = client.training_subscription {
                self.training.unsubscribe(sub);
            }
            tracing::info!("client {} ({}) disconnected", id.0, client.name);
        }
    }

    pub fn send_to(&mut self, id: ClientId, msg: &ServerMessage) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        if let Err(e) = send(&mut client.writer, msg) {
            tracing::warn!("write to client {} failed: {e}", id.0);
        }
    }

    /// Handle one request. Generation requests come back as a job for the
    /// caller to run; everything else is answered here.
    pub fn handle_message(&mut self, id: ClientId, message: ClientMessage) -> Option<GenerationJob> {
        let reply = match message {
            ClientMessage::Generate {
                request_id,
                title,
                composer,
                params,
            } => {
                let request = generate_request(title, composer, params, &self.config.generation);
                return Some(GenerationJob {
                    client: id,
                    request_id,
                    request,
                    predictor: Arc::clone(&self.predictor),
                    encoding: self.config.encoding.clone(),
                    output_dir: self.config.paths.generated_dir.clone(),
                    cancel: Arc::clone(&self.cancel),
                });
            }
            ClientMessage::StartTraining { epochs, batch_size } => {
                self.start_training(epochs, batch_size)
            }
            ClientMessage::StopTraining => {
                if self.training.stop() {
                    let session_id = self
                        .training
                        .record()
                        .map(|r| r.session_id.clone())
                        .unwrap_or_default();
                    ServerMessage::TrainingStopped { session_id }
                } else {
                    ServerMessage::Error {
                        message: "no training in progress".into(),
                    }
                }
            }
            ClientMessage::TrainingStatus => ServerMessage::TrainingStatus {
                session: self.training.record().map(session_info),
            },
            ClientMessage::SubscribeTraining => {
                self.subscribe(id);
                return None;
            }
            ClientMessage::UnsubscribeTraining => {
                if let Some(sub) = self
                    .clients
                    .get_mut(&id)
                    .and_then(|c| c.training_subscription.take())
                {
                    self.training.unsubscribe(sub);
                }
                return None;
            }
            ClientMessage::ListCatalog { filter, search } => {
                match self.catalog.list(filter.as_deref(), search.as_deref()) {
                    Ok(items) => ServerMessage::Catalog {
                        items: items.iter().map(catalog_entry).collect(),
                    },
                    Err(e) => ServerMessage::Error {
                        message: e.to_string(),
                    },
                }
            }
            ClientMessage::GetItem { id: item_id } => match self.catalog.get(item_id) {
                Ok(item) => ServerMessage::Item {
                    item: item.as_ref().map(catalog_entry),
                },
                Err(e) => ServerMessage::Error {
                    message: e.to_string(),
                },
            },
            ClientMessage::Hello { .. } | ClientMessage::Goodbye => return None,
        };
        self.send_to(id, &reply);
        None
    }

    fn start_training(&mut self, epochs: Option<u32>, batch_size: Option<u32>) -> ServerMessage {
        let mut training = self.config.training.clone();
        if let Some(n) = epochs {
            training.epochs = n;
        }
        if let Some(n) = batch_size {
            training.batch_size = n as usize;
        }
        let total_epochs = training.epochs;
        let dataset_path = self.config.paths.dataset_path();
        let encoding = self.config.encoding.clone();
        match self
            .training
            .start(move || Dataset::load(&dataset_path, &encoding), training)
        {
            Ok(session_id) => ServerMessage::TrainingStarted {
                session_id,
                total_epochs,
            },
            Err(e) => ServerMessage::TrainingRejected {
                reason: e.to_string(),
            },
        }
    }

    fn subscribe(&mut self, id: ClientId) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        // A subscription the session dropped after a failed write no longer
        // counts.
        if client
            .training_subscription
            .is_some_and(|sub| self.training.is_subscribed(sub))
        {
            return;
        }
        match client.writer.get_ref().try_clone() {
            Ok(stream) => {
                let sub = self.training.subscribe(Box::new(StreamSubscriber {
                    writer: BufWriter::new(stream),
                }));
                client.training_subscription = Some(sub);
            }
            Err(e) => tracing::warn!("cannot subscribe client {}: {e}", id.0),
        }
    }

    /// Record a finished generation job and answer its client.
    pub fn finish_generation(
        &mut self,
        client: ClientId,
        request_id: RequestId,
        result: mugan_music::Result<GeneratedTrack>,
    ) {
        let reply = match result {
            Ok(track) => {
                let mut item = track.item;
                match self.catalog.insert(item.clone()) {
                    Ok(id) => item.id = id,
                    Err(e) => tracing::warn!("catalog insert failed: {e}"),
                }
                ServerMessage::Generated {
                    request_id,
                    generation_id: track.generation_id,
                    item: catalog_entry(&item),
                    midi_path: track.midi_path.display().to_string(),
                    events: u32::try_from(track.events).unwrap_or(u32::MAX),
                }
            }
            Err(e) => ServerMessage::GenerationFailed {
                request_id,
                reason: e.to_string(),
            },
        };
        self.send_to(client, &reply);
    }

    /// Drain training updates. A completed run's model is saved and becomes
    /// the predictor for later requests.
    pub fn poll_training(&mut self) {
        for notice in self.training.poll() {
            if let TrainingNotice::Finished {
                status: TrainingStatus::Completed,
                model: Some(model),
                ..
            } = notice
            {
                if let Err(e) = model.save(&self.model_path) {
                    tracing::warn!("could not save trained model: {e}");
                }
                self.predictor = Arc::new(*model);
                self.model_trained = true;
                tracing::info!("trained model is now serving requests");
            }
        }
    }

    /// Stop background work: running generations and any training run.
    pub fn shutdown(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.training.stop();
    }
}
