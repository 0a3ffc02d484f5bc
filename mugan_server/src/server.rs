// TCP server and main event loop.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread**: non-blocking `accept()` loop that forwards new
//   connections as `InternalEvent::NewConnection`.
// - **Reader threads** (one per client): `framing::recv` a `ClientMessage`
//   at a time and forward it as `InternalEvent::MessageFrom`. EOF, a read
//   error, a malformed message or `Goodbye` ends the thread with
//   `InternalEvent::Disconnected`.
// - **Generation workers** (one per request): run a `GenerationJob` and
//   report back with `InternalEvent::GenerationDone`.
// - **Main thread**: owns the `Hub` and dispatches events. `recv_timeout`
//   with the poll interval doubles as the timer for draining training
//   progress, so no separate timer thread is needed.
//
// The main thread is the only writer to client streams; reader threads
// only read.
//
// Shutdown: `ServerHandle::stop` clears `keep_running`; the main loop exits,
// cancels running generations and asks an active training run to stop.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use mugan_music::catalog::{Catalog, JsonCatalog};
use mugan_music::compose::GeneratedTrack;
use mugan_music::config::MuganConfig;
use mugan_music::markov::MarkovPredictor;
use mugan_protocol::framing::{recv, send};
use mugan_protocol::message::{ClientMessage, ServerMessage};
use mugan_protocol::types::{ClientId, RequestId};

use crate::hub::Hub;

/// Events sent to the main thread.
enum InternalEvent {
    NewConnection {
        stream: TcpStream,
    },
    MessageFrom {
        client: ClientId,
        message: ClientMessage,
    },
    Disconnected {
        client: ClientId,
    },
    GenerationDone {
        client: ClientId,
        request_id: RequestId,
        result: mugan_music::Result<GeneratedTrack>,
    },
}

/// Handle returned by `start_server` to control the running server.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Signal the server to stop and wait for its main loop to exit.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread {
            let _ = handle.join();
        }
    }
}

pub struct ServerConfig {
    pub port: u16,
    pub music: MuganConfig,
    /// Catalog file. `None` keeps the catalog in memory.
    pub catalog_path: Option<PathBuf>,
    /// Model file. Defaults to the models directory of `music.paths`.
    pub model_path: Option<PathBuf>,
    /// How often training progress is drained when no events arrive.
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 7979,
            music: MuganConfig::default(),
            catalog_path: None,
            model_path: None,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Load the model at `path`, or fall back to an untrained one when the
/// file does not exist. Returns the predictor and whether it was trained.
fn load_model(path: &std::path::Path, music: &MuganConfig) -> mugan_music::Result<(MarkovPredictor, bool)> {
    if path.is_file() {
        let model = MarkovPredictor::load(path, &music.encoding)?;
        tracing::info!("loaded model from {}", path.display());
        return Ok((model, true));
    }
    tracing::warn!("no model at {}, serving an untrained model", path.display());
    Ok((MarkovPredictor::new(music.encoding.clone(), &music.training), false))
}

/// Start the server on a background thread. Returns a handle for stopping
/// it and the bound address (useful with port 0).
pub fn start_server(config: ServerConfig) -> mugan_music::Result<(ServerHandle, SocketAddr)> {
    config.music.encoding.validate()?;
    let model_path = config
        .model_path
        .clone()
        .unwrap_or_else(|| config.music.paths.model_path());
    let (predictor, trained) = load_model(&model_path, &config.music)?;
    let catalog: Box<dyn Catalog> = match &config.catalog_path {
        Some(path) => Box::new(JsonCatalog::open(path)?),
        None => Box::new(JsonCatalog::in_memory()),
    };

    let listener = TcpListener::bind(format!("127.0.0.1:{}", config.port))?;
    let addr = listener.local_addr()?;
    let hub = Hub::new(config.music, model_path, catalog, Arc::new(predictor), trained);

    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();
    let poll_interval = config.poll_interval;
    let thread = thread::Builder::new()
        .name("mugan-server".into())
        .spawn(move || run_server(listener, hub, poll_interval, keep_running_clone))?;

    tracing::info!("listening on {addr}");
    Ok((
        ServerHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main loop. Runs until `keep_running` is cleared.
fn run_server(
    listener: TcpListener,
    mut hub: Hub,
    poll_interval: Duration,
    keep_running: Arc<AtomicBool>,
) {
    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();

    // Non-blocking so the accept thread can notice shutdown.
    listener.set_nonblocking(true).ok();

    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false).ok();
                    let _ = tx_listener.send(InternalEvent::NewConnection { stream });
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    tracing::error!("accept failed: {e}");
                    break;
                }
            }
        }
    });

    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(poll_interval) {
            Ok(event) => {
                handle_event(&mut hub, event, &tx, &keep_running);
                while let Ok(event) = rx.try_recv() {
                    handle_event(&mut hub, event, &tx, &keep_running);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        hub.poll_training();
    }

    hub.shutdown();
    tracing::info!("server stopped");
}

fn handle_event(
    hub: &mut Hub,
    event: InternalEvent,
    tx: &Sender<InternalEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    match event {
        InternalEvent::NewConnection { stream } => {
            handle_new_connection(hub, stream, tx, keep_running);
        }
        InternalEvent::MessageFrom { client, message } => {
            if let Some(job) = hub.handle_message(client, message) {
                let tx_worker = tx.clone();
                let spawned = thread::Builder::new()
                    .name("mugan-generate".into())
                    .spawn(move || {
                        let result = job.run();
                        let _ = tx_worker.send(InternalEvent::GenerationDone {
                            client: job.client,
                            request_id: job.request_id,
                            result,
                        });
                    });
                if let Err(e) = spawned {
                    tracing::error!("could not start generation worker: {e}");
                }
            }
        }
        InternalEvent::Disconnected { client } => hub.remove_client(client),
        InternalEvent::GenerationDone {
            client,
            request_id,
            result,
        } => hub.finish_generation(client, request_id, result),
    }
}

/// Read the `Hello` handshake, admit the client and spawn its reader.
fn handle_new_connection(
    hub: &mut Hub,
    stream: TcpStream,
    tx: &Sender<InternalEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    // The handshake must not stall the main loop indefinitely.
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok();

    let mut reader = match stream.try_clone() {
        Ok(s) => BufReader::new(s),
        Err(_) => return,
    };
    let (client_name, protocol_version) = match recv::<_, ClientMessage>(&mut reader) {
        Ok(ClientMessage::Hello {
            protocol_version,
            client_name,
        }) => (client_name, protocol_version),
        Ok(other) => {
            tracing::debug!("expected Hello, got {other:?}; dropping connection");
            return;
        }
        Err(e) => {
            tracing::debug!("handshake failed: {e}");
            return;
        }
    };

    let write_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    };
    match hub.add_client(client_name, protocol_version, write_stream) {
        Ok(client) => {
            stream.set_read_timeout(None).ok();
            let tx_reader = tx.clone();
            let keep_running_reader = keep_running.clone();
            thread::spawn(move || reader_loop(reader, client, tx_reader, keep_running_reader));
        }
        Err(reason) => {
            tracing::info!("refused client: {reason}");
            let mut writer = BufWriter::new(stream);
            let _ = send(&mut writer, &ServerMessage::Error { message: reason });
        }
    }
}

fn reader_loop(
    mut reader: BufReader<TcpStream>,
    client: ClientId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match recv::<_, ClientMessage>(&mut reader) {
            Ok(ClientMessage::Goodbye) => break,
            Ok(message) => {
                if tx.send(InternalEvent::MessageFrom { client, message }).is_err() {
                    return;
                }
            }
            Err(e) => {
                if !e.is_disconnect() {
                    tracing::debug!("client {}: {e}", client.0);
                }
                break;
            }
        }
    }
    let _ = tx.send(InternalEvent::Disconnected { client });
}
