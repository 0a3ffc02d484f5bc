// Integration smoke test for the server.
//
// Starts a server on localhost and drives it with plain TCP clients using
// the protocol crate's framing: handshake, generation, catalog queries,
// a subscribed training run and the model swap that follows it.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;

use mugan_music::config::MuganConfig;
use mugan_music::corpus::build_dataset;
use mugan_music::event::Event;
use mugan_protocol::framing::{recv as recv_frame, send as send_frame};
use mugan_protocol::message::{ClientMessage, GenerateParams, ServerMessage};
use mugan_protocol::types::{PROTOCOL_VERSION, RequestId, RunStatus};
use mugan_server::{ServerConfig, start_server};

struct Client {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Client {
    fn connect(addr: SocketAddr, protocol_version: u32) -> (Self, ServerMessage) {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        let mut client = Client {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: BufWriter::new(stream),
        };
        client.send(&ClientMessage::Hello {
            protocol_version,
            client_name: "smoke".into(),
        });
        let first = client.recv();
        (client, first)
    }

    fn send(&mut self, msg: &ClientMessage) {
        send_frame(&mut self.writer, msg).unwrap();
    }

    fn recv(&mut self) -> ServerMessage {
        recv_frame(&mut self.reader).unwrap()
    }
}

fn config(dir: &Path) -> ServerConfig {
    let mut music = MuganConfig::default();
    music.paths.processed_dir = dir.join("processed");
    music.paths.models_dir = dir.join("models");
    music.paths.generated_dir = dir.join("generated");
    music.training.epochs = 2;
    ServerConfig {
        port: 0,
        music,
        catalog_path: Some(dir.join("catalog.json")),
        model_path: None,
        poll_interval: Duration::from_millis(10),
    }
}

fn write_dataset(music: &MuganConfig) {
    let enc = &music.encoding;
    let stream: Vec<Event> = (0..96)
        .map(|i| Event::sounding(&[55 + (i % 9) as u8], enc.max_polyphony, 2, 4))
        .collect();
    let mut rng = StdRng::seed_from_u64(11);
    let dataset = build_dataset(&[stream], 1, enc, &music.training, &mut rng);
    dataset.save(&music.paths.dataset_path()).unwrap();
}

#[test]
fn generate_and_query_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, addr) = start_server(config(dir.path())).unwrap();

    let (mut client, welcome) = Client::connect(addr, PROTOCOL_VERSION);
    assert!(
        matches!(
            welcome,
            ServerMessage::Welcome {
                model_trained: false,
                ..
            }
        ),
        "expected Welcome, got {welcome:?}"
    );

    client.send(&ClientMessage::ListCatalog {
        filter: None,
        search: None,
    });
    assert_eq!(client.recv(), ServerMessage::Catalog { items: vec![] });

    client.send(&ClientMessage::Generate {
        request_id: RequestId(1),
        title: Some("Smoke Signal".into()),
        composer: None,
        params: GenerateParams {
            target_length: Some(48),
            seed: Some(3),
            ..Default::default()
        },
    });
    let (item_id, midi_path) = match client.recv() {
        ServerMessage::Generated {
            request_id,
            item,
            midi_path,
            events,
            ..
        } => {
            assert_eq!(request_id, RequestId(1));
            assert_eq!(events, 48);
            (item.id, midi_path)
        }
        other => panic!("expected Generated, got {other:?}"),
    };
    assert!(Path::new(&midi_path).is_file());

    client.send(&ClientMessage::ListCatalog {
        filter: Some("generated".into()),
        search: Some("smoke".into()),
    });
    match client.recv() {
        ServerMessage::Catalog { items } => {
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].id, item_id);
        }
        other => panic!("expected Catalog, got {other:?}"),
    }

    client.send(&ClientMessage::ListCatalog {
        filter: Some("nonsense".into()),
        search: None,
    });
    assert!(matches!(client.recv(), ServerMessage::Error { .. }));

    client.send(&ClientMessage::GetItem { id: item_id });
    assert!(matches!(
        client.recv(),
        ServerMessage::Item { item: Some(_) }
    ));

    client.send(&ClientMessage::Generate {
        request_id: RequestId(2),
        title: None,
        composer: None,
        params: GenerateParams {
            temperature: Some(-1.0),
            ..Default::default()
        },
    });
    assert!(matches!(
        client.recv(),
        ServerMessage::GenerationFailed {
            request_id: RequestId(2),
            ..
        }
    ));

    client.send(&ClientMessage::Goodbye);
    handle.stop();
    assert!(dir.path().join("catalog.json").is_file());
}

#[test]
fn refuses_other_protocol_versions() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, addr) = start_server(config(dir.path())).unwrap();

    let (_client, reply) = Client::connect(addr, PROTOCOL_VERSION + 1);
    match reply {
        ServerMessage::Error { message } => assert!(message.contains("protocol version")),
        other => panic!("expected Error, got {other:?}"),
    }
    handle.stop();
}

#[test]
fn subscribed_training_run_swaps_model() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    write_dataset(&config.music);
    let model_path = config.music.paths.model_path();
    let (handle, addr) = start_server(config).unwrap();

    let (mut client, _) = Client::connect(addr, PROTOCOL_VERSION);
    client.send(&ClientMessage::SubscribeTraining);
    client.send(&ClientMessage::StartTraining {
        epochs: None,
        batch_size: Some(8),
    });
    let session_id = match client.recv() {
        ServerMessage::TrainingStarted {
            session_id,
            total_epochs,
        } => {
            assert_eq!(total_epochs, 2);
            session_id
        }
        other => panic!("expected TrainingStarted, got {other:?}"),
    };

    let mut epochs = Vec::new();
    loop {
        match client.recv() {
            ServerMessage::TrainingProgress(report) => {
                assert_eq!(report.batch_size, 8);
                epochs.push(report.epoch);
            }
            ServerMessage::TrainingFinished {
                session_id: finished,
                status,
                error,
            } => {
                assert_eq!(finished, session_id);
                assert_eq!(status, RunStatus::Completed);
                assert_eq!(error, None);
                break;
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(epochs, vec![1, 2]);
    assert!(model_path.is_file());

    let (_late, welcome) = Client::connect(addr, PROTOCOL_VERSION);
    assert!(
        matches!(
            welcome,
            ServerMessage::Welcome {
                model_trained: true,
                ..
            }
        ),
        "expected a trained model after training, got {welcome:?}"
    );

    client.send(&ClientMessage::TrainingStatus);
    match client.recv() {
        ServerMessage::TrainingStatus { session: Some(info) } => {
            assert_eq!(info.session_id, session_id);
            assert_eq!(info.status, RunStatus::Completed);
            assert_eq!(info.epochs.len(), 2);
        }
        other => panic!("expected TrainingStatus, got {other:?}"),
    }

    client.send(&ClientMessage::Goodbye);
    handle.stop();
}
