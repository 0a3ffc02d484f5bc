// mugan_protocol — wire protocol between generation clients and the
// MuGAN server.
//
// Shared by `mugan_server` and any client. Has no dependency on the music
// library: catalog and training records are mirrored as plain wire structs.
//
// Module overview:
// - `types.rs`:    `ClientId`, `RequestId`, `RunStatus`, `PROTOCOL_VERSION`.
// - `message.rs`:  `ClientMessage` / `ServerMessage` and the record structs
//                  they carry.
// - `framing.rs`:  4-byte big-endian length prefix + JSON payload over any
//                  `Read`/`Write` stream, capped at 16 MB.
// - `error.rs`:    `ProtocolError`.
//
// Blocking `std::io` only; no async runtime.

pub mod error;
pub mod framing;
pub mod message;
pub mod types;

pub use error::ProtocolError;
pub use framing::{MAX_MESSAGE_SIZE, read_message, recv, send, write_message};
pub use message::{
    CatalogEntry, ClientMessage, EpochReport, GenerateParams, ProgressReport, ServerMessage,
    SessionInfo,
};
pub use types::{ClientId, PROTOCOL_VERSION, RequestId, RunStatus};

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn client_roundtrip(msg: &ClientMessage) {
        let mut wire = Vec::new();
        send(&mut wire, msg).unwrap();
        let recovered: ClientMessage = recv(&mut Cursor::new(&wire)).unwrap();
        assert_eq!(&recovered, msg);
    }

    fn server_roundtrip(msg: &ServerMessage) {
        let mut wire = Vec::new();
        send(&mut wire, msg).unwrap();
        let recovered: ServerMessage = recv(&mut Cursor::new(&wire)).unwrap();
        assert_eq!(&recovered, msg);
    }

    fn entry() -> CatalogEntry {
        CatalogEntry {
            id: 3_141_592,
            title: Some("Nocturne".into()),
            composer: Some("Frédéric Chopin".into()),
            year: Some(2004),
            split: "Train".into(),
            duration: Some(281),
            created: None,
            plays: 2,
            tags: vec!["piano".into()],
            midi_filename: Some("nocturne.midi".into()),
            audio_filename: None,
        }
    }

    #[test]
    fn roundtrip_generate() {
        client_roundtrip(&ClientMessage::Generate {
            request_id: RequestId(7),
            title: Some("Dawn".into()),
            composer: None,
            params: GenerateParams {
                temperature: Some(0.5),
                target_length: Some(128),
                tempo_bpm: None,
                instrument: Some("Violin".into()),
                seed: Some(42),
            },
        });
    }

    #[test]
    fn roundtrip_client_requests() {
        for msg in [
            ClientMessage::Hello {
                protocol_version: PROTOCOL_VERSION,
                client_name: "studio".into(),
            },
            ClientMessage::StartTraining {
                epochs: Some(3),
                batch_size: None,
            },
            ClientMessage::StopTraining,
            ClientMessage::TrainingStatus,
            ClientMessage::SubscribeTraining,
            ClientMessage::UnsubscribeTraining,
            ClientMessage::ListCatalog {
                filter: Some("generated".into()),
                search: None,
            },
            ClientMessage::GetItem { id: 12 },
            ClientMessage::Goodbye,
        ] {
            client_roundtrip(&msg);
        }
    }

    #[test]
    fn roundtrip_generated() {
        server_roundtrip(&ServerMessage::Generated {
            request_id: RequestId(7),
            generation_id: "0f0e0d0c-0b0a-4908-8706-050403020100".into(),
            item: entry(),
            midi_path: "generated/x.mid".into(),
            events: 256,
        });
    }

    #[test]
    fn roundtrip_training_messages() {
        server_roundtrip(&ServerMessage::TrainingProgress(ProgressReport {
            epoch: 2,
            total_epochs: 4,
            loss: 1.25,
            accuracy: 0.5,
            val_loss: 1.5,
            val_accuracy: 0.25,
            batch_size: 32,
            windows_seen: 900,
            time_elapsed: 0.75,
            eta: 1.5,
            stopping: false,
        }));
        server_roundtrip(&ServerMessage::TrainingStatus {
            session: Some(SessionInfo {
                session_id: "s".into(),
                status: RunStatus::Completed,
                total_epochs: 1,
                current_epoch: 1,
                start_time: 1_700_000_000,
                end_time: Some(1_700_000_002),
                elapsed_time: 2.0,
                epochs: vec![EpochReport {
                    epoch: 1,
                    loss: 0.5,
                    accuracy: 0.75,
                    val_loss: 0.625,
                    val_accuracy: 0.5,
                    timestamp: 1_700_000_002,
                }],
                error: None,
            }),
        });
        server_roundtrip(&ServerMessage::TrainingFinished {
            session_id: "s".into(),
            status: RunStatus::Failed,
            error: Some("dataset missing".into()),
        });
    }

    #[test]
    fn roundtrip_catalog() {
        server_roundtrip(&ServerMessage::Catalog {
            items: vec![entry(), entry()],
        });
        server_roundtrip(&ServerMessage::Item { item: None });
    }

    #[test]
    fn run_status_is_lowercase_on_the_wire() {
        let json = serde_json::to_string(&RunStatus::Stopped).unwrap();
        assert_eq!(json, "\"stopped\"");
    }
}
