// mugan_server — TCP front end for the MuGAN music library.
//
// Clients connect over TCP and speak the `mugan_protocol` framing. They can
// request generations, control a training run and watch its progress, and
// query the catalog. The server never blocks its event loop on model work:
// generation runs on per-request worker threads and training on the
// session's own thread.
//
// Module overview:
// - `hub.rs`:      Server state (clients, catalog, training session, current
//                  predictor) driven by the main loop.
// - `server.rs`:   TCP listener, per-client reader threads, generation
//                  workers and the main event loop (`start_server`).
// - `convert.rs`:  Library types <-> protocol records.
//
// Runs as a standalone binary (`main.rs`) or embedded via `start_server`.

pub mod convert;
pub mod hub;
pub mod server;

pub use server::{ServerConfig, ServerHandle, start_server};
