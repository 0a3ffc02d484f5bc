// MuGAN music library
//
// Symbolic music generation over a fixed discrete event vocabulary: MIDI
// scores are quantized into fixed-width events, a predictor learns the next
// event from a window of previous ones, and a temperature-controlled
// autoregressive sampler turns predictions back into an event stream, then
// into MIDI (and optionally audio).
//
// Architecture:
// - config.rs: Versioned encoding plus generation/training/path settings
// - error.rs: Crate error type
// - quantize.rs: Continuous durations and time gaps <-> class indices
// - event.rs: The fixed-width event and its sentinels
// - score.rs: MIDI file -> notes/chords/rests with quarter-note timing
// - codec.rs: Occurrences -> events -> timed notes
// - window.rs: Fixed-length training windows over one file's events
// - predictor.rs: The predictor trait and head distributions
// - markov.rs: First-order per-head Markov predictor (trainable baseline)
// - generate.rs: Autoregressive temperature sampling loop
// - seed.rs: Random seed windows
// - midi.rs: Timed notes -> Standard MIDI File
// - render.rs: MIDI -> audio via FluidSynth
// - corpus.rs: Parallel corpus preprocessing into a dataset
// - training.rs: Training harness and the explicit training session
// - subscribers.rs: Ordered best-effort fan-out list
// - compose.rs: Request -> MIDI file + catalog record
// - catalog.rs: Track records, the catalog seam, MAESTRO import
// - stamp.rs: UUIDs and timestamps for records
//
// Generation is deterministic given an RNG seed.

pub mod catalog;
pub mod codec;
pub mod compose;
pub mod config;
pub mod corpus;
pub mod error;
pub mod event;
pub mod generate;
pub mod markov;
pub mod midi;
pub mod predictor;
pub mod quantize;
pub mod render;
pub mod score;
pub mod seed;
pub mod stamp;
pub mod subscribers;
pub mod training;
pub mod window;

pub use error::{Error, Result};
