// Sequence windows: fixed-length runs of events for training.
//
// Each file's event stream is cut independently (windows never straddle two
// files). Streams of at least `L` events yield every stride-1 window; shorter,
// non-empty streams yield one window right-padded with the padding event. An
// empty stream (unparseable file) yields nothing.
//
// A window splits into the model input (first `L - 1` events) and the
// target (last event).

use serde::{Deserialize, Serialize};

use crate::config::EncodingConfig;
use crate::event::Event;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Window {
    pub events: Vec<Event>,
}

impl Window {
    /// The first `L - 1` events.
    pub fn context(&self) -> &[Event] {
        let n = self.events.len().saturating_sub(1);
        &self.events[..n]
    }

    /// The last event, the one the predictor learns to produce.
    pub fn target(&self) -> Option<&Event> {
        self.events.last()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Cut one file's event stream into windows of `enc.sequence_length`.
pub fn windows(events: &[Event], enc: &EncodingConfig) -> Vec<Window> {
    let len = enc.sequence_length;
    if events.is_empty() || len == 0 {
        return Vec::new();
    }
    if events.len() < len {
        let mut padded = events.to_vec();
        padded.resize(len, Event::padding(enc.max_polyphony));
        return vec![Window { events: padded }];
    }
    events
        .windows(len)
        .map(|w| Window { events: w.to_vec() })
        .collect()
}
