// Event codec: occurrences to fixed-width events and back.
//
// Encoding (score -> events):
// 1. Stable-sort occurrences by onset. Sounding occurrences that share an
//    onset merge into one chord (pitch union, longest duration), so two
//    separately listed notes at the same offset become one event.
// 2. Drop rests shorter than `min_rest_duration`.
// 3. Time shift is measured onset to onset: `offset - previous_offset`,
//    with `previous_offset` starting at 0.0 and advancing to each retained
//    occurrence's onset (never to its end).
// 4. Rests fill every slot with `REST_PITCH`; notes and chords keep their
//    `P` lowest pitches ascending, padded with `PAD_PITCH`.
// 5. Duration and shift are quantized (`quantize.rs`).
//
// Decoding (events -> timed notes) keeps a running onset, advanced only by
// each event's time-shift lookup. Durations never move the onset, so
// overlapping and legato notes survive. Padding events emit nothing; rests
// emit a rest; one valid pitch emits a note; several emit a chord.
//
// A file that cannot be parsed encodes to an empty event list
// (`encode_midi_file`), and the batch driver simply skips it.

use std::path::Path;

use smallvec::SmallVec;

use crate::config::EncodingConfig;
use crate::event::{Event, EventKind};
use crate::quantize::{duration_of, quantize_duration, quantize_time_shift, time_shift_of};
use crate::score::{Occurrence, parse_midi_file};

/// Onsets closer than this are considered simultaneous when merging.
const ONSET_TOLERANCE: f64 = 1e-9;

/// What a decoded item sounds like.
#[derive(Clone, Debug, PartialEq)]
pub enum NoteContent {
    Note(u8),
    Chord(SmallVec<[u8; 4]>),
    Rest,
}

/// One decoded item: content plus onset and duration in quarter notes.
#[derive(Clone, Debug, PartialEq)]
pub struct TimedNote {
    pub offset: f64,
    pub duration: f64,
    pub content: NoteContent,
}

impl TimedNote {
    pub fn end(&self) -> f64 {
        self.offset + self.duration
    }
}

/// Encode a parsed score into events.
pub fn encode(occurrences: &[Occurrence], enc: &EncodingConfig) -> Vec<Event> {
    let mut sorted: Vec<&Occurrence> = occurrences.iter().collect();
    // `sort_by` is stable: ties keep encounter order.
    sorted.sort_by(|a, b| a.offset.total_cmp(&b.offset));

    let merged = merge_simultaneous(&sorted);
    let slots = enc.max_polyphony;
    let mut events = Vec::with_capacity(merged.len());
    let mut previous_offset = 0.0;

    for occ in merged {
        if occ.is_rest && occ.duration < enc.min_rest_duration {
            continue;
        }
        let duration_class = quantize_duration(occ.duration, enc);
        let time_shift_class = quantize_time_shift(occ.offset - previous_offset, enc);
        let event = if occ.is_rest {
            Event::rest(slots, duration_class, time_shift_class)
        } else {
            Event::sounding(&occ.pitches, slots, duration_class, time_shift_class)
        };
        events.push(event);
        previous_offset = occ.offset;
    }

    events
}

/// Fold sounding occurrences with equal onsets into single chords.
fn merge_simultaneous(sorted: &[&Occurrence]) -> Vec<Occurrence> {
    let mut merged: Vec<Occurrence> = Vec::with_capacity(sorted.len());
    // Index into `merged` of the last sounding occurrence, if it is still
    // the most recent onset.
    let mut open_chord: Option<usize> = None;

    for occ in sorted {
        if occ.is_rest || occ.pitches.is_empty() {
            merged.push(Occurrence::rest(occ.offset, occ.duration));
            continue;
        }
        if let Some(idx) = open_chord {
            let target = &mut merged[idx];
            if (target.offset - occ.offset).abs() < ONSET_TOLERANCE {
                target.pitches.extend_from_slice(&occ.pitches);
                target.pitches.sort_unstable();
                target.pitches.dedup();
                target.duration = target.duration.max(occ.duration);
                continue;
            }
        }
        merged.push((*occ).clone());
        open_chord = Some(merged.len() - 1);
    }

    merged
}

/// Parse and encode one MIDI file. Parse failures are logged and yield an
/// empty list.
pub fn encode_midi_file(path: &Path, enc: &EncodingConfig) -> Vec<Event> {
    match parse_midi_file(path) {
        Ok(occurrences) => encode(&occurrences, enc),
        Err(e) => {
            tracing::warn!("skipping {}: {e}", path.display());
            Vec::new()
        }
    }
}

/// Decode events into a timed note stream.
pub fn decode(events: &[Event], enc: &EncodingConfig) -> Vec<TimedNote> {
    let mut notes = Vec::with_capacity(events.len());
    let mut current_offset = 0.0;

    for event in events {
        current_offset += time_shift_of(event.time_shift_class, enc);
        let duration = duration_of(event.duration_class, enc);

        let content = match event.kind() {
            EventKind::Padding => continue,
            EventKind::Rest => NoteContent::Rest,
            EventKind::Sounding => {
                let valid: SmallVec<[u8; 4]> = event.valid_pitches().collect();
                if valid.len() == 1 {
                    NoteContent::Note(valid[0])
                } else {
                    NoteContent::Chord(valid)
                }
            }
        };

        notes.push(TimedNote {
            offset: current_offset,
            duration,
            content,
        });
    }

    notes
}

/// Total length of a decoded stream in quarter notes (latest end time).
pub fn total_quarters(notes: &[TimedNote]) -> f64 {
    notes.iter().map(TimedNote::end).fold(0.0, f64::max)
}
