// Score input: MIDI files to timed occurrences.
//
// An `Occurrence` is what the encoder consumes: a note, a chord or a rest with
// an onset offset and a duration, both in quarter notes. This module is the
// score parser in front of the codec. It reads a Standard MIDI File with
// `midly` and flattens every track into one occurrence list:
//
// - Tick times are converted to quarter notes with the header's
//   ticks-per-quarter. SMPTE-timed files have no quarter-note grid and are
//   rejected.
// - Notes pair on (channel, key). Note-on with velocity 0 counts as
//   note-off. A re-struck key closes the previous instance on that channel
//   first. Notes still sounding at end-of-track end there.
// - The General MIDI drum channel (10, zero-based 9) is skipped.
// - Notes starting on the same tick (in any track) form one chord, whose
//   duration is the longest member. A pitch doubled across channels appears
//   once.
// - Every stretch where no note sounds at all becomes a rest occurrence.
//   Very short rests are kept here; the encoder decides what is noise.

use std::collections::BTreeMap;
use std::path::Path;

use midly::{MidiMessage, Smf, Timing, TrackEventKind};

use crate::error::{Error, Result};

/// One musical occurrence of a parsed score.
#[derive(Clone, Debug, PartialEq)]
pub struct Occurrence {
    /// Sounding pitches, empty for a rest.
    pub pitches: Vec<u8>,
    /// Onset in quarter notes from the start of the score.
    pub offset: f64,
    /// Length in quarter notes.
    pub duration: f64,
    pub is_rest: bool,
}

impl Occurrence {
    pub fn note(pitch: u8, offset: f64, duration: f64) -> Self {
        Occurrence {
            pitches: vec![pitch],
            offset,
            duration,
            is_rest: false,
        }
    }

    pub fn chord(pitches: &[u8], offset: f64, duration: f64) -> Self {
        let mut pitches = pitches.to_vec();
        pitches.sort_unstable();
        Occurrence {
            pitches,
            offset,
            duration,
            is_rest: false,
        }
    }

    pub fn rest(offset: f64, duration: f64) -> Self {
        Occurrence {
            pitches: Vec::new(),
            offset,
            duration,
            is_rest: true,
        }
    }
}

/// Zero-based channel the General MIDI percussion map lives on.
const DRUM_CHANNEL: u8 = 9;

/// A note with absolute tick bounds, before chord grouping.
#[derive(Clone, Copy, Debug)]
struct TickNote {
    start: u64,
    end: u64,
    pitch: u8,
}

/// Parse a MIDI file into occurrences.
pub fn parse_midi_file(path: &Path) -> Result<Vec<Occurrence>> {
    let data = std::fs::read(path)?;
    parse_midi_bytes(&data).map_err(|e| match e {
        Error::Parse(msg) => Error::Parse(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Parse an in-memory Standard MIDI File into occurrences.
pub fn parse_midi_bytes(data: &[u8]) -> Result<Vec<Occurrence>> {
    let smf = Smf::parse(data)?;
    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(tpq) => f64::from(tpq.as_int()),
        Timing::Timecode(..) => {
            return Err(Error::Parse("timecode-based timing is not supported".into()));
        }
    };
    if ticks_per_quarter <= 0.0 {
        return Err(Error::Parse("header declares zero ticks per quarter note".into()));
    }

    let mut notes: Vec<TickNote> = Vec::new();
    for track in &smf.tracks {
        let mut tick: u64 = 0;
        let mut active: BTreeMap<(u8, u8), u64> = BTreeMap::new();

        for event in track {
            tick += u64::from(event.delta.as_int());
            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let channel = channel.as_int();
            if channel == DRUM_CHANNEL {
                continue;
            }
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    let pitch = key.as_int();
                    if let Some(start) = active.insert((channel, pitch), tick) {
                        notes.push(TickNote { start, end: tick, pitch });
                    }
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    let pitch = key.as_int();
                    if let Some(start) = active.remove(&(channel, pitch)) {
                        notes.push(TickNote { start, end: tick, pitch });
                    }
                }
                _ => {}
            }
        }

        for ((_, pitch), start) in active {
            notes.push(TickNote { start, end: tick, pitch });
        }
    }

    notes.retain(|n| n.end > n.start);
    notes.sort_by_key(|n| (n.start, n.pitch));
    Ok(group_occurrences(&notes, ticks_per_quarter))
}

/// Group same-tick notes into chords and fill silent stretches with rests.
fn group_occurrences(notes: &[TickNote], ticks_per_quarter: f64) -> Vec<Occurrence> {
    let to_quarters = |ticks: u64| ticks as f64 / ticks_per_quarter;
    let mut occurrences = Vec::new();
    let mut sounding_until: u64 = 0;

    let mut i = 0;
    while i < notes.len() {
        let start = notes[i].start;
        let mut j = i;
        let mut end = start;
        let mut pitches: Vec<u8> = Vec::new();
        while j < notes.len() && notes[j].start == start {
            if pitches.last() != Some(&notes[j].pitch) {
                pitches.push(notes[j].pitch);
            }
            end = end.max(notes[j].end);
            j += 1;
        }

        if start > sounding_until {
            occurrences.push(Occurrence::rest(
                to_quarters(sounding_until),
                to_quarters(start - sounding_until),
            ));
        }

        let offset = to_quarters(start);
        let duration = to_quarters(end - start);
        if pitches.len() == 1 {
            occurrences.push(Occurrence::note(pitches[0], offset, duration));
        } else {
            occurrences.push(Occurrence::chord(&pitches, offset, duration));
        }

        sounding_until = sounding_until.max(end);
        i = j;
    }

    occurrences
}
