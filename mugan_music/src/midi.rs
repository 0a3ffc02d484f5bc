// MIDI output from decoded note streams.
//
// Converts the decoder's timed notes into a single-track Standard MIDI File:
// tempo, track name (the instrument), one program change, then note-on /
// note-off pairs for every note and chord member. Rests emit nothing; time
// simply passes. Offsets and durations are in quarter notes and map to ticks
// at a fixed resolution.
//
// Uses the `midly` crate for MIDI writing. Output is SMF Format 0.

use std::path::Path;

use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};

use crate::codec::{NoteContent, TimedNote};
use crate::error::{Error, Result};

/// Ticks per quarter note in MIDI output.
const TICKS_PER_QUARTER: u16 = 480;

const CHANNEL: u8 = 0;
const VELOCITY: u8 = 80;

/// General MIDI program for an instrument name. Unknown names get piano.
pub fn program_for(instrument: &str) -> u8 {
    match instrument.trim().to_ascii_lowercase().as_str() {
        "violin" => 40,
        "flute" => 73,
        _ => 0,
    }
}

/// Convert timed notes to MIDI and write to a file.
pub fn write_midi(notes: &[TimedNote], tempo_bpm: u16, instrument: &str, path: &Path) -> Result<()> {
    let buf = midi_bytes(notes, tempo_bpm, instrument)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &buf)
        .map_err(|e| Error::Midi(format!("writing {}: {e}", path.display())))?;
    Ok(())
}

/// Serialize timed notes as SMF bytes.
pub fn midi_bytes(notes: &[TimedNote], tempo_bpm: u16, instrument: &str) -> Result<Vec<u8>> {
    if tempo_bpm == 0 {
        return Err(Error::Midi("tempo must be > 0".into()));
    }
    let smf = notes_to_smf(notes, tempo_bpm, instrument);
    let mut buf = Vec::new();
    smf.write(&mut buf)
        .map_err(|e| Error::Midi(format!("encoding SMF: {e}")))?;
    Ok(buf)
}

fn to_ticks(quarters: f64) -> u64 {
    if quarters.is_finite() && quarters > 0.0 {
        (quarters * f64::from(TICKS_PER_QUARTER)).round() as u64
    } else {
        0
    }
}

/// One note-on or note-off at an absolute tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Placed {
    tick: u64,
    /// Note-offs sort before note-ons on the same tick.
    is_on: bool,
    pitch: u8,
}

/// Convert timed notes to an in-memory SMF.
fn notes_to_smf<'a>(notes: &[TimedNote], tempo_bpm: u16, instrument: &'a str) -> Smf<'a> {
    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));
    let channel = u4::new(CHANNEL);
    let mut track: Track<'a> = Vec::new();

    let tempo_microseconds = (60_000_000 / u32::from(tempo_bpm)).min(0xFF_FFFF);
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_microseconds))),
    });
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(instrument.as_bytes())),
    });
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Midi {
            channel,
            message: MidiMessage::ProgramChange {
                program: u7::new(program_for(instrument)),
            },
        },
    });

    let mut placed: Vec<Placed> = Vec::new();
    for note in notes {
        let pitches: &[u8] = match &note.content {
            NoteContent::Note(p) => std::slice::from_ref(p),
            NoteContent::Chord(ps) => ps.as_slice(),
            NoteContent::Rest => continue,
        };
        let start = to_ticks(note.offset);
        let end = to_ticks(note.end()).max(start + 1);
        for &pitch in pitches.iter().filter(|&&p| p < 128) {
            placed.push(Placed { tick: start, is_on: true, pitch });
            placed.push(Placed { tick: end, is_on: false, pitch });
        }
    }
    placed.sort();

    let mut last_tick = 0u64;
    for p in placed {
        let delta = u32::try_from(p.tick - last_tick).unwrap_or(u32::MAX).min(0x0FFF_FFFF);
        last_tick = p.tick;
        let key = u7::new(p.pitch);
        let message = if p.is_on {
            MidiMessage::NoteOn {
                key,
                vel: u7::new(VELOCITY),
            }
        } else {
            MidiMessage::NoteOff { key, vel: u7::new(0) }
        };
        track.push(TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi { channel, message },
        });
    }

    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    smf.tracks.push(track);
    smf
}
