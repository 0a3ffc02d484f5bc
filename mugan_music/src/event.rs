// The discrete event: the atomic unit the codec, windower, predictor and
// generator all share.
//
// An event is a fixed-width tuple of `P + 2` small integers: `P` pitch slots
// followed by a duration class and a time-shift class (see `quantize.rs`).
// Each pitch slot holds a MIDI pitch (0-127), `PAD_PITCH` (no note in this
// slot) or `REST_PITCH` (silence). Three shapes are legal:
//
// - sounding: 1..P ascending distinct pitches, remaining slots `PAD_PITCH`;
// - rest: every slot `REST_PITCH`;
// - padding: every slot `PAD_PITCH`, classes 0/0. Produced only by the
//   windower when a file is shorter than one window; it decodes to nothing.
//
// Generated events can be ill-formed (a predictor may put a rest sentinel
// next to a pitch). The decoder is total over any slot contents, so the
// generator never has to repair them; `is_well_formed` is for the encoder
// side and for tests.
//
// Events serialize as a flat integer array (`[60, 64, 128, 128, 3, 5]`),
// which keeps datasets compact and mirrors the model's input layout.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Pitch slot sentinel: no note in this slot.
pub const PAD_PITCH: u8 = 128;

/// Pitch slot sentinel: the event is a rest. Valid only in every slot at once.
pub const REST_PITCH: u8 = 129;

/// Size of each pitch head's vocabulary: 128 MIDI pitches plus two sentinels.
pub const PITCH_VOCAB: usize = 130;

/// Pitch slots of one event. Inline for the default polyphony of 4.
pub type PitchSlots = SmallVec<[u8; 4]>;

/// What an event sounds like once decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// At least one slot holds a MIDI pitch.
    Sounding,
    /// No pitch, first slot is the rest sentinel.
    Rest,
    /// No pitch and not a rest: emits nothing.
    Padding,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<u8>", try_from = "Vec<u8>")]
pub struct Event {
    pub pitches: PitchSlots,
    pub duration_class: u8,
    pub time_shift_class: u8,
}

impl Event {
    /// A sounding event from an arbitrary pitch list. Keeps the `slots`
    /// lowest distinct pitches in ascending order; wider chords lose their
    /// upper notes.
    pub fn sounding(pitches: &[u8], slots: usize, duration_class: u8, time_shift_class: u8) -> Self {
        let mut sorted: SmallVec<[u8; 8]> = pitches.iter().copied().filter(|&p| p < 128).collect();
        sorted.sort_unstable();
        sorted.dedup();
        let mut slot_values: PitchSlots = sorted.into_iter().take(slots).collect();
        slot_values.resize(slots, PAD_PITCH);
        Event {
            pitches: slot_values,
            duration_class,
            time_shift_class,
        }
    }

    pub fn rest(slots: usize, duration_class: u8, time_shift_class: u8) -> Self {
        Event {
            pitches: SmallVec::from_elem(REST_PITCH, slots),
            duration_class,
            time_shift_class,
        }
    }

    /// The all-pad, zero-class event used to right-pad short windows.
    pub fn padding(slots: usize) -> Self {
        Event {
            pitches: SmallVec::from_elem(PAD_PITCH, slots),
            duration_class: 0,
            time_shift_class: 0,
        }
    }

    pub fn slots(&self) -> usize {
        self.pitches.len()
    }

    /// Slots holding real MIDI pitches, in slot order.
    pub fn valid_pitches(&self) -> impl Iterator<Item = u8> + '_ {
        self.pitches.iter().copied().filter(|&p| p < 128)
    }

    pub fn kind(&self) -> EventKind {
        if self.valid_pitches().next().is_some() {
            EventKind::Sounding
        } else if self.pitches.first() == Some(&REST_PITCH) {
            EventKind::Rest
        } else {
            EventKind::Padding
        }
    }

    /// Check the encoder-side invariants: a pure rest, or ascending distinct
    /// pitches followed only by pad slots.
    pub fn is_well_formed(&self) -> bool {
        if self.pitches.is_empty() {
            return false;
        }
        if self.pitches.iter().all(|&p| p == REST_PITCH) {
            return true;
        }
        if self.pitches.contains(&REST_PITCH) {
            return false;
        }
        let used = self.pitches.iter().take_while(|&&p| p < 128).count();
        if used == 0 {
            return false;
        }
        let ascending = self.pitches[..used].windows(2).all(|w| w[0] < w[1]);
        let padded = self.pitches[used..].iter().all(|&p| p == PAD_PITCH);
        ascending && padded
    }
}

impl From<Event> for Vec<u8> {
    fn from(event: Event) -> Self {
        let mut row: Vec<u8> = event.pitches.to_vec();
        row.push(event.duration_class);
        row.push(event.time_shift_class);
        row
    }
}

impl TryFrom<Vec<u8>> for Event {
    type Error = String;

    fn try_from(row: Vec<u8>) -> Result<Self, Self::Error> {
        if row.len() < 3 {
            return Err(format!("event row needs at least 3 values, got {}", row.len()));
        }
        let slots = row.len() - 2;
        if let Some(bad) = row[..slots].iter().find(|&&p| p as usize >= PITCH_VOCAB) {
            return Err(format!("pitch slot value {bad} is outside the vocabulary"));
        }
        Ok(Event {
            pitches: row[..slots].iter().copied().collect(),
            duration_class: row[slots],
            time_shift_class: row[slots + 1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sounding_sorts_and_pads() {
        let e = Event::sounding(&[67, 60, 64], 4, 3, 0);
        assert_eq!(e.pitches.as_slice(), &[60, 64, 67, PAD_PITCH]);
        assert!(e.is_well_formed());
        assert_eq!(e.kind(), EventKind::Sounding);
    }

    #[test]
    fn wide_chord_keeps_lowest_pitches() {
        let e = Event::sounding(&[72, 48, 60, 55, 64, 67], 4, 2, 0);
        assert_eq!(e.pitches.as_slice(), &[48, 55, 60, 64]);
    }

    #[test]
    fn duplicate_pitches_collapse() {
        let e = Event::sounding(&[60, 60, 64], 4, 2, 0);
        assert_eq!(e.pitches.as_slice(), &[60, 64, PAD_PITCH, PAD_PITCH]);
    }

    #[test]
    fn rest_and_padding_kinds() {
        assert_eq!(Event::rest(4, 3, 2).kind(), EventKind::Rest);
        assert!(Event::rest(4, 3, 2).is_well_formed());
        assert_eq!(Event::padding(4).kind(), EventKind::Padding);
        // Padding is a windower artifact, not an encoder output.
        assert!(!Event::padding(4).is_well_formed());
    }

    #[test]
    fn mixed_rest_is_ill_formed() {
        let e = Event {
            pitches: SmallVec::from_slice(&[60, REST_PITCH, PAD_PITCH, PAD_PITCH]),
            duration_class: 0,
            time_shift_class: 0,
        };
        assert!(!e.is_well_formed());
        // Still decodable: it has a valid pitch.
        assert_eq!(e.kind(), EventKind::Sounding);
    }

    #[test]
    fn gap_before_pitch_is_ill_formed() {
        let e = Event {
            pitches: SmallVec::from_slice(&[60, PAD_PITCH, 64, PAD_PITCH]),
            duration_class: 0,
            time_shift_class: 0,
        };
        assert!(!e.is_well_formed());
    }

    #[test]
    fn serializes_as_flat_row() {
        let e = Event::sounding(&[60], 4, 3, 5);
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(json, "[60,128,128,128,3,5]");
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn rejects_out_of_vocabulary_row() {
        assert!(serde_json::from_str::<Event>("[200,128,3,5]").is_err());
        assert!(serde_json::from_str::<Event>("[60,3]").is_err());
    }
}
