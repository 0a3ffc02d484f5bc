// Random seed windows for generation without source material.
//
// A seed is `L` independent events. Each event has one pitch drawn from the
// mid register (MIDI 50-90) and up to three more behind independent coin
// flips of decreasing probability, so most seeds are melody-with-dyads and
// dense chords are rare. Pitches are sorted and deduplicated by
// `Event::sounding`; duration and time-shift classes are uniform over their
// tables.

use std::ops::RangeInclusive;

use rand::Rng;

use crate::config::EncodingConfig;
use crate::event::Event;

/// Register seed pitches are drawn from.
pub const SEED_PITCH_RANGE: RangeInclusive<u8> = 50..=90;

/// Probability that slots 2, 3 and 4 receive a pitch.
const EXTRA_SLOT_CHANCES: [f64; 3] = [0.7, 0.3, 0.1];

/// One random seed event.
pub fn sample_seed_event(enc: &EncodingConfig, rng: &mut impl Rng) -> Event {
    let mut pitches = vec![rng.random_range(SEED_PITCH_RANGE)];
    for &chance in EXTRA_SLOT_CHANCES.iter().take(enc.max_polyphony.saturating_sub(1)) {
        if rng.random_bool(chance) {
            pitches.push(rng.random_range(SEED_PITCH_RANGE));
        }
    }
    let duration_class = class_index(rng.random_range(0..enc.duration_classes()));
    let time_shift_class = class_index(rng.random_range(0..enc.time_shift_classes()));
    Event::sounding(&pitches, enc.max_polyphony, duration_class, time_shift_class)
}

/// A full seed window of `enc.sequence_length` events.
pub fn sample_seed(enc: &EncodingConfig, rng: &mut impl Rng) -> Vec<Event> {
    (0..enc.sequence_length)
        .map(|_| sample_seed_event(enc, rng))
        .collect()
}

fn class_index(i: usize) -> u8 {
    u8::try_from(i).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, PAD_PITCH};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn seed_has_window_length_and_valid_events() {
        let enc = EncodingConfig::default();
        let mut rng = StdRng::seed_from_u64(17);
        let seed = sample_seed(&enc, &mut rng);
        assert_eq!(seed.len(), 32);
        for e in &seed {
            assert!(e.is_well_formed(), "{e:?}");
            assert_eq!(e.kind(), EventKind::Sounding);
            assert!(e.valid_pitches().all(|p| SEED_PITCH_RANGE.contains(&p)));
            assert!(usize::from(e.duration_class) < 8);
            assert!(usize::from(e.time_shift_class) < 9);
        }
    }

    #[test]
    fn extra_slots_thin_out() {
        let enc = EncodingConfig::default();
        let mut rng = StdRng::seed_from_u64(99);
        let mut filled = [0usize; 4];
        for _ in 0..2000 {
            let e = sample_seed_event(&enc, &mut rng);
            for (slot, &p) in e.pitches.iter().enumerate() {
                if p != PAD_PITCH {
                    filled[slot] += 1;
                }
            }
        }
        assert_eq!(filled[0], 2000);
        assert!(filled[0] > filled[1] && filled[1] > filled[2] && filled[2] > filled[3]);
    }

    #[test]
    fn deterministic_for_fixed_rng_seed() {
        let enc = EncodingConfig::default();
        let a = sample_seed(&enc, &mut StdRng::seed_from_u64(5));
        let b = sample_seed(&enc, &mut StdRng::seed_from_u64(5));
        assert_eq!(a, b);
    }
}
