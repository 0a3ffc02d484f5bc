// Autoregressive generator loop.
//
// Starting from a seed, repeatedly ask the predictor for the next event's
// head distributions, sample each head with temperature and append the
// result until the sequence reaches the requested length:
//
//   context  = last L-1 events of the sequence (all of them while shorter)
//   adjusted = exp(ln(p + 1e-10) / temperature), renormalized per head
//   class    = categorical sample from `adjusted`, clipped to the head range
//
// The exponent is evaluated in log space with the per-head maximum
// subtracted before `exp`, so tiny temperatures neither overflow nor collapse
// every weight to zero; as temperature approaches zero the sample converges
// to the head's argmax. Sampled events are appended as-is: the decoder
// tolerates any slot contents.
//
// The loop is sequential with one predictor call per event. Configuration is
// validated before the first call; a predictor error or a malformed output
// aborts the request. A cooperative stop flag is checked once per event and
// makes the loop return the (shorter) sequence built so far.

use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;

use crate::config::{EncodingConfig, GenerationConfig};
use crate::error::{Error, Result};
use crate::event::{Event, PITCH_VOCAB, PitchSlots};
use crate::predictor::Predictor;

/// Floor added to every probability before taking its log.
const PROB_FLOOR: f64 = 1e-10;

/// Events between progress log lines.
const PROGRESS_INTERVAL: usize = 32;

/// Draw one class from `probs` reshaped by `temperature`.
///
/// Returns 0 for an empty input and the last index for a fully degenerate
/// one; callers clip to their head range anyway.
pub fn sample_with_temperature(probs: &[f64], temperature: f64, rng: &mut impl Rng) -> usize {
    if probs.is_empty() {
        return 0;
    }
    let logits: Vec<f64> = probs
        .iter()
        .map(|&p| (p.max(0.0) + PROB_FLOOR).ln() / temperature)
        .collect();
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = logits.iter().map(|&l| (l - max).exp()).collect();
    let total: f64 = weights.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return probs.len() - 1;
    }

    let target = rng.random::<f64>() * total;
    let mut cumulative = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        cumulative += w;
        if cumulative > target {
            return i;
        }
    }
    weights.len() - 1
}

/// Clip a sampled index into `0..classes` and narrow it to a class byte.
fn clip_class(index: usize, classes: usize) -> u8 {
    let clipped = index.min(classes.saturating_sub(1));
    u8::try_from(clipped).unwrap_or(u8::MAX)
}

/// Extend `seed` to `cfg.target_length` events.
///
/// The returned sequence starts with the seed unchanged. It is shorter than
/// `target_length` only when `stop` was raised.
pub fn generate_sequence<P: Predictor + ?Sized>(
    predictor: &P,
    seed: &[Event],
    enc: &EncodingConfig,
    cfg: &GenerationConfig,
    rng: &mut impl Rng,
    stop: Option<&AtomicBool>,
) -> Result<Vec<Event>> {
    enc.validate()?;
    cfg.validate(seed.len())?;
    if let Some(bad) = seed.iter().find(|e| e.slots() != enc.max_polyphony) {
        return Err(Error::Config(format!(
            "seed event has {} pitch slots, encoding uses {}",
            bad.slots(),
            enc.max_polyphony
        )));
    }

    let context_len = enc.context_length();
    let mut generated: Vec<Event> = Vec::with_capacity(cfg.target_length);
    generated.extend_from_slice(seed);

    while generated.len() < cfg.target_length {
        if stop.is_some_and(|s| s.load(Ordering::Relaxed)) {
            tracing::info!(
                "generation stopped at {}/{} events",
                generated.len(),
                cfg.target_length
            );
            break;
        }

        let start = generated.len().saturating_sub(context_len);
        let dist = predictor.predict(&generated[start..])?;
        dist.check_shape(enc)?;

        let pitches: PitchSlots = dist
            .pitch
            .iter()
            .map(|head| {
                clip_class(sample_with_temperature(head, cfg.temperature, rng), PITCH_VOCAB)
            })
            .collect();
        let duration_class = clip_class(
            sample_with_temperature(&dist.duration, cfg.temperature, rng),
            enc.duration_classes(),
        );
        let time_shift_class = clip_class(
            sample_with_temperature(&dist.time_shift, cfg.temperature, rng),
            enc.time_shift_classes(),
        );
        generated.push(Event {
            pitches,
            duration_class,
            time_shift_class,
        });

        if generated.len() % PROGRESS_INTERVAL == 0 {
            tracing::debug!("generated {}/{} events", generated.len(), cfg.target_length);
        }
    }

    Ok(generated)
}
