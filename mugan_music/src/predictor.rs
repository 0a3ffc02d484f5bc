// The predictor seam: anything that maps a context of events to per-head
// probability distributions for the next event.
//
// There are `P + 2` heads: one per pitch slot (over the 130-value pitch
// vocabulary), one over duration classes, one over time-shift classes. The
// generator treats the predictor as a read-only shared resource, so
// implementations must be `Send + Sync` and deterministic for a given input;
// all randomness lives in the sampler.
//
// `markov.rs` provides the trained implementation. `UniformPredictor` is the
// untrained baseline.

use crate::config::EncodingConfig;
use crate::error::{Error, Result};
use crate::event::{Event, PITCH_VOCAB};

/// Per-head probability vectors for the next event.
#[derive(Clone, Debug, PartialEq)]
pub struct HeadDistributions {
    /// One distribution per pitch slot, each of length `PITCH_VOCAB`.
    pub pitch: Vec<Vec<f64>>,
    /// Over duration classes.
    pub duration: Vec<f64>,
    /// Over time-shift classes.
    pub time_shift: Vec<f64>,
}

impl HeadDistributions {
    /// Every head uniform.
    pub fn uniform(enc: &EncodingConfig) -> Self {
        let flat = |n: usize| vec![1.0 / n as f64; n];
        HeadDistributions {
            pitch: vec![flat(PITCH_VOCAB); enc.max_polyphony],
            duration: flat(enc.duration_classes()),
            time_shift: flat(enc.time_shift_classes()),
        }
    }

    /// Heads in output order: pitch slots, then duration, then time shift.
    pub fn heads(&self) -> impl Iterator<Item = &[f64]> {
        self.pitch
            .iter()
            .map(Vec::as_slice)
            .chain([self.duration.as_slice(), self.time_shift.as_slice()])
    }

    /// Verify head count and sizes against the encoding, and that every
    /// entry is a finite non-negative number with a positive total.
    pub fn check_shape(&self, enc: &EncodingConfig) -> Result<()> {
        if self.pitch.len() != enc.max_polyphony {
            return Err(Error::Predictor(format!(
                "expected {} pitch heads, got {}",
                enc.max_polyphony,
                self.pitch.len()
            )));
        }
        let expected = std::iter::repeat_n(PITCH_VOCAB, enc.max_polyphony)
            .chain([enc.duration_classes(), enc.time_shift_classes()]);
        for (head, (dist, size)) in self.heads().zip(expected).enumerate() {
            if dist.len() != size {
                return Err(Error::Predictor(format!(
                    "head {head} has {} classes, expected {size}",
                    dist.len()
                )));
            }
            if dist.iter().any(|p| !p.is_finite() || *p < 0.0) {
                return Err(Error::Predictor(format!("head {head} has invalid probabilities")));
            }
            if dist.iter().sum::<f64>() <= 0.0 {
                return Err(Error::Predictor(format!("head {head} has zero total mass")));
            }
        }
        Ok(())
    }

    /// Target class per head, in `heads()` order.
    fn target_classes(target: &Event) -> impl Iterator<Item = usize> + '_ {
        target
            .pitches
            .iter()
            .map(|&p| p as usize)
            .chain([target.duration_class as usize, target.time_shift_class as usize])
    }

    /// Mean negative log-likelihood of `target` across heads.
    pub fn mean_nll(&self, target: &Event) -> f64 {
        let mut total = 0.0;
        let mut heads = 0usize;
        for (dist, class) in self.heads().zip(Self::target_classes(target)) {
            let mass: f64 = dist.iter().sum();
            let p = dist.get(class).copied().unwrap_or(0.0) / mass.max(f64::MIN_POSITIVE);
            total -= (p + 1e-10).ln();
            heads += 1;
        }
        if heads == 0 { 0.0 } else { total / heads as f64 }
    }

    /// Number of heads whose most probable class equals the target's.
    pub fn argmax_hits(&self, target: &Event) -> usize {
        self.heads()
            .zip(Self::target_classes(target))
            .filter(|(dist, class)| argmax(dist) == Some(*class))
            .count()
    }
}

/// Index of the largest entry; the first one wins ties.
pub fn argmax(dist: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &p) in dist.iter().enumerate() {
        match best {
            Some((_, b)) if p <= b => {}
            _ => best = Some((i, p)),
        }
    }
    best.map(|(i, _)| i)
}

/// Next-event model. Implementations are shared read-only across requests.
pub trait Predictor: Send + Sync {
    /// Distributions for the event following `context`.
    fn predict(&self, context: &[Event]) -> Result<HeadDistributions>;
}

/// Untrained baseline: every head uniform, whatever the context.
#[derive(Clone, Debug)]
pub struct UniformPredictor {
    encoding: EncodingConfig,
}

impl UniformPredictor {
    pub fn new(encoding: EncodingConfig) -> Self {
        UniformPredictor { encoding }
    }
}

impl Predictor for UniformPredictor {
    fn predict(&self, _context: &[Event]) -> Result<HeadDistributions> {
        Ok(HeadDistributions::uniform(&self.encoding))
    }
}
