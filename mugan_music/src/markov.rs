// First-order Markov predictor: the baseline trained model.
//
// One count model per output head. Each pitch slot is conditioned on the same
// slot of the previous event, duration on the previous duration class, time
// shift on the previous time-shift class. A head's distribution interpolates
// the conditional table with the head's unigram:
//
//   p(x | prev) = w * cond(x | prev) + (1 - w) * unigram(x)
//
// where both tables are Laplace-smoothed over the head's full class range, so
// every class keeps non-zero mass. With no table for `prev` (unseen context,
// or an empty context) the unigram is used alone. An untrained model is
// therefore uniform.
//
// Models are saved as JSON together with the encoding they were trained
// under; loading under a different encoding revision is a configuration
// error.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{EncodingConfig, TrainingConfig};
use crate::error::{Error, Result};
use crate::event::{Event, EventKind, PITCH_VOCAB};
use crate::predictor::{HeadDistributions, Predictor};
use crate::window::Window;

/// Class index -> observed count.
type CountTable = BTreeMap<u16, f64>;

/// Counts for one output head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct HeadModel {
    /// Number of classes this head predicts over.
    size: usize,
    /// Previous class -> next-class counts.
    transitions: BTreeMap<u16, CountTable>,
    unigram: CountTable,
}

impl HeadModel {
    fn new(size: usize) -> Self {
        HeadModel {
            size,
            transitions: BTreeMap::new(),
            unigram: CountTable::new(),
        }
    }

    fn observe(&mut self, prev: Option<u16>, next: u16) {
        if usize::from(next) >= self.size {
            return;
        }
        *self.unigram.entry(next).or_insert(0.0) += 1.0;
        if let Some(prev) = prev {
            *self
                .transitions
                .entry(prev)
                .or_default()
                .entry(next)
                .or_insert(0.0) += 1.0;
        }
    }

    fn distribution(&self, prev: Option<u16>, smoothing: f64, backoff_weight: f64) -> Vec<f64> {
        let unigram = smoothed(&self.unigram, self.size, smoothing);
        let Some(table) = prev.and_then(|p| self.transitions.get(&p)) else {
            return unigram;
        };
        let cond = smoothed(table, self.size, smoothing);
        cond.iter()
            .zip(&unigram)
            .map(|(c, u)| backoff_weight * c + (1.0 - backoff_weight) * u)
            .collect()
    }

    fn observations(&self) -> f64 {
        self.unigram.values().sum()
    }
}

/// Normalize a count table over `size` classes with additive smoothing.
fn smoothed(table: &CountTable, size: usize, smoothing: f64) -> Vec<f64> {
    let total: f64 = table.values().sum::<f64>() + smoothing * size as f64;
    if total <= 0.0 {
        return vec![1.0 / size as f64; size];
    }
    (0..size)
        .map(|class| {
            let count = u16::try_from(class)
                .ok()
                .and_then(|c| table.get(&c))
                .copied()
                .unwrap_or(0.0);
            (count + smoothing) / total
        })
        .collect()
}

/// Per-head first-order transition model with unigram backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkovPredictor {
    /// Encoding the counts were collected under.
    pub encoding: EncodingConfig,
    pub smoothing: f64,
    pub backoff_weight: f64,
    pitch: Vec<HeadModel>,
    duration: HeadModel,
    time_shift: HeadModel,
    /// Windows absorbed so far.
    pub windows_seen: u64,
}

impl MarkovPredictor {
    /// An untrained (uniform) model for `encoding`.
    pub fn new(encoding: EncodingConfig, training: &TrainingConfig) -> Self {
        MarkovPredictor {
            pitch: vec![HeadModel::new(PITCH_VOCAB); encoding.max_polyphony],
            duration: HeadModel::new(encoding.duration_classes()),
            time_shift: HeadModel::new(encoding.time_shift_classes()),
            encoding,
            smoothing: training.smoothing,
            backoff_weight: training.backoff_weight,
            windows_seen: 0,
        }
    }

    /// Count the transition from `prev` into `next`. Padding targets carry no
    /// musical information and are ignored.
    pub fn observe_transition(&mut self, prev: Option<&Event>, next: &Event) {
        if next.kind() == EventKind::Padding {
            return;
        }
        for (slot, head) in self.pitch.iter_mut().enumerate() {
            let Some(&value) = next.pitches.get(slot) else {
                continue;
            };
            let prev_value = prev.and_then(|p| p.pitches.get(slot)).map(|&v| u16::from(v));
            head.observe(prev_value, u16::from(value));
        }
        self.duration.observe(
            prev.map(|p| u16::from(p.duration_class)),
            u16::from(next.duration_class),
        );
        self.time_shift.observe(
            prev.map(|p| u16::from(p.time_shift_class)),
            u16::from(next.time_shift_class),
        );
    }

    /// Absorb one training window: the transition from the last context
    /// event into the target.
    pub fn observe(&mut self, window: &Window) {
        let Some(target) = window.target() else {
            return;
        };
        self.observe_transition(window.context().last(), target);
        self.windows_seen += 1;
    }

    /// Mean NLL and argmax hits of this model on one window. `None` for
    /// windows whose target is padding.
    pub fn score(&self, window: &Window) -> Option<(f64, usize)> {
        let target = window.target()?;
        if target.kind() == EventKind::Padding {
            return None;
        }
        let dist = self.distributions(window.context());
        Some((dist.mean_nll(target), dist.argmax_hits(target)))
    }

    /// Total transitions counted on the duration head.
    pub fn observations(&self) -> f64 {
        self.duration.observations()
    }

    fn distributions(&self, context: &[Event]) -> HeadDistributions {
        let prev = context.last();
        let (s, w) = (self.smoothing, self.backoff_weight);
        HeadDistributions {
            pitch: self
                .pitch
                .iter()
                .enumerate()
                .map(|(slot, head)| {
                    let prev_value = prev.and_then(|p| p.pitches.get(slot)).map(|&v| u16::from(v));
                    head.distribution(prev_value, s, w)
                })
                .collect(),
            duration: self
                .duration
                .distribution(prev.map(|p| u16::from(p.duration_class)), s, w),
            time_shift: self
                .time_shift
                .distribution(prev.map(|p| u16::from(p.time_shift_class)), s, w),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string(self)?;
        std::fs::write(path, data)?;
        tracing::info!(
            "saved model ({} windows) to {}",
            self.windows_seen,
            path.display()
        );
        Ok(())
    }

    /// Load a model and check it was trained under `encoding`.
    pub fn load(path: &Path, encoding: &EncodingConfig) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let model: MarkovPredictor = serde_json::from_str(&data)?;
        encoding.check_version("model", model.encoding.version)?;
        if model.encoding != *encoding {
            return Err(Error::Config(format!(
                "model at {} was trained with different encoding tables",
                path.display()
            )));
        }
        if model.pitch.len() != encoding.max_polyphony {
            return Err(Error::Config(format!(
                "model at {} has {} pitch heads, expected {}",
                path.display(),
                model.pitch.len(),
                encoding.max_polyphony
            )));
        }
        Ok(model)
    }
}

impl Predictor for MarkovPredictor {
    fn predict(&self, context: &[Event]) -> Result<HeadDistributions> {
        Ok(self.distributions(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ENCODING_VERSION;
    use crate::predictor::argmax;

    fn model() -> MarkovPredictor {
        MarkovPredictor::new(EncodingConfig::default(), &TrainingConfig::default())
    }

    fn ev(pitch: u8, dur: u8, shift: u8) -> Event {
        Event::sounding(&[pitch], 4, dur, shift)
    }

    #[test]
    fn untrained_model_is_uniform() {
        let enc = EncodingConfig::default();
        let d = model().predict(&[ev(60, 3, 5)]).unwrap();
        d.check_shape(&enc).unwrap();
        let uniform = HeadDistributions::uniform(&enc);
        for (got, want) in d.heads().zip(uniform.heads()) {
            for (a, b) in got.iter().zip(want) {
                assert!((a - b).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn learns_a_transition() {
        let mut m = model();
        for _ in 0..20 {
            m.observe_transition(Some(&ev(60, 3, 5)), &ev(62, 4, 4));
        }
        let d = m.predict(&[ev(60, 3, 5)]).unwrap();
        assert_eq!(argmax(&d.pitch[0]), Some(62));
        assert_eq!(argmax(&d.duration), Some(4));
        assert_eq!(argmax(&d.time_shift), Some(4));
        d.check_shape(&m.encoding).unwrap();
        for head in d.heads() {
            assert!((head.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn unseen_context_backs_off_to_unigram() {
        let mut m = model();
        for _ in 0..10 {
            m.observe_transition(Some(&ev(60, 3, 5)), &ev(64, 3, 5));
        }
        let d = m.predict(&[ev(40, 0, 0)]).unwrap();
        assert_eq!(argmax(&d.pitch[0]), Some(64));
    }

    #[test]
    fn padding_targets_are_ignored() {
        let mut m = model();
        m.observe_transition(Some(&ev(60, 3, 5)), &Event::padding(4));
        assert_eq!(m.observations(), 0.0);
    }

    #[test]
    fn training_lowers_loss() {
        let enc = EncodingConfig::default();
        let events: Vec<Event> = (0..40).map(|i| ev(60 + (i % 2) as u8 * 4, 3, 5)).collect();
        let windows = crate::window::windows(&events, &enc);
        let mut m = model();
        let (before, _) = m.score(&windows[0]).unwrap();
        for w in &windows {
            m.observe(w);
        }
        let (after, hits) = m.score(&windows[0]).unwrap();
        assert!(after < before);
        assert_eq!(hits, 6);
        assert_eq!(m.windows_seen, windows.len() as u64);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("markov_model.json");
        let mut m = model();
        m.observe_transition(None, &ev(60, 3, 5));
        m.save(&path).unwrap();
        let loaded = MarkovPredictor::load(&path, &EncodingConfig::default()).unwrap();
        assert_eq!(loaded, m);
    }

    #[test]
    fn load_rejects_other_encoding_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        model().save(&path).unwrap();
        let other = EncodingConfig {
            version: ENCODING_VERSION + 1,
            ..Default::default()
        };
        assert!(matches!(MarkovPredictor::load(&path, &other), Err(Error::Config(_))));
    }
}
