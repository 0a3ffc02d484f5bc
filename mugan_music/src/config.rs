// Data-driven pipeline configuration.
//
// Every tunable the codec, generator and trainer read lives here, loaded from
// JSON (or defaulted when no file is given). Nothing downstream hard-codes
// vocabulary sizes: the number of duration and time-shift classes is the
// length of the respective table in `EncodingConfig`, and the encoding
// carries a `version` that is stamped into every persisted artifact
// (datasets, Markov models, generated catalog records) so that an artifact
// produced under one vocabulary is never silently read under another.
//
// Groups:
// - `EncodingConfig`: event vocabulary (polyphony, tables, quantization
//   margin, rest threshold, window length).
// - `GenerationConfig`: sampling temperature, output length, MIDI rendering.
// - `TrainingConfig`: epoch count, smoothing, train/validation split.
// - `PathsConfig`: on-disk layout and the soundfont for audio rendering.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Current encoding revision. Bump whenever a table or the slot layout changes.
pub const ENCODING_VERSION: u32 = 4;

/// Versioned description of the discrete event vocabulary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Encoding revision stamped into persisted artifacts.
    pub version: u32,
    /// Window length `L`. Model input is the first `L - 1` events.
    pub sequence_length: usize,
    /// Polyphony slots `P` per event.
    pub max_polyphony: usize,
    /// Duration per class, in quarter notes. Strictly increasing.
    pub duration_table: Vec<f64>,
    /// Onset-to-onset gap per class, in quarter notes. Strictly increasing,
    /// first entry is the exact-zero class.
    pub time_shift_table: Vec<f64>,
    /// A value lands in the first class whose table entry times `margin`
    /// exceeds it.
    pub margin: f64,
    /// Time shifts below this collapse to class 0.
    pub time_shift_epsilon: f64,
    /// Rests shorter than this are dropped by the encoder.
    pub min_rest_duration: f64,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            version: ENCODING_VERSION,
            sequence_length: 32,
            max_polyphony: 4,
            duration_table: vec![0.125, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0],
            time_shift_table: vec![0.0, 0.0625, 0.125, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0],
            margin: 1.5,
            time_shift_epsilon: 0.0625,
            min_rest_duration: 0.25,
        }
    }
}

impl EncodingConfig {
    /// Number of duration classes `D`.
    pub fn duration_classes(&self) -> usize {
        self.duration_table.len()
    }

    /// Number of time-shift classes `T`.
    pub fn time_shift_classes(&self) -> usize {
        self.time_shift_table.len()
    }

    /// Events fed to the predictor per step (`L - 1`).
    pub fn context_length(&self) -> usize {
        self.sequence_length.saturating_sub(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sequence_length < 2 {
            return Err(Error::Config(format!(
                "sequence_length must be at least 2, got {}",
                self.sequence_length
            )));
        }
        if self.max_polyphony == 0 {
            return Err(Error::Config("max_polyphony must be at least 1".into()));
        }
        check_table("duration_table", &self.duration_table, 256)?;
        check_table("time_shift_table", &self.time_shift_table, 256)?;
        if self.margin.is_nan() || self.margin <= 1.0 || self.margin.is_infinite() {
            return Err(Error::Config(format!("margin must be > 1, got {}", self.margin)));
        }
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;
        if !non_negative(self.time_shift_epsilon) || !non_negative(self.min_rest_duration) {
            return Err(Error::Config(
                "time_shift_epsilon and min_rest_duration must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Fail with a configuration error if an artifact was produced under a
    /// different encoding revision.
    pub fn check_version(&self, artifact: &str, version: u32) -> Result<()> {
        if version != self.version {
            return Err(Error::Config(format!(
                "{artifact} uses encoding version {version}, expected {}",
                self.version
            )));
        }
        Ok(())
    }
}

/// Tables must be non-empty, finite, non-negative, strictly increasing, and
/// small enough for a `u8` class index.
fn check_table(name: &str, table: &[f64], max_len: usize) -> Result<()> {
    if table.is_empty() || table.len() > max_len {
        return Err(Error::Config(format!(
            "{name} must have between 1 and {max_len} entries, got {}",
            table.len()
        )));
    }
    if table.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(Error::Config(format!("{name} entries must be finite and >= 0")));
    }
    if table.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::Config(format!("{name} must be strictly increasing")));
    }
    Ok(())
}

/// Sampling and rendering parameters for one generation request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// < 1 sharpens the predicted distributions, > 1 flattens them.
    pub temperature: f64,
    /// Total events in the output, seed included.
    pub target_length: usize,
    pub tempo_bpm: u16,
    pub instrument: String,
    /// RNG seed for reproducible output. `None` draws from the OS.
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            target_length: 256,
            tempo_bpm: 120,
            instrument: "Piano".into(),
            seed: None,
        }
    }
}

impl GenerationConfig {
    /// Reject settings that would make the generator loop meaningless.
    /// `seed_len` is the length of the seed window the loop will start from.
    pub fn validate(&self, seed_len: usize) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(Error::Config(format!(
                "temperature must be a finite value > 0, got {}",
                self.temperature
            )));
        }
        if self.target_length < seed_len {
            return Err(Error::Config(format!(
                "target_length {} is shorter than the seed ({seed_len} events)",
                self.target_length
            )));
        }
        if self.tempo_bpm == 0 {
            return Err(Error::Config("tempo_bpm must be > 0".into()));
        }
        Ok(())
    }
}

/// Parameters for the training harness.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: u32,
    /// Reported alongside the stats; windows are absorbed shard by shard.
    pub batch_size: usize,
    /// Additive (Laplace) smoothing applied to every count table.
    pub smoothing: f64,
    /// Weight of the conditional table against the unigram when both exist.
    pub backoff_weight: f64,
    /// Fraction of windows kept for training; the rest is validation.
    pub train_split: f64,
    /// Cap on corpus files processed. `None` processes everything.
    pub max_files: Option<usize>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 32,
            smoothing: 0.01,
            backoff_weight: 0.8,
            train_split: 0.9,
            max_files: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::Config("epochs must be at least 1".into()));
        }
        if !self.smoothing.is_finite() || self.smoothing <= 0.0 {
            return Err(Error::Config("smoothing must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.backoff_weight) {
            return Err(Error::Config("backoff_weight must be in [0, 1]".into()));
        }
        if self.train_split.is_nan() || self.train_split <= 0.0 || self.train_split > 1.0 {
            return Err(Error::Config("train_split must be in (0, 1]".into()));
        }
        Ok(())
    }
}

/// On-disk layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Raw MIDI corpus.
    pub data_dir: PathBuf,
    /// Preprocessed datasets.
    pub processed_dir: PathBuf,
    /// Trained predictors.
    pub models_dir: PathBuf,
    /// Generated MIDI and rendered audio.
    pub generated_dir: PathBuf,
    /// Soundfont for audio rendering. Falls back to `SOUNDFONT_PATH`.
    pub soundfont: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            processed_dir: PathBuf::from("data/processed"),
            models_dir: PathBuf::from("models"),
            generated_dir: PathBuf::from("generated"),
            soundfont: None,
        }
    }
}

impl PathsConfig {
    pub fn soundfont(&self) -> Option<PathBuf> {
        self.soundfont
            .clone()
            .or_else(|| std::env::var_os("SOUNDFONT_PATH").map(PathBuf::from))
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.processed_dir.join("dataset.json")
    }

    pub fn model_path(&self) -> PathBuf {
        self.models_dir.join("markov_model.json")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join("catalog.json")
    }
}

/// Complete configuration, as loaded from a JSON file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuganConfig {
    pub encoding: EncodingConfig,
    pub generation: GenerationConfig,
    pub training: TrainingConfig,
    pub paths: PathsConfig,
}

impl MuganConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: MuganConfig = serde_json::from_str(&data)?;
        config.encoding.validate()?;
        config.training.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_encoding_is_valid() {
        let enc = EncodingConfig::default();
        enc.validate().unwrap();
        assert_eq!(enc.duration_classes(), 8);
        assert_eq!(enc.time_shift_classes(), 9);
        assert_eq!(enc.context_length(), 31);
    }

    #[test]
    fn rejects_short_sequence_length() {
        let enc = EncodingConfig {
            sequence_length: 1,
            ..Default::default()
        };
        assert!(matches!(enc.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_non_increasing_table() {
        let enc = EncodingConfig {
            duration_table: vec![0.5, 0.25],
            ..Default::default()
        };
        assert!(enc.validate().is_err());
    }

    #[test]
    fn generation_rejects_bad_temperature() {
        for t in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let cfg = GenerationConfig {
                temperature: t,
                ..Default::default()
            };
            assert!(cfg.validate(32).is_err(), "temperature {t} should be rejected");
        }
    }

    #[test]
    fn generation_rejects_target_shorter_than_seed() {
        let cfg = GenerationConfig {
            target_length: 10,
            ..Default::default()
        };
        assert!(cfg.validate(32).is_err());
        assert!(cfg.validate(10).is_ok());
    }

    #[test]
    fn version_mismatch_is_config_error() {
        let enc = EncodingConfig::default();
        assert!(enc.check_version("model", ENCODING_VERSION).is_ok());
        assert!(matches!(enc.check_version("model", 1), Err(Error::Config(_))));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{ "generation": { "temperature": 1.2 } }"#;
        let cfg: MuganConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.generation.temperature, 1.2);
        assert_eq!(cfg.generation.target_length, 256);
        assert_eq!(cfg.encoding, EncodingConfig::default());
    }
}
