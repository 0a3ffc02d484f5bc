// Corpus preprocessing: a directory of MIDI files to a windowed dataset.
//
// Steps:
// 1. Collect `.mid` / `.midi` files (any case) recursively, sorted and
//    deduplicated, optionally capped.
// 2. Encode every file in parallel with rayon. Unparseable files encode to
//    nothing and are skipped. A raised stop flag makes the remaining files
//    encode to nothing as well (cancellation at file granularity).
// 3. Window each file's stream on its own, shuffle all windows together and
//    split by `train_split`.
// 4. Collect summary statistics.
//
// The resulting `Dataset` is persisted as one JSON file carrying the
// encoding it was built with.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::codec::encode_midi_file;
use crate::config::{EncodingConfig, TrainingConfig};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::window::{Window, windows};

/// Summary of one preprocessing run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_midi_files: usize,
    /// Files that produced at least one event.
    pub files_used: usize,
    pub total_sequences: usize,
    pub train_sequences: usize,
    pub val_sequences: usize,
    pub sequence_length: usize,
    pub min_pitch: Option<u8>,
    pub max_pitch: Option<u8>,
    pub avg_pitch: Option<f64>,
    pub total_events: usize,
}

/// Train and validation windows plus the encoding that produced them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub encoding: EncodingConfig,
    pub stats: DatasetStats,
    pub train: Vec<Window>,
    pub validation: Vec<Window>,
}

impl Dataset {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string(self)?)?;
        tracing::info!(
            "saved dataset ({} train / {} validation windows) to {}",
            self.train.len(),
            self.validation.len(),
            path.display()
        );
        Ok(())
    }

    /// Load a dataset and check it was built under `encoding`.
    pub fn load(path: &Path, encoding: &EncodingConfig) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let dataset: Dataset = serde_json::from_str(&data)?;
        encoding.check_version("dataset", dataset.encoding.version)?;
        Ok(dataset)
    }
}

fn is_midi(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mid") || e.eq_ignore_ascii_case("midi"))
}

/// All MIDI files under `dir`, sorted, capped at `max_files`.
pub fn collect_midi_files(dir: &Path, max_files: Option<usize>) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::Config(format!("{} is not a directory", dir.display())));
    }
    let mut found = BTreeSet::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_midi(&path) {
                found.insert(path);
            }
        }
    }
    let mut files: Vec<PathBuf> = found.into_iter().collect();
    if let Some(cap) = max_files {
        files.truncate(cap);
    }
    tracing::info!("found {} MIDI files under {}", files.len(), dir.display());
    Ok(files)
}

/// Encode files in parallel; output order follows `files`.
pub fn encode_files(
    files: &[PathBuf],
    enc: &EncodingConfig,
    stop: Option<&AtomicBool>,
) -> Vec<Vec<Event>> {
    files
        .par_iter()
        .map(|path| {
            if stop.is_some_and(|s| s.load(Ordering::Relaxed)) {
                return Vec::new();
            }
            encode_midi_file(path, enc)
        })
        .collect()
}

/// Window, shuffle and split per-file event streams.
pub fn build_dataset(
    streams: &[Vec<Event>],
    total_files: usize,
    enc: &EncodingConfig,
    training: &TrainingConfig,
    rng: &mut impl Rng,
) -> Dataset {
    let mut all: Vec<Window> = streams.iter().flat_map(|s| windows(s, enc)).collect();
    all.shuffle(rng);

    let split = ((all.len() as f64) * training.train_split).floor() as usize;
    let validation = all.split_off(split.min(all.len()));

    let pitches: Vec<u8> = streams
        .iter()
        .flatten()
        .flat_map(|e| e.valid_pitches())
        .collect();
    let avg_pitch = (!pitches.is_empty())
        .then(|| pitches.iter().map(|&p| f64::from(p)).sum::<f64>() / pitches.len() as f64);

    let stats = DatasetStats {
        total_midi_files: total_files,
        files_used: streams.iter().filter(|s| !s.is_empty()).count(),
        total_sequences: all.len() + validation.len(),
        train_sequences: all.len(),
        val_sequences: validation.len(),
        sequence_length: enc.sequence_length,
        min_pitch: pitches.iter().copied().min(),
        max_pitch: pitches.iter().copied().max(),
        avg_pitch,
        total_events: streams.iter().map(Vec::len).sum(),
    };

    Dataset {
        encoding: enc.clone(),
        stats,
        train: all,
        validation,
    }
}

/// Full preprocessing run over `data_dir`.
pub fn preprocess(
    data_dir: &Path,
    enc: &EncodingConfig,
    training: &TrainingConfig,
    rng: &mut impl Rng,
    stop: Option<&AtomicBool>,
) -> Result<Dataset> {
    enc.validate()?;
    training.validate()?;
    let files = collect_midi_files(data_dir, training.max_files)?;
    let streams = encode_files(&files, enc, stop);
    let dataset = build_dataset(&streams, files.len(), enc, training, rng);
    tracing::info!(
        "preprocessed {} of {} files into {} windows",
        dataset.stats.files_used,
        dataset.stats.total_midi_files,
        dataset.stats.total_sequences
    );
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use crate::midi::write_midi;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn melody(n: usize) -> Vec<Event> {
        (0..n)
            .map(|i| Event::sounding(&[60 + (i % 7) as u8], 4, 3, 5))
            .collect()
    }

    #[test]
    fn collects_midi_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        for name in ["x.mid", "y.MIDI", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::write(nested.join("z.Mid"), b"").unwrap();

        let files = collect_midi_files(dir.path(), None).unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(collect_midi_files(dir.path(), Some(2)).unwrap().len(), 2);
        assert!(collect_midi_files(&dir.path().join("missing"), None).is_err());
    }

    #[test]
    fn split_and_stats() {
        let enc = EncodingConfig::default();
        let training = TrainingConfig::default();
        let streams = vec![melody(41), Vec::new(), melody(10)];
        let mut rng = StdRng::seed_from_u64(1);
        let ds = build_dataset(&streams, 3, &enc, &training, &mut rng);

        // 41 - 32 + 1 = 10 sliding windows plus one padded window.
        assert_eq!(ds.stats.total_sequences, 11);
        assert_eq!(ds.stats.train_sequences, 9);
        assert_eq!(ds.stats.val_sequences, 2);
        assert_eq!(ds.stats.files_used, 2);
        assert_eq!(ds.stats.total_events, 51);
        assert_eq!(ds.stats.min_pitch, Some(60));
        assert_eq!(ds.stats.max_pitch, Some(66));
        assert!(ds.train.iter().chain(&ds.validation).all(|w| w.len() == 32));
    }

    #[test]
    fn empty_corpus_has_no_windows() {
        let enc = EncodingConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let ds = build_dataset(&[], 0, &enc, &TrainingConfig::default(), &mut rng);
        assert_eq!(ds.stats.total_sequences, 0);
        assert_eq!(ds.stats.avg_pitch, None);
    }

    #[test]
    fn preprocess_skips_broken_files_and_round_trips() {
        let enc = EncodingConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let notes = decode(&melody(40), &enc);
        write_midi(&notes, 120, "Piano", &dir.path().join("good.mid")).unwrap();
        std::fs::write(dir.path().join("broken.mid"), b"nope").unwrap();

        let mut rng = StdRng::seed_from_u64(4);
        let ds = preprocess(dir.path(), &enc, &TrainingConfig::default(), &mut rng, None).unwrap();
        assert_eq!(ds.stats.total_midi_files, 2);
        assert_eq!(ds.stats.files_used, 1);
        // The decoded melody starts one quarter in, which parses as a leading rest.
        assert_eq!(ds.stats.total_events, 41);
        assert_eq!(ds.stats.total_sequences, 41 - 32 + 1);

        let path = dir.path().join("processed").join("dataset.json");
        ds.save(&path).unwrap();
        let loaded = Dataset::load(&path, &enc).unwrap();
        assert_eq!(loaded.train, ds.train);
        assert_eq!(loaded.validation, ds.validation);
        assert_eq!(loaded.encoding, enc);
    }

    #[test]
    fn raised_stop_flag_skips_files() {
        let enc = EncodingConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mid");
        write_midi(&decode(&melody(8), &enc), 120, "Piano", &path).unwrap();
        let stop = AtomicBool::new(true);
        let streams = encode_files(&[path], &enc, Some(&stop));
        assert_eq!(streams, vec![Vec::<Event>::new()]);
    }
}
