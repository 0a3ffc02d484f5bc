// End-to-end generation: request in, MIDI file and catalog record out.
//
// Validates the request, samples a random seed window, runs the generator
// loop, decodes the events, writes the MIDI file under the generated
// directory and builds the `MusicItem` describing it. Nothing here is shared
// between requests except the read-only predictor, so concurrent requests
// are independent.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::catalog::{MusicItem, Split, stable_id};
use crate::codec::{decode, total_quarters};
use crate::config::{EncodingConfig, GenerationConfig};
use crate::error::Result;
use crate::generate::generate_sequence;
use crate::midi::write_midi;
use crate::predictor::Predictor;
use crate::seed::sample_seed;
use crate::stamp::{random_uuid, unix_now};

const DEFAULT_COMPOSER: &str = "MuGAN";

/// One generation request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub title: Option<String>,
    pub composer: Option<String>,
    #[serde(default)]
    pub params: GenerationConfig,
}

/// A finished generation.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedTrack {
    pub generation_id: String,
    pub item: MusicItem,
    pub midi_path: PathBuf,
    /// Events produced, seed included.
    pub events: usize,
}

/// Seconds spanned by `quarters` at `tempo_bpm`, rounded.
fn seconds(quarters: f64, tempo_bpm: u16) -> u32 {
    (quarters * 60.0 / f64::from(tempo_bpm.max(1))).round().max(0.0) as u32
}

/// Generate a track for `request` and write it under `generated_dir`.
pub fn compose<P: Predictor + ?Sized>(
    predictor: &P,
    request: &GenerateRequest,
    enc: &EncodingConfig,
    generated_dir: &Path,
    stop: Option<&AtomicBool>,
) -> Result<GeneratedTrack> {
    let params = &request.params;
    enc.validate()?;
    params.validate(enc.sequence_length)?;

    let generation_id = random_uuid(&mut rand::rng());
    let mut rng = match params.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let seed = sample_seed(enc, &mut rng);
    let events = generate_sequence(predictor, &seed, enc, params, &mut rng, stop)?;
    let notes = decode(&events, enc);

    let midi_filename = format!("{generation_id}.mid");
    let midi_path = generated_dir.join(&midi_filename);
    write_midi(&notes, params.tempo_bpm, &params.instrument, &midi_path)?;

    let title = request
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| format!("Generated Music {}", &generation_id[..8]));
    let composer = request
        .composer
        .clone()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_COMPOSER.to_string());

    let item = MusicItem {
        id: stable_id(&title, &generation_id),
        title: Some(title),
        composer: Some(composer),
        year: None,
        split: Split::Generated,
        duration: Some(seconds(total_quarters(&notes), params.tempo_bpm)),
        created: Some(unix_now()),
        plays: 0,
        tags: vec![
            "generated".to_string(),
            params.instrument.to_lowercase(),
            format!("temperature-{:.2}", params.temperature),
        ],
        midi_filename: Some(midi_filename),
        audio_filename: None,
        encoding_version: Some(enc.version),
    };

    tracing::info!(
        "generation {generation_id}: {} events, {}s, {}",
        events.len(),
        item.duration.unwrap_or(0),
        midi_path.display()
    );
    Ok(GeneratedTrack {
        generation_id,
        item,
        midi_path,
        events: events.len(),
    })
}
