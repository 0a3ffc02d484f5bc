// `mugan` command-line tool.
//
// Offline entry points for the pipeline: preprocess a MIDI corpus into a
// dataset, train the Markov predictor on it, generate MIDI from a trained
// model, render MIDI to audio, and manage the JSON track catalog. Settings
// come from an optional JSON config file (`--config`); per-command flags
// override individual values.
//
// Usage:
//   mugan preprocess [--data-dir DIR] [--max-files N]
//   mugan train [--epochs N]
//   mugan generate [--title T] [--temperature X] [--length N] [--seed S]
//   mugan render <MIDI> [--soundfont SF2]
//   mugan catalog import <MAESTRO_JSON>
//   mugan catalog list [--filter SPLIT] [--search TEXT]

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;

use mugan_music::catalog::{Catalog, JsonCatalog, import_maestro};
use mugan_music::compose::{GenerateRequest, compose};
use mugan_music::config::MuganConfig;
use mugan_music::corpus::{Dataset, preprocess};
use mugan_music::markov::MarkovPredictor;
use mugan_music::render::AudioRenderer;
use mugan_music::training::train_markov;
use mugan_music::{Error, Result};

#[derive(Parser, Debug)]
#[command(name = "mugan", about = "Symbolic music generation pipeline")]
struct Cli {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode a MIDI corpus into a windowed dataset.
    Preprocess {
        /// Directory scanned recursively for .mid/.midi files.
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Dataset output path.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        max_files: Option<usize>,
        /// Shuffle seed for the train/validation split.
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Train the Markov predictor on a preprocessed dataset.
    Train {
        #[arg(long)]
        dataset: Option<PathBuf>,
        /// Where the trained model is written.
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        epochs: Option<u32>,
    },
    /// Generate a MIDI file from a trained model.
    Generate {
        /// Model file. An untrained (uniform) model is used if it is missing.
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        composer: Option<String>,
        #[arg(long, short = 't')]
        temperature: Option<f64>,
        /// Total events, seed included.
        #[arg(long, short = 'n')]
        length: Option<usize>,
        #[arg(long)]
        tempo: Option<u16>,
        #[arg(long)]
        instrument: Option<String>,
        #[arg(long, short = 's')]
        seed: Option<u64>,
        /// Also record the track in this catalog.
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Render a MIDI file to audio with FluidSynth.
    Render {
        midi: PathBuf,
        #[arg(long)]
        soundfont: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Manage the track catalog.
    Catalog {
        /// Catalog file.
        #[arg(long)]
        catalog: Option<PathBuf>,
        #[command(subcommand)]
        action: CatalogAction,
    },
}

#[derive(Subcommand, Debug)]
enum CatalogAction {
    /// Import MAESTRO metadata (JSON array of records).
    Import { source: PathBuf },
    /// List tracks, optionally filtered by split and searched by text.
    List {
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        search: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = MuganConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Preprocess {
            data_dir,
            output,
            max_files,
            seed,
        } => {
            if max_files.is_some() {
                config.training.max_files = max_files;
            }
            let data_dir = data_dir.unwrap_or_else(|| config.paths.data_dir.clone());
            let output = output.unwrap_or_else(|| config.paths.dataset_path());
            let mut rng = StdRng::seed_from_u64(seed);
            let dataset = preprocess(
                &data_dir,
                &config.encoding,
                &config.training,
                &mut rng,
                None,
            )?;
            dataset.save(&output)?;
            println!(
                "{} windows ({} train, {} validation) from {} files -> {}",
                dataset.stats.total_sequences,
                dataset.stats.train_sequences,
                dataset.stats.val_sequences,
                dataset.stats.files_used,
                output.display()
            );
        }
        Command::Train {
            dataset,
            model,
            epochs,
        } => {
            if let Some(n) = epochs {
                config.training.epochs = n;
            }
            let dataset_path = dataset.unwrap_or_else(|| config.paths.dataset_path());
            let model_path = model.unwrap_or_else(|| config.paths.model_path());
            let dataset = Dataset::load(&dataset_path, &config.encoding)?;
            let stop = AtomicBool::new(false);
            let outcome = train_markov(&dataset, &config.training, &stop, |stats| {
                println!(
                    "epoch {}/{}: loss {:.4} acc {:.3} | val loss {:.4} acc {:.3} | eta {:.1}s",
                    stats.epoch,
                    stats.total_epochs,
                    stats.loss,
                    stats.accuracy,
                    stats.val_loss,
                    stats.val_accuracy,
                    stats.eta
                );
            })?;
            outcome.model.save(&model_path)?;
            println!("model -> {}", model_path.display());
        }
        Command::Generate {
            model,
            output_dir,
            title,
            composer,
            temperature,
            length,
            tempo,
            instrument,
            seed,
            catalog,
        } => {
            let params = &mut config.generation;
            if let Some(t) = temperature {
                params.temperature = t;
            }
            if let Some(n) = length {
                params.target_length = n;
            }
            if let Some(bpm) = tempo {
                params.tempo_bpm = bpm;
            }
            if let Some(name) = instrument {
                params.instrument = name;
            }
            if seed.is_some() {
                params.seed = seed;
            }

            let model_path = model.unwrap_or_else(|| config.paths.model_path());
            let predictor = load_predictor(&model_path, &config)?;
            let output_dir = output_dir.unwrap_or_else(|| config.paths.generated_dir.clone());
            let request = GenerateRequest {
                title,
                composer,
                params: config.generation.clone(),
            };
            let track = compose(&predictor, &request, &config.encoding, &output_dir, None)?;

            if let Some(path) = catalog {
                let mut catalog = JsonCatalog::open(&path)?;
                let id = catalog.insert(track.item.clone())?;
                println!("catalog id {id} -> {}", path.display());
            }
            println!(
                "{} ({} events, {}s) -> {}",
                track.item.title.as_deref().unwrap_or_default(),
                track.events,
                track.item.duration.unwrap_or(0),
                track.midi_path.display()
            );
        }
        Command::Render {
            midi,
            soundfont,
            output_dir,
        } => {
            let soundfont = soundfont.or_else(|| config.paths.soundfont()).ok_or_else(|| {
                Error::Render("no soundfont configured (set --soundfont or SOUNDFONT_PATH)".into())
            })?;
            let output_dir = output_dir.unwrap_or_else(|| config.paths.generated_dir.clone());
            let audio = AudioRenderer::default().render(&midi, &soundfont, &output_dir)?;
            println!("{}", audio.display());
        }
        Command::Catalog { catalog, action } => {
            let path = catalog.unwrap_or_else(|| config.paths.catalog_path());
            let mut catalog = JsonCatalog::open(&path)?;
            match action {
                CatalogAction::Import { source } => {
                    let items = import_maestro(&source)?;
                    let count = catalog.insert_all(items)?;
                    println!("imported {count} tracks -> {}", path.display());
                }
                CatalogAction::List { filter, search } => {
                    for item in catalog.list(filter.as_deref(), search.as_deref())? {
                        println!(
                            "{:>10}  {:<10}  {} / {}",
                            item.id,
                            item.split,
                            item.composer.as_deref().unwrap_or("?"),
                            item.title.as_deref().unwrap_or("?")
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

/// Load the trained model at `path`, or an untrained one when the file is
/// missing. An untrained Markov model predicts uniform distributions.
fn load_predictor(path: &Path, config: &MuganConfig) -> Result<MarkovPredictor> {
    if path.is_file() {
        return MarkovPredictor::load(path, &config.encoding);
    }
    tracing::warn!("no model at {}, generating from an untrained model", path.display());
    Ok(MarkovPredictor::new(config.encoding.clone(), &config.training))
}
