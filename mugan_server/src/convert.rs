// Conversions between music-library types and their wire records.

use mugan_music::catalog::MusicItem;
use mugan_music::compose::GenerateRequest;
use mugan_music::config::GenerationConfig;
use mugan_music::training::{SessionRecord, TrainingStats, TrainingStatus};
use mugan_protocol::message::{
    CatalogEntry, EpochReport, GenerateParams, ProgressReport, SessionInfo,
};
use mugan_protocol::types::RunStatus;

fn saturate(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

pub fn catalog_entry(item: &MusicItem) -> CatalogEntry {
    CatalogEntry {
        id: item.id,
        title: item.title.clone(),
        composer: item.composer.clone(),
        year: item.year,
        split: item.split.to_string(),
        duration: item.duration,
        created: item.created,
        plays: item.plays,
        tags: item.tags.clone(),
        midi_filename: item.midi_filename.clone(),
        audio_filename: item.audio_filename.clone(),
    }
}

pub fn run_status(status: TrainingStatus) -> RunStatus {
    match status {
        TrainingStatus::Running => RunStatus::Running,
        TrainingStatus::Completed => RunStatus::Completed,
        TrainingStatus::Stopped => RunStatus::Stopped,
        TrainingStatus::Failed => RunStatus::Failed,
    }
}

pub fn progress_report(stats: &TrainingStats) -> ProgressReport {
    ProgressReport {
        epoch: stats.epoch,
        total_epochs: stats.total_epochs,
        loss: stats.loss,
        accuracy: stats.accuracy,
        val_loss: stats.val_loss,
        val_accuracy: stats.val_accuracy,
        batch_size: saturate(stats.batch_size),
        windows_seen: stats.windows_seen,
        time_elapsed: stats.time_elapsed,
        eta: stats.eta,
        stopping: stats.stopping,
    }
}

pub fn session_info(record: &SessionRecord) -> SessionInfo {
    SessionInfo {
        session_id: record.session_id.clone(),
        status: run_status(record.status),
        total_epochs: record.total_epochs,
        current_epoch: record.current_epoch,
        start_time: record.start_time,
        end_time: record.end_time,
        elapsed_time: record.elapsed_time,
        epochs: record
            .epochs_data
            .iter()
            .map(|e| EpochReport {
                epoch: e.epoch,
                loss: e.loss,
                accuracy: e.accuracy,
                val_loss: e.val_loss,
                val_accuracy: e.val_accuracy,
                timestamp: e.timestamp,
            })
            .collect(),
        error: record.error.clone(),
    }
}

/// Build a library request, taking unset parameters from `defaults`.
pub fn generate_request(
    title: Option<String>,
    composer: Option<String>,
    params: GenerateParams,
    defaults: &GenerationConfig,
) -> GenerateRequest {
    GenerateRequest {
        title,
        composer,
        params: GenerationConfig {
            temperature: params.temperature.unwrap_or(defaults.temperature),
            target_length: params
                .target_length
                .map_or(defaults.target_length, |n| n as usize),
            tempo_bpm: params.tempo_bpm.unwrap_or(defaults.tempo_bpm),
            instrument: params
                .instrument
                .unwrap_or_else(|| defaults.instrument.clone()),
            seed: params.seed.or(defaults.seed),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mugan_music::catalog::Split;

    #[test]
    fn unset_params_take_defaults() {
        let defaults = GenerationConfig::default();
        let req = generate_request(
            Some("A".into()),
            None,
            GenerateParams {
                temperature: Some(1.5),
                target_length: Some(64),
                ..Default::default()
            },
            &defaults,
        );
        assert_eq!(req.title.as_deref(), Some("A"));
        assert_eq!(req.params.temperature, 1.5);
        assert_eq!(req.params.target_length, 64);
        assert_eq!(req.params.tempo_bpm, defaults.tempo_bpm);
        assert_eq!(req.params.instrument, defaults.instrument);
        assert_eq!(req.params.seed, None);
    }

    #[test]
    fn entry_carries_split_name() {
        let item = MusicItem {
            id: 9,
            title: Some("t".into()),
            split: Split::Generated,
            ..Default::default()
        };
        let entry = catalog_entry(&item);
        assert_eq!(entry.split, "Generated");
        assert_eq!(entry.id, 9);
    }
}
