// Training harness and the explicit training session.
//
// `train_markov` is the computation: the training windows are cut into
// `epochs` contiguous shards. Each epoch first scores its shard with the
// model as it stands (prequential loss and accuracy), then absorbs the shard
// and scores the full validation set. Loss is the mean negative
// log-likelihood over the output heads; accuracy is the fraction of heads
// whose most probable class is the target's. A stop flag is checked between
// epochs.
//
// `TrainingSession` owns everything a running training needs: the worker
// thread, the channel its updates arrive on, the stop flag, the session
// record and the subscriber list. Nothing is process-global. The owner calls
// `poll()` at its own cadence; polling drains the channel, updates the
// record, fans progress out to subscribers and reports what happened. Only
// one run is active per session at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::JoinHandle;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::corpus::Dataset;
use crate::error::{Error, Result};
use crate::markov::MarkovPredictor;
use crate::stamp::{random_uuid, unix_now};
use crate::subscribers::{Subscriber, SubscriberId, Subscribers};
use crate::window::Window;

/// Progress report for one finished epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    pub epoch: u32,
    pub total_epochs: u32,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub batch_size: usize,
    pub windows_seen: u64,
    /// Seconds since the run started.
    pub time_elapsed: f64,
    /// Estimated seconds until the last epoch finishes.
    pub eta: f64,
    /// The stop flag was raised; this is the last report.
    pub stopping: bool,
}

/// Per-epoch entry of the session record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingEpoch {
    pub epoch: u32,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub batch_size: usize,
    pub timestamp: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingStatus {
    Running,
    Completed,
    Stopped,
    Failed,
}

/// Everything known about one training run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub total_epochs: u32,
    pub current_epoch: u32,
    pub status: TrainingStatus,
    pub start_time: u64,
    pub end_time: Option<u64>,
    pub elapsed_time: f64,
    pub epochs_data: Vec<TrainingEpoch>,
    pub error: Option<String>,
}

/// What subscribers receive.
#[derive(Clone, Debug, PartialEq)]
pub enum TrainingEvent {
    Progress(TrainingStats),
    Finished {
        session_id: String,
        status: TrainingStatus,
        error: Option<String>,
    },
}

/// What `poll` reports to the session owner.
#[derive(Debug)]
pub enum TrainingNotice {
    Progress(TrainingStats),
    /// The run ended. `model` is present only for a completed run.
    Finished {
        status: TrainingStatus,
        model: Option<Box<MarkovPredictor>>,
        error: Option<String>,
    },
}

/// Result of a training run that was not aborted by an error.
#[derive(Debug)]
pub struct TrainingOutcome {
    pub model: MarkovPredictor,
    /// The stop flag ended the run early.
    pub stopped: bool,
}

#[derive(Default)]
struct Score {
    nll: f64,
    hits: usize,
    windows: usize,
}

impl Score {
    fn over(model: &MarkovPredictor, windows: &[Window]) -> Self {
        let mut score = Score::default();
        for w in windows {
            if let Some((nll, hits)) = model.score(w) {
                score.nll += nll;
                score.hits += hits;
                score.windows += 1;
            }
        }
        score
    }

    fn loss(&self) -> f64 {
        if self.windows == 0 { 0.0 } else { self.nll / self.windows as f64 }
    }

    fn accuracy(&self, heads: usize) -> f64 {
        let total = self.windows * heads;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

/// Train a Markov predictor on `dataset`, reporting each epoch to `on_epoch`.
pub fn train_markov(
    dataset: &Dataset,
    training: &TrainingConfig,
    stop: &AtomicBool,
    mut on_epoch: impl FnMut(TrainingStats),
) -> Result<TrainingOutcome> {
    training.validate()?;
    dataset.encoding.validate()?;
    if dataset.train.is_empty() {
        return Err(Error::Config("dataset has no training windows".into()));
    }

    let started = Instant::now();
    let epochs = training.epochs;
    let heads = dataset.encoding.max_polyphony + 2;
    let shard_len = dataset.train.len().div_ceil(epochs as usize);
    let mut model = MarkovPredictor::new(dataset.encoding.clone(), training);

    for epoch in 1..=epochs {
        if stop.load(Ordering::Relaxed) {
            tracing::info!("training stopped before epoch {epoch}");
            return Ok(TrainingOutcome {
                model,
                stopped: true,
            });
        }

        let start = ((epoch - 1) as usize * shard_len).min(dataset.train.len());
        let end = (start + shard_len).min(dataset.train.len());
        let shard = &dataset.train[start..end];

        let train_score = Score::over(&model, shard);
        for w in shard {
            model.observe(w);
        }
        let val_score = Score::over(&model, &dataset.validation);

        let time_elapsed = started.elapsed().as_secs_f64();
        let stats = TrainingStats {
            epoch,
            total_epochs: epochs,
            loss: train_score.loss(),
            accuracy: train_score.accuracy(heads),
            val_loss: val_score.loss(),
            val_accuracy: val_score.accuracy(heads),
            batch_size: training.batch_size,
            windows_seen: model.windows_seen,
            time_elapsed,
            eta: f64::from(epochs - epoch) * time_elapsed / f64::from(epoch),
            stopping: stop.load(Ordering::Relaxed),
        };
        tracing::info!(
            "epoch {epoch}/{epochs}: loss {:.4} acc {:.4} val_loss {:.4} val_acc {:.4}",
            stats.loss,
            stats.accuracy,
            stats.val_loss,
            stats.val_accuracy
        );
        on_epoch(stats);
    }

    Ok(TrainingOutcome {
        model,
        stopped: false,
    })
}

enum Update {
    Epoch(TrainingStats),
    Done(Result<TrainingOutcome>),
}

struct ActiveRun {
    updates: Receiver<Update>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    started: Instant,
}

/// One owner-driven training session. See the module header.
#[derive(Default)]
pub struct TrainingSession {
    record: Option<SessionRecord>,
    run: Option<ActiveRun>,
    subscribers: Subscribers<TrainingEvent>,
}

impl TrainingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// The current or most recent run.
    pub fn record(&self) -> Option<&SessionRecord> {
        self.record.as_ref()
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn Subscriber<TrainingEvent>>) -> SubscriberId {
        self.subscribers.add(subscriber)
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.remove(id)
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.subscribers.contains(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Start a run on a worker thread. `load` runs on that thread and
    /// supplies the dataset. Fails if a run is already active.
    pub fn start<F>(&mut self, load: F, training: TrainingConfig) -> Result<String>
    where
        F: FnOnce() -> Result<Dataset> + Send + 'static,
    {
        if self.run.is_some() {
            return Err(Error::Config("training already in progress".into()));
        }
        training.validate()?;

        let session_id = random_uuid(&mut rand::rng());
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let thread_stop = Arc::clone(&stop);
        let thread_training = training.clone();
        let handle = std::thread::Builder::new()
            .name("mugan-training".into())
            .spawn(move || {
                let progress = tx.clone();
                let result = load().and_then(|dataset| {
                    train_markov(&dataset, &thread_training, &thread_stop, |stats| {
                        let _ = progress.send(Update::Epoch(stats));
                    })
                });
                let _ = tx.send(Update::Done(result));
            })?;

        tracing::info!("training session {session_id} started ({} epochs)", training.epochs);
        self.record = Some(SessionRecord {
            session_id: session_id.clone(),
            total_epochs: training.epochs,
            current_epoch: 0,
            status: TrainingStatus::Running,
            start_time: unix_now(),
            end_time: None,
            elapsed_time: 0.0,
            epochs_data: Vec::new(),
            error: None,
        });
        self.run = Some(ActiveRun {
            updates: rx,
            stop,
            handle,
            started: Instant::now(),
        });
        Ok(session_id)
    }

    /// Ask the active run to stop after its current epoch. Returns false
    /// when nothing is running.
    pub fn stop(&mut self) -> bool {
        match &self.run {
            Some(run) => {
                run.stop.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Drain pending updates without blocking.
    pub fn poll(&mut self) -> Vec<TrainingNotice> {
        let mut notices = Vec::new();
        loop {
            let next = match &self.run {
                Some(run) => run.updates.try_recv(),
                None => break,
            };
            match next {
                Ok(Update::Epoch(stats)) => {
                    self.apply_epoch(&stats);
                    self.subscribers.broadcast(&TrainingEvent::Progress(stats.clone()));
                    notices.push(TrainingNotice::Progress(stats));
                }
                Ok(Update::Done(result)) => {
                    notices.push(self.finish(result));
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    let err = Error::Config("training thread exited unexpectedly".into());
                    notices.push(self.finish(Err(err)));
                    break;
                }
            }
        }
        notices
    }

    fn apply_epoch(&mut self, stats: &TrainingStats) {
        if let Some(record) = &mut self.record {
            record.current_epoch = stats.epoch;
            record.elapsed_time = stats.time_elapsed;
            record.epochs_data.push(TrainingEpoch {
                epoch: stats.epoch,
                loss: stats.loss,
                accuracy: stats.accuracy,
                val_loss: stats.val_loss,
                val_accuracy: stats.val_accuracy,
                batch_size: stats.batch_size,
                timestamp: unix_now(),
            });
        }
    }

    fn finish(&mut self, result: Result<TrainingOutcome>) -> TrainingNotice {
        let elapsed = self.run.as_ref().map(|r| r.started.elapsed().as_secs_f64());
        if let Some(run) = self.run.take() {
            if run.handle.join().is_err() {
                tracing::error!("training thread panicked");
            }
        }

        let (status, model, error) = match result {
            Ok(TrainingOutcome { model, stopped: false }) => {
                (TrainingStatus::Completed, Some(Box::new(model)), None)
            }
            Ok(TrainingOutcome { stopped: true, .. }) => (TrainingStatus::Stopped, None, None),
            Err(e) => (TrainingStatus::Failed, None, Some(e.to_string())),
        };

        let mut session_id = String::new();
        if let Some(record) = &mut self.record {
            record.status = status;
            record.end_time = Some(unix_now());
            record.elapsed_time = elapsed.unwrap_or(record.elapsed_time);
            record.error = error.clone();
            session_id = record.session_id.clone();
        }
        match &error {
            Some(e) => tracing::warn!("training session {session_id} failed: {e}"),
            None => tracing::info!("training session {session_id} finished: {status:?}"),
        }

        self.subscribers.broadcast(&TrainingEvent::Finished {
            session_id,
            status,
            error: error.clone(),
        });
        TrainingNotice::Finished {
            status,
            model,
            error,
        }
    }
}
