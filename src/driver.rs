//! Checkpointing loop that drives one per-record operation over a record set.
//!
//! Records are visited in order. Every `checkpoint_every` positions the processed
//! prefix is written to the output artifact; the full set is written once the
//! loop completes. When an operation reports a malformed record the run stops,
//! the processed prefix is saved and the error is returned.
//!
//! A run that restored records from a previous output sets
//! [`DriverConfig::keep_unvisited`], so snapshots carry the not yet visited tail
//! as well and restored results never leave the artifact.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::record::{Record, RecordError};
use crate::store::save_records;

/// Records processed between two checkpoints unless configured otherwise.
pub const DEFAULT_CHECKPOINT_EVERY: usize = 25;

/// What happened to one record during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Every call for the record succeeded.
    Completed,
    /// The record finished with a fallback or with some failed calls.
    Degraded,
    /// Nothing usable was produced; the record is eligible for retry.
    Failed,
    /// The record lacks required input and was left untouched.
    Skipped,
    /// A previous run already finished this record.
    AlreadyComplete,
}

/// A per-record pass the driver can run.
pub trait RecordOperation: Sync {
    /// Short name used in logs (`generation`, `judging`).
    fn name(&self) -> &'static str;

    /// True when a previous run already finished this record.
    fn is_complete(&self, record: &Record) -> bool;

    /// Processes one record in place. `position` is 1-based.
    fn apply(
        &self,
        position: usize,
        total: usize,
        record: &mut Record,
    ) -> Result<RecordOutcome, RecordError>;
}

/// Output location and loop policy.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Artifact replaced at every checkpoint.
    pub output: PathBuf,
    /// Checkpoint cadence in records.
    pub checkpoint_every: usize,
    /// Worker threads; 1 processes records on the calling thread.
    pub workers: usize,
    /// Write the unvisited tail along with the processed prefix at every
    /// snapshot. Set when the set was resumed from a previous output.
    pub keep_unvisited: bool,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Records in the set.
    pub total: usize,
    /// Records visited, whatever the outcome.
    pub processed: usize,
    /// See [`RecordOutcome::Completed`].
    pub completed: usize,
    /// See [`RecordOutcome::Degraded`].
    pub degraded: usize,
    /// See [`RecordOutcome::Failed`].
    pub failed: usize,
    /// See [`RecordOutcome::Skipped`].
    pub skipped: usize,
    /// See [`RecordOutcome::AlreadyComplete`].
    pub already_complete: usize,
    /// Intermediate snapshots written.
    pub checkpoints: usize,
}

impl RunSummary {
    fn tally(&mut self, outcome: RecordOutcome) {
        self.processed += 1;
        match outcome {
            RecordOutcome::Completed => self.completed += 1,
            RecordOutcome::Degraded => self.degraded += 1,
            RecordOutcome::Failed => self.failed += 1,
            RecordOutcome::Skipped => self.skipped += 1,
            RecordOutcome::AlreadyComplete => self.already_complete += 1,
        }
    }
}

/// Runs a [`RecordOperation`] over a record set with periodic snapshots.
#[derive(Debug, Clone)]
pub struct CheckpointDriver {
    config: DriverConfig,
}

struct Abort {
    committed: usize,
    error: anyhow::Error,
}

struct RecordTask {
    index: usize,
    record: Record,
}

struct RecordResult {
    index: usize,
    record: Record,
    outcome: Result<RecordOutcome, RecordError>,
}

impl CheckpointDriver {
    /// Creates a driver; zero cadence or worker counts are raised to 1.
    pub fn new(mut config: DriverConfig) -> Self {
        config.checkpoint_every = config.checkpoint_every.max(1);
        config.workers = config.workers.max(1);
        Self { config }
    }

    /// Active configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Visits every record once and persists the result.
    pub fn run<O: RecordOperation>(&self, records: &mut [Record], op: &O) -> Result<RunSummary> {
        let total = records.len();
        tracing::info!(
            total,
            workers = self.config.workers,
            "starting {} pass over {} records",
            op.name(),
            total
        );
        let mut summary = RunSummary {
            total,
            ..RunSummary::default()
        };
        let outcome = if self.config.workers > 1 && total > 1 {
            self.run_pooled(records, op, &mut summary)
        } else {
            self.run_sequential(records, op, &mut summary)
        };

        if let Err(Abort { committed, error }) = outcome {
            tracing::error!(
                committed,
                "{} pass aborted: {:#}; saving {} processed records",
                op.name(),
                error,
                committed
            );
            let snapshot = self.snapshot(records, committed);
            if let Err(save_err) = save_records(&self.config.output, snapshot) {
                tracing::error!("final save after abort failed: {:#}", save_err);
            }
            return Err(error);
        }

        save_records(&self.config.output, records)?;
        tracing::info!(
            completed = summary.completed,
            degraded = summary.degraded,
            failed = summary.failed,
            skipped = summary.skipped,
            already_complete = summary.already_complete,
            "{} pass finished; results saved to {:?}",
            op.name(),
            self.config.output
        );
        Ok(summary)
    }

    fn run_sequential<O: RecordOperation>(
        &self,
        records: &mut [Record],
        op: &O,
        summary: &mut RunSummary,
    ) -> Result<(), Abort> {
        let total = records.len();
        for index in 0..total {
            let position = index + 1;
            let outcome = process_one(op, position, total, &mut records[index]).map_err(|err| {
                Abort {
                    committed: index,
                    error: err.into(),
                }
            })?;
            self.commit(records, position, outcome, summary)
                .map_err(|error| Abort {
                    committed: position,
                    error,
                })?;
        }
        Ok(())
    }

    fn run_pooled<O: RecordOperation>(
        &self,
        records: &mut [Record],
        op: &O,
        summary: &mut RunSummary,
    ) -> Result<(), Abort> {
        let total = records.len();
        let workers = self.config.workers;
        let (task_tx, task_rx) = bounded::<RecordTask>(workers * 2);
        let (result_tx, result_rx) = bounded::<RecordResult>(workers * 2);

        thread::scope(|scope| {
            for worker_id in 0..workers {
                let worker_rx = task_rx.clone();
                let worker_tx = result_tx.clone();
                scope.spawn(move || worker_loop(worker_id, worker_rx, worker_tx, op, total));
            }
            drop(task_rx);
            drop(result_tx);
            self.dispatch(records, task_tx, &result_rx, summary)
        })
    }

    /// Feeds records to the workers and merges results back in order, so the
    /// committed prefix is always contiguous.
    fn dispatch(
        &self,
        records: &mut [Record],
        task_tx: Sender<RecordTask>,
        result_rx: &Receiver<RecordResult>,
        summary: &mut RunSummary,
    ) -> Result<(), Abort> {
        let total = records.len();
        let capacity = self.config.workers * 2;
        let mut task_tx = Some(task_tx);
        let mut pending: BTreeMap<usize, Result<RecordOutcome, RecordError>> = BTreeMap::new();
        let mut next_dispatch = 0usize;
        let mut next_commit = 0usize;
        let mut inflight = 0usize;
        let mut abort: Option<Abort> = None;

        loop {
            if abort.is_none() && next_dispatch < total && inflight < capacity {
                if let Some(sender) = &task_tx {
                    // Slot keeps its state until the result comes back.
                    let task = RecordTask {
                        index: next_dispatch,
                        record: records[next_dispatch].clone(),
                    };
                    match sender.send(task) {
                        Ok(()) => {
                            next_dispatch += 1;
                            inflight += 1;
                            continue;
                        }
                        Err(_) => {
                            abort = Some(Abort {
                                committed: next_commit,
                                error: anyhow!("record worker channel closed"),
                            });
                        }
                    }
                }
            }
            if abort.is_some() || next_dispatch >= total {
                task_tx = None;
            }
            if inflight == 0 {
                break;
            }

            let Ok(result) = result_rx.recv() else {
                abort.get_or_insert(Abort {
                    committed: next_commit,
                    error: anyhow!("record workers exited unexpectedly"),
                });
                break;
            };
            inflight -= 1;
            records[result.index] = result.record;
            pending.insert(result.index, result.outcome);

            while abort.is_none() {
                let Some(outcome) = pending.remove(&next_commit) else {
                    break;
                };
                match outcome {
                    Ok(outcome) => {
                        let position = next_commit + 1;
                        next_commit = position;
                        if let Err(error) = self.commit(records, position, outcome, summary) {
                            abort = Some(Abort {
                                committed: position,
                                error,
                            });
                        }
                    }
                    Err(err) => {
                        abort = Some(Abort {
                            committed: next_commit,
                            error: err.into(),
                        });
                    }
                }
            }
        }
        drop(task_tx);

        match abort {
            Some(abort) => Err(abort),
            None => Ok(()),
        }
    }

    /// Records written by an intermediate save once `committed` records were
    /// processed.
    fn snapshot<'a>(&self, records: &'a [Record], committed: usize) -> &'a [Record] {
        if self.config.keep_unvisited {
            records
        } else {
            &records[..committed]
        }
    }

    /// Counts an outcome and writes a snapshot on checkpoint boundaries.
    fn commit(
        &self,
        records: &[Record],
        position: usize,
        outcome: RecordOutcome,
        summary: &mut RunSummary,
    ) -> Result<()> {
        summary.tally(outcome);
        if position % self.config.checkpoint_every == 0 {
            save_records(&self.config.output, self.snapshot(records, position))?;
            summary.checkpoints += 1;
            tracing::info!(position, "[{}] checkpoint saved", position);
        }
        Ok(())
    }
}

fn process_one<O: RecordOperation>(
    op: &O,
    position: usize,
    total: usize,
    record: &mut Record,
) -> Result<RecordOutcome, RecordError> {
    if op.is_complete(record) {
        tracing::info!(
            position,
            image_id = record.id(),
            status = record.pipeline_status.as_str(),
            "[{}/{}] {} already complete, skipping",
            position,
            total,
            op.name()
        );
        return Ok(RecordOutcome::AlreadyComplete);
    }
    op.apply(position, total, record)
}

fn worker_loop<O: RecordOperation>(
    worker_id: usize,
    receiver: Receiver<RecordTask>,
    sender: Sender<RecordResult>,
    op: &O,
    total: usize,
) {
    for task in receiver.iter() {
        let RecordTask { index, mut record } = task;
        tracing::debug!(worker_id, position = index + 1, "worker picked up record");
        let outcome = process_one(op, index + 1, total, &mut record);
        let result = RecordResult {
            index,
            record,
            outcome,
        };
        if sender.send(result).is_err() {
            break;
        }
    }
}
