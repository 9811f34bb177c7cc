// crates/exifguard-core/src/batch.rs

//! Per-image state machine and the worker pool that cleans images in bulk.
//!
//! ```text
//! Pending -> Analyzing -> Idle -> Cleaning -> Done
//!                 \                   \
//!                  -> Error            -> Error
//! ```
//!
//! Each cleaning task owns a handle to its image and reports back over a
//! channel. The [`Batch`] is the only place results are written, so no
//! buffer is ever shared between two in-flight tasks.

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{Semaphore, mpsc};

use crate::error::{GuardError, Result};
use crate::report::TagReport;
use crate::{RawImage, extract, redact};

/// Stable identity of a record. Never reused within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Pending,
    Analyzing,
    Idle,
    Cleaning,
    Done,
    Error,
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessingState::Pending => "pending",
            ProcessingState::Analyzing => "analyzing",
            ProcessingState::Idle => "idle",
            ProcessingState::Cleaning => "cleaning",
            ProcessingState::Done => "done",
            ProcessingState::Error => "in error",
        })
    }
}

/// One image and everything known about it.
#[derive(Debug, Clone)]
pub struct ProcessingRecord {
    id: RecordId,
    name: String,
    image: RawImage,
    state: ProcessingState,
    report: Option<TagReport>,
    cleaned: Option<Arc<[u8]>>,
    error: Option<GuardError>,
}

impl ProcessingRecord {
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// The original file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &RawImage {
        &self.image
    }

    pub fn state(&self) -> ProcessingState {
        self.state
    }

    pub fn report(&self) -> Option<&TagReport> {
        self.report.as_ref()
    }

    pub fn cleaned(&self) -> Option<&Arc<[u8]>> {
        self.cleaned.as_ref()
    }

    pub fn error(&self) -> Option<&GuardError> {
        self.error.as_ref()
    }

    fn fail(&mut self, err: GuardError) {
        self.state = ProcessingState::Error;
        self.error = Some(err);
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Upper bound on concurrently running cleanings.
    pub workers: usize,
    /// Prepended to the original file name of every cleaned output.
    pub output_prefix: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(1, |n| n.get()),
            output_prefix: "clean_".to_string(),
        }
    }
}

/// A cleaned image ready for download or archiving.
#[derive(Debug, Clone)]
pub struct CleanedImage {
    pub id: RecordId,
    /// Output prefix plus the original file name.
    pub name: String,
    pub bytes: Arc<[u8]>,
}

#[derive(Debug, Clone)]
pub struct FailedImage {
    pub id: RecordId,
    pub name: String,
    pub reason: GuardError,
}

/// What a "clean all" produced: every success and, separately, every failure.
#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    pub cleaned: Vec<CleanedImage>,
    pub failed: Vec<FailedImage>,
}

#[derive(Debug)]
struct CleanMessage {
    id: RecordId,
    outcome: Result<Vec<u8>>,
}

/// Owns every [`ProcessingRecord`] and drives them through their states.
///
/// Cleaning runs on tokio's blocking pool, at most `workers` at a time, so
/// the methods that dispatch work must be called from inside a tokio runtime.
#[derive(Debug)]
pub struct Batch {
    config: BatchConfig,
    records: Vec<ProcessingRecord>,
    next_id: u64,
    permits: Arc<Semaphore>,
    results_tx: mpsc::UnboundedSender<CleanMessage>,
    results_rx: mpsc::UnboundedReceiver<CleanMessage>,
    in_flight: usize,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new(BatchConfig::default())
    }
}

impl Batch {
    pub fn new(config: BatchConfig) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let workers = config.workers.max(1);
        Self {
            config,
            records: Vec::new(),
            next_id: 0,
            permits: Arc::new(Semaphore::new(workers)),
            results_tx,
            results_rx,
            in_flight: 0,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Takes in a file. The record starts out `Pending`.
    pub fn add(&mut self, name: impl Into<String>, image: RawImage) -> RecordId {
        let id = RecordId(self.next_id);
        self.next_id += 1;
        self.records.push(ProcessingRecord {
            id,
            name: name.into(),
            image,
            state: ProcessingState::Pending,
            report: None,
            cleaned: None,
            error: None,
        });
        id
    }

    /// Drops a record. A cleaning still in flight for it is discarded on arrival.
    pub fn remove(&mut self, id: RecordId) -> Option<ProcessingRecord> {
        let index = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(index))
    }

    pub fn get(&self, id: RecordId) -> Option<&ProcessingRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn records(&self) -> &[ProcessingRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of cleanings dispatched whose result has not been applied yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn record_mut(&mut self, id: RecordId) -> Result<&mut ProcessingRecord> {
        self.records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(GuardError::UnknownRecord(id))
    }

    /// Runs extraction inline: `Pending -> Analyzing -> Idle | Error`.
    pub fn analyze(&mut self, id: RecordId) -> Result<&TagReport> {
        let record = self.record_mut(id)?;
        if record.state != ProcessingState::Pending {
            return Err(GuardError::InvalidTransition {
                id,
                state: record.state,
            });
        }
        record.state = ProcessingState::Analyzing;
        match extract(&record.image) {
            Ok(report) => {
                debug!("{id} ({}) analyzed, gps: {}", record.name, report.has_gps());
                record.state = ProcessingState::Idle;
                Ok(&*record.report.insert(report))
            }
            Err(err) => {
                warn!("{id} ({}) could not be analyzed: {err}", record.name);
                record.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Analyzes every `Pending` record and returns how many reached `Idle`.
    pub fn analyze_pending(&mut self) -> usize {
        let pending: Vec<RecordId> = self
            .records
            .iter()
            .filter(|r| r.state == ProcessingState::Pending)
            .map(|r| r.id)
            .collect();
        pending
            .into_iter()
            .filter(|&id| self.analyze(id).is_ok())
            .count()
    }

    /// Hands a record to the worker pool: `-> Cleaning`.
    ///
    /// Allowed from `Pending`, `Idle` and `Error`. The result is applied by
    /// [`next_completion`](Self::next_completion) and friends.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn request_clean(&mut self, id: RecordId) -> Result<()> {
        let record = self.record_mut(id)?;
        match record.state {
            ProcessingState::Pending | ProcessingState::Idle | ProcessingState::Error => {}
            state => return Err(GuardError::InvalidTransition { id, state }),
        }
        record.state = ProcessingState::Cleaning;
        record.error = None;
        let image = record.image.clone();

        let permits = Arc::clone(&self.permits);
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(_permit) => {
                    match tokio::task::spawn_blocking(move || redact(&image)).await {
                        Ok(result) => result.map(|r| r.cleaned_file_bytes),
                        Err(join) => Err(GuardError::RedactionIoFailure(format!(
                            "cleaning task stopped: {join}"
                        ))),
                    }
                }
                Err(_) => Err(GuardError::RedactionIoFailure(
                    "worker pool is closed".to_string(),
                )),
            };
            // The batch may be gone already; then nobody wants the result.
            let _ = results.send(CleanMessage { id, outcome });
        });
        self.in_flight += 1;
        Ok(())
    }

    fn apply(&mut self, message: CleanMessage) {
        let CleanMessage { id, outcome } = message;
        let Some(record) = self.records.iter_mut().find(|r| r.id == id) else {
            debug!("discarding cleaning result for removed record {id}");
            return;
        };
        if record.state != ProcessingState::Cleaning {
            debug!("discarding stale cleaning result for {id}");
            return;
        }
        match outcome {
            Ok(bytes) => {
                debug!("{id} ({}) cleaned, {} bytes", record.name, bytes.len());
                record.state = ProcessingState::Done;
                record.cleaned = Some(bytes.into());
            }
            Err(err) => {
                warn!("{id} ({}) could not be cleaned: {err}", record.name);
                record.fail(err);
            }
        }
    }

    /// Waits for the next worker result and applies it.
    ///
    /// Returns the id the result was for (which may since have been removed),
    /// or `None` when nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<RecordId> {
        if self.in_flight == 0 {
            return None;
        }
        // We hold a sender ourselves, so the channel cannot close under us.
        let message = self.results_rx.recv().await?;
        self.in_flight -= 1;
        let id = message.id;
        self.apply(message);
        Some(id)
    }

    /// Waits until the given record has left `Cleaning`.
    pub async fn wait_for(&mut self, id: RecordId) -> Result<&ProcessingRecord> {
        while self
            .get(id)
            .is_some_and(|r| r.state == ProcessingState::Cleaning)
        {
            if self.next_completion().await.is_none() {
                break;
            }
        }
        self.get(id).ok_or(GuardError::UnknownRecord(id))
    }

    /// Cleans one record and waits for its result.
    pub async fn clean(&mut self, id: RecordId) -> Result<Arc<[u8]>> {
        self.request_clean(id)?;
        let record = self.wait_for(id).await?;
        match (&record.cleaned, &record.error) {
            (Some(bytes), _) if record.state == ProcessingState::Done => Ok(Arc::clone(bytes)),
            (_, Some(err)) => Err(err.clone()),
            _ => Err(GuardError::InvalidTransition {
                id,
                state: record.state,
            }),
        }
    }

    /// Waits until every dispatched cleaning has reported back.
    pub async fn finish(&mut self) {
        while self.next_completion().await.is_some() {}
    }

    /// Cleans every record that is not `Done` yet, concurrently, and returns
    /// the aggregate.
    pub async fn clean_all(&mut self) -> BatchOutput {
        let todo: Vec<RecordId> = self
            .records
            .iter()
            .filter(|r| {
                matches!(
                    r.state,
                    ProcessingState::Pending | ProcessingState::Idle | ProcessingState::Error
                )
            })
            .map(|r| r.id)
            .collect();
        info!("cleaning {} of {} records", todo.len(), self.records.len());
        for id in todo {
            if let Err(err) = self.request_clean(id) {
                warn!("could not dispatch {id}: {err}");
            }
        }
        self.finish().await;

        let output = self.output();
        info!(
            "batch finished: {} cleaned, {} failed",
            output.cleaned.len(),
            output.failed.len()
        );
        output
    }

    /// Snapshot of every `Done` output and every `Error`, in intake order.
    pub fn output(&self) -> BatchOutput {
        let mut output = BatchOutput::default();
        for record in &self.records {
            match (record.state, &record.cleaned, &record.error) {
                (ProcessingState::Done, Some(bytes), _) => output.cleaned.push(CleanedImage {
                    id: record.id,
                    name: format!("{}{}", self.config.output_prefix, record.name),
                    bytes: Arc::clone(bytes),
                }),
                (ProcessingState::Error, _, Some(reason)) => output.failed.push(FailedImage {
                    id: record.id,
                    name: record.name.clone(),
                    reason: reason.clone(),
                }),
                _ => {}
            }
        }
        output
    }
}
