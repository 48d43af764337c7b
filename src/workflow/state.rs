//! Workflow state: two image slots, processing phase, result, notice.
//!
//! All methods are pure state transitions with no I/O. The workflow loop
//! owns the only instance. Error strings are machine-readable reasons
//! that the loop maps onto [`super::WorkflowError`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::artifact::ResultArtifact;
use crate::upload::{self, FileInfo, MAX_UPLOAD_BYTES, ReadError, RejectReason, StagedImage};

/// Which of the two image slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotId {
    Source,
    Target,
}

impl SlotId {
    fn label(self) -> &'static str {
        match self {
            Self::Source => "Source",
            Self::Target => "Target",
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Source => "source",
            Self::Target => "target",
        })
    }
}

/// Identifier of one processing run. Increases per workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RunId(u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Proof that an upload was accepted, tagged with the slot generation
/// at acceptance time. A completion carrying an older generation is
/// stale and gets discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTicket {
    pub slot: SlotId,
    generation: u64,
}

/// The single user-facing message. Error and success are exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Notice {
    Error(String),
    Success(String),
}

impl Notice {
    pub fn message(&self) -> &str {
        match self {
            Self::Error(m) | Self::Success(m) => m,
        }
    }
}

/// Where a given run stands, as far as the workflow still knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// The run is in progress.
    Active,
    /// The run was the most recent one to complete.
    Finished(ResultArtifact),
    /// Neither active nor the last completed run.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Processing { run: RunId, progress: u8 },
}

/// Timing and limits of the workflow.
///
/// Defaults reproduce the demo page: +10% every 300 ms up to 90%,
/// finishing after 3 s, uploads up to 10 MiB.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub tick_interval: Duration,
    pub progress_step: u8,
    pub progress_ceiling: u8,
    pub processing_duration: Duration,
    pub max_upload_bytes: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(300),
            progress_step: 10,
            progress_ceiling: 90,
            processing_duration: Duration::from_secs(3),
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("tick interval must be non-zero")]
    ZeroTick,
    #[error("processing duration must be non-zero")]
    ZeroDuration,
    #[error("progress step must be non-zero")]
    ZeroStep,
    #[error("progress ceiling must be between 1 and 99, got {0}")]
    Ceiling(u8),
    #[error("upload limit must be non-zero")]
    ZeroUploadLimit,
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTick);
        }
        if self.processing_duration.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }
        if self.progress_step == 0 {
            return Err(ConfigError::ZeroStep);
        }
        if !(1..=99).contains(&self.progress_ceiling) {
            return Err(ConfigError::Ceiling(self.progress_ceiling));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::ZeroUploadLimit);
        }
        Ok(())
    }
}

/// Read-only view handed to presentation code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowSnapshot {
    pub source: Option<Arc<StagedImage>>,
    pub target: Option<Arc<StagedImage>>,
    pub processing: bool,
    /// The active run, if any.
    pub run: Option<RunId>,
    /// Current run progress; 0 whenever no run is active.
    pub progress: u8,
    pub result: Option<ResultArtifact>,
    pub notice: Option<Notice>,
}

#[derive(Debug, Default)]
struct Slot {
    image: Option<Arc<StagedImage>>,
    generation: u64,
}

impl Slot {
    fn reset(&mut self) {
        self.image = None;
        self.generation += 1;
    }
}

#[derive(Debug)]
pub struct WorkflowState {
    config: WorkflowConfig,
    source: Slot,
    target: Slot,
    phase: Phase,
    result: Option<ResultArtifact>,
    notice: Option<Notice>,
    /// Bumped on every notice write, including repeats and clears.
    notice_seq: u64,
    last_completed: Option<(RunId, ResultArtifact)>,
    next_run: u64,
}

impl WorkflowState {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config,
            source: Slot::default(),
            target: Slot::default(),
            phase: Phase::Idle,
            result: None,
            notice: None,
            notice_seq: 0,
            last_completed: None,
            next_run: 1,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// Counter of notice writes. Differs between two reads iff the
    /// notice was set or cleared in between.
    pub fn notice_seq(&self) -> u64 {
        self.notice_seq
    }

    fn set_notice(&mut self, notice: Option<Notice>) {
        self.notice = notice;
        self.notice_seq += 1;
    }

    pub fn result(&self) -> Option<&ResultArtifact> {
        self.result.as_ref()
    }

    pub fn image(&self, id: SlotId) -> Option<&Arc<StagedImage>> {
        self.slot(id).image.as_ref()
    }

    fn slot(&self, id: SlotId) -> &Slot {
        match id {
            SlotId::Source => &self.source,
            SlotId::Target => &self.target,
        }
    }

    fn slot_mut(&mut self, id: SlotId) -> &mut Slot {
        match id {
            SlotId::Source => &mut self.source,
            SlotId::Target => &mut self.target,
        }
    }

    // -- Uploads --

    /// Validate a candidate and, if accepted, issue a ticket for its
    /// preview read.
    ///
    /// Clears the notice first. On rejection the error notice is set and
    /// the slot is untouched. On acceptance the slot generation advances,
    /// which invalidates any earlier read still in flight for this slot.
    pub fn begin_upload(&mut self, id: SlotId, file: &FileInfo) -> Result<UploadTicket, RejectReason> {
        self.set_notice(None);
        if let Err(reason) = upload::validate(file, self.config.max_upload_bytes).into_result() {
            self.set_notice(Some(Notice::Error(reason.user_message().to_string())));
            return Err(reason);
        }
        let slot = self.slot_mut(id);
        slot.generation += 1;
        Ok(UploadTicket {
            slot: id,
            generation: slot.generation,
        })
    }

    fn is_current(&self, ticket: UploadTicket) -> bool {
        self.slot(ticket.slot).generation == ticket.generation
    }

    /// Install a finished preview into its slot.
    ///
    /// Returns `Err("stale_generation")` if the slot was cleared or
    /// re-uploaded since the ticket was issued.
    pub fn complete_upload(&mut self, ticket: UploadTicket, image: StagedImage) -> Result<(), &'static str> {
        if !self.is_current(ticket) {
            return Err("stale_generation");
        }
        self.slot_mut(ticket.slot).image = Some(Arc::new(image));
        self.result = None;
        self.set_notice(Some(Notice::Success(format!(
            "{} image uploaded successfully!",
            ticket.slot.label()
        ))));
        Ok(())
    }

    /// Record a failed preview read. The slot keeps its previous image.
    ///
    /// Stale failures are dropped silently (`Err("stale_generation")`).
    pub fn fail_upload(&mut self, ticket: UploadTicket, error: &ReadError) -> Result<(), &'static str> {
        if !self.is_current(ticket) {
            return Err("stale_generation");
        }
        self.set_notice(Some(Notice::Error(error.user_message().to_string())));
        Ok(())
    }

    /// Empty one slot. The other slot, the result and any active run
    /// are left alone.
    pub fn clear_slot(&mut self, id: SlotId) {
        self.slot_mut(id).reset();
    }

    /// Empty both slots and drop the result and notice. Idempotent in
    /// observable state; an active run keeps going.
    pub fn clear_all(&mut self) {
        self.source.reset();
        self.target.reset();
        self.result = None;
        self.set_notice(None);
    }

    /// Drop the result. Returns whether there was one.
    pub fn dismiss_result(&mut self) -> bool {
        self.result.take().is_some()
    }

    // -- Processing --

    /// Enter `Processing` if both slots hold an image.
    ///
    /// Errors:
    /// - `"already_processing"`: a run is active; nothing changes.
    /// - `"missing_images"`: a slot is empty; the error notice is set.
    pub fn start_run(&mut self) -> Result<RunId, &'static str> {
        if matches!(self.phase, Phase::Processing { .. }) {
            return Err("already_processing");
        }
        if self.source.image.is_none() || self.target.image.is_none() {
            self.set_notice(Some(Notice::Error(
                "Please upload both source and target images".to_string(),
            )));
            return Err("missing_images");
        }
        let run = RunId(self.next_run);
        self.next_run += 1;
        self.phase = Phase::Processing { run, progress: 0 };
        self.set_notice(None);
        self.result = None;
        Ok(run)
    }

    /// Advance progress by one step, capped at the ceiling.
    ///
    /// Returns the new value only when it changed, so successive returns
    /// strictly increase. Ticks for another run are ignored.
    pub fn tick(&mut self, run: RunId) -> Option<u8> {
        let step = self.config.progress_step;
        let ceiling = self.config.progress_ceiling;
        match &mut self.phase {
            Phase::Processing {
                run: active,
                progress,
            } if *active == run && *progress < ceiling => {
                *progress = progress.saturating_add(step).min(ceiling);
                Some(*progress)
            }
            _ => None,
        }
    }

    /// Complete the run: back to `Idle` with a fresh result.
    ///
    /// The artifact is also remembered as the last completed run, so
    /// waiters can still collect it after the result is cleared.
    /// Returns `None` if `run` is not the active run.
    pub fn finish_run(&mut self, run: RunId) -> Option<ResultArtifact> {
        match self.phase {
            Phase::Processing { run: active, .. } if active == run => {}
            _ => return None,
        }
        let artifact = ResultArtifact::placeholder();
        self.phase = Phase::Idle;
        self.result = Some(artifact.clone());
        self.last_completed = Some((run, artifact.clone()));
        self.set_notice(Some(Notice::Success(
            "Face swap completed successfully!".to_string(),
        )));
        Some(artifact)
    }

    pub fn run_status(&self, run: RunId) -> RunStatus {
        match (&self.phase, &self.last_completed) {
            (Phase::Processing { run: active, .. }, _) if *active == run => RunStatus::Active,
            (_, Some((done, artifact))) if *done == run => RunStatus::Finished(artifact.clone()),
            _ => RunStatus::Unknown,
        }
    }

    /// Note that a result was written to disk.
    ///
    /// The artifact was taken when the download began, so this holds even
    /// if the result has been dismissed since.
    pub fn record_download(&mut self) {
        self.set_notice(Some(Notice::Success(
            "Image downloaded successfully!".to_string(),
        )));
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        let (run, progress) = match self.phase {
            Phase::Idle => (None, 0),
            Phase::Processing { run, progress } => (Some(run), progress),
        };
        WorkflowSnapshot {
            source: self.source.image.clone(),
            target: self.target.image.clone(),
            processing: run.is_some(),
            run,
            progress,
            result: self.result.clone(),
            notice: self.notice.clone(),
        }
    }
}
