//! Messages into the workflow loop and events out of it.

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::artifact::{DownloadError, ResultArtifact};
use crate::upload::{CandidateFile, FileInfo, ReadError, StagedImage};

use super::WorkflowError;
use super::state::{Notice, RunId, RunStatus, SlotId, UploadTicket, WorkflowSnapshot};

/// Reply channel for a single request.
pub type Reply<T> = oneshot::Sender<T>;

/// Request sent from a [`super::WorkflowHandle`] to the workflow loop.
#[derive(Debug)]
pub enum WorkflowCommand {
    Upload {
        slot: SlotId,
        file: CandidateFile,
        reply: Reply<Result<SlotUpdate, WorkflowError>>,
    },
    ClearSlot {
        slot: SlotId,
        reply: Reply<()>,
    },
    ClearAll {
        reply: Reply<()>,
    },
    StartRun {
        reply: Reply<Result<RunId, WorkflowError>>,
    },
    DismissResult {
        reply: Reply<bool>,
    },
    QueryRun {
        run: RunId,
        reply: Reply<RunStatus>,
    },
    /// Write the current result into `dir`.
    Download {
        dir: PathBuf,
        reply: Reply<Result<PathBuf, WorkflowError>>,
    },
    Snapshot {
        reply: Reply<WorkflowSnapshot>,
    },
}

/// A preview read finishing, sent back from its task to the loop.
#[derive(Debug)]
pub struct ReadCompletion {
    pub ticket: UploadTicket,
    pub result: Result<StagedImage, ReadError>,
    pub reply: Reply<Result<SlotUpdate, WorkflowError>>,
}

/// A result download finishing.
#[derive(Debug)]
pub struct DownloadCompletion {
    pub result: Result<PathBuf, DownloadError>,
    pub reply: Reply<Result<PathBuf, WorkflowError>>,
}

/// Successful `Upload` reply: the slot now holds `file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotUpdate {
    pub slot: SlotId,
    pub file: FileInfo,
}

/// Observable change, broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    SlotUpdated { slot: SlotId, file: FileInfo },
    SlotCleared { slot: SlotId },
    Cleared,
    RunStarted { run: RunId },
    Progress { run: RunId, percent: u8 },
    Completed { run: RunId, artifact: ResultArtifact },
    ResultDismissed,
    Notice { notice: Notice },
    NoticeCleared,
}
