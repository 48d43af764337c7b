//! Caller side of the workflow loop.

use std::path::{Path, PathBuf};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::artifact::ResultArtifact;
use crate::upload::CandidateFile;

use super::WorkflowError;
use super::command::{Reply, SlotUpdate, WorkflowCommand, WorkflowEvent};
use super::state::{RunId, RunStatus, SlotId, WorkflowSnapshot};

/// Cloneable handle to a running workflow.
///
/// Every operation is a message to the loop; nothing here touches state
/// directly.
#[derive(Debug, Clone)]
pub struct WorkflowHandle {
    cmd_tx: mpsc::UnboundedSender<WorkflowCommand>,
    snapshot_rx: watch::Receiver<WorkflowSnapshot>,
    event_tx: broadcast::Sender<WorkflowEvent>,
}

impl WorkflowHandle {
    pub(super) fn new(
        cmd_tx: mpsc::UnboundedSender<WorkflowCommand>,
        snapshot_rx: watch::Receiver<WorkflowSnapshot>,
        event_tx: broadcast::Sender<WorkflowEvent>,
    ) -> Self {
        Self {
            cmd_tx,
            snapshot_rx,
            event_tx,
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> WorkflowCommand,
    ) -> Result<T, WorkflowError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(command(tx))
            .map_err(|_| WorkflowError::Closed)?;
        rx.await.map_err(|_| WorkflowError::Closed)
    }

    /// Stage `file` into `slot`.
    ///
    /// Resolves once the preview has been encoded and the slot updated.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::Validation`] if the file is refused,
    /// [`WorkflowError::Read`] if its bytes cannot be read, and
    /// [`WorkflowError::Superseded`] if the slot was cleared or re-uploaded
    /// before the preview was ready.
    pub async fn upload(&self, slot: SlotId, file: CandidateFile) -> Result<SlotUpdate, WorkflowError> {
        self.request(|reply| WorkflowCommand::Upload { slot, file, reply })
            .await?
    }

    /// Drag-and-drop: stage the first of `files`. `None` for an empty drop.
    pub async fn drop_files(
        &self,
        slot: SlotId,
        files: Vec<CandidateFile>,
    ) -> Option<Result<SlotUpdate, WorkflowError>> {
        let first = files.into_iter().next()?;
        Some(self.upload(slot, first).await)
    }

    pub async fn clear_slot(&self, slot: SlotId) -> Result<(), WorkflowError> {
        self.request(|reply| WorkflowCommand::ClearSlot { slot, reply })
            .await
    }

    pub async fn clear_all(&self) -> Result<(), WorkflowError> {
        self.request(|reply| WorkflowCommand::ClearAll { reply }).await
    }

    /// Start a processing run. Returns as soon as the run is active.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::Precondition`] unless both slots hold an image;
    /// [`WorkflowError::AlreadyProcessing`] while another run is active.
    pub async fn start_processing(&self) -> Result<RunId, WorkflowError> {
        self.request(|reply| WorkflowCommand::StartRun { reply })
            .await?
    }

    /// Where `run` stands.
    pub async fn run_status(&self, run: RunId) -> Result<RunStatus, WorkflowError> {
        self.request(|reply| WorkflowCommand::QueryRun { run, reply })
            .await
    }

    /// Wait for `run` to finish and return its artifact.
    ///
    /// A run that already finished resolves immediately, even if its
    /// result has since been cleared or dismissed or a later run is active.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::UnknownRun`] if `run` is neither active nor the
    /// last run to complete.
    pub async fn wait_for_completion(&self, run: RunId) -> Result<ResultArtifact, WorkflowError> {
        // Subscribe before asking, so a completion in between is not missed.
        let mut events = self.subscribe();
        loop {
            match self.run_status(run).await? {
                RunStatus::Finished(artifact) => return Ok(artifact),
                RunStatus::Unknown => return Err(WorkflowError::UnknownRun(run)),
                RunStatus::Active => {}
            }
            loop {
                match events.recv().await {
                    Ok(WorkflowEvent::Completed { run: done, artifact }) if done == run => {
                        return Ok(artifact);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // The completion may be among the skipped events.
                        tracing::debug!(skipped, "event receiver lagged");
                        break;
                    }
                    Err(RecvError::Closed) => return Err(WorkflowError::Closed),
                }
            }
        }
    }

    /// Start a run and wait for its artifact.
    pub async fn run_to_completion(&self) -> Result<ResultArtifact, WorkflowError> {
        let run = self.start_processing().await?;
        self.wait_for_completion(run).await
    }

    /// Drop the current result.
    pub async fn dismiss_result(&self) -> Result<bool, WorkflowError> {
        self.request(|reply| WorkflowCommand::DismissResult { reply })
            .await
    }

    /// Write the current result into `dir` as `magicswap-result.jpg`.
    ///
    /// The result is taken when the request reaches the loop; dismissing
    /// it while the file is being written does not undo the download.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::NoResult`] if there is no result, or
    /// [`WorkflowError::Download`] if rendering or writing fails.
    pub async fn download(&self, dir: &Path) -> Result<PathBuf, WorkflowError> {
        let dir = dir.to_path_buf();
        self.request(|reply| WorkflowCommand::Download { dir, reply })
            .await?
    }

    /// Current state, ordered after every command sent before it.
    pub async fn snapshot(&self) -> Result<WorkflowSnapshot, WorkflowError> {
        self.request(|reply| WorkflowCommand::Snapshot { reply })
            .await
    }

    /// Receiver that always holds the latest published snapshot.
    pub fn watch(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.event_tx.subscribe()
    }
}
