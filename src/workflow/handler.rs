//! Command dispatch and timer handling.
//!
//! Pure logic: no I/O and no clock. Each handler mutates
//! [`WorkflowState`], answers the caller if there is one, appends
//! [`WorkflowEvent`]s to `events`, and may return a [`SideEffect`] for
//! the workflow loop to carry out (spawn a read or a download, arm the
//! run timers).

use std::path::PathBuf;

use crate::artifact::ResultArtifact;
use crate::upload::CandidateFile;

use super::WorkflowError;
use super::command::{
    DownloadCompletion, ReadCompletion, Reply, SlotUpdate, WorkflowCommand, WorkflowEvent,
};
use super::state::{RunId, UploadTicket, WorkflowState};

/// Work the loop must perform after a command has been handled.
#[derive(Debug)]
pub enum SideEffect {
    /// Read `file` and encode its preview, then report back with `ticket`.
    Stage {
        ticket: UploadTicket,
        file: CandidateFile,
        reply: Reply<Result<SlotUpdate, WorkflowError>>,
    },
    /// Start the progress ticker and completion deadline for `run`.
    ArmRun(RunId),
    /// Write `artifact` into `dir`, then report back.
    Download {
        artifact: ResultArtifact,
        dir: PathBuf,
        reply: Reply<Result<PathBuf, WorkflowError>>,
    },
}

pub fn handle_command(
    state: &mut WorkflowState,
    command: WorkflowCommand,
    events: &mut Vec<WorkflowEvent>,
) -> Option<SideEffect> {
    match command {
        WorkflowCommand::Upload { slot, file, reply } => match state.begin_upload(slot, &file.info) {
            Ok(ticket) => {
                tracing::debug!(%slot, name = %file.info.name, size = file.info.size, "upload accepted");
                Some(SideEffect::Stage {
                    ticket,
                    file,
                    reply,
                })
            }
            Err(reason) => {
                tracing::info!(%slot, name = %file.info.name, %reason, "upload rejected");
                let _ = reply.send(Err(WorkflowError::Validation(reason)));
                None
            }
        },
        WorkflowCommand::ClearSlot { slot, reply } => {
            state.clear_slot(slot);
            events.push(WorkflowEvent::SlotCleared { slot });
            let _ = reply.send(());
            None
        }
        WorkflowCommand::ClearAll { reply } => {
            state.clear_all();
            events.push(WorkflowEvent::Cleared);
            let _ = reply.send(());
            None
        }
        WorkflowCommand::StartRun { reply } => match state.start_run() {
            Ok(run) => {
                tracing::info!(%run, "processing started");
                events.push(WorkflowEvent::RunStarted { run });
                events.push(WorkflowEvent::Progress { run, percent: 0 });
                let _ = reply.send(Ok(run));
                Some(SideEffect::ArmRun(run))
            }
            Err(reason) => {
                tracing::debug!(reason, "processing not started");
                let _ = reply.send(Err(run_error(reason)));
                None
            }
        },
        WorkflowCommand::DismissResult { reply } => {
            let dismissed = state.dismiss_result();
            if dismissed {
                events.push(WorkflowEvent::ResultDismissed);
            }
            let _ = reply.send(dismissed);
            None
        }
        WorkflowCommand::QueryRun { run, reply } => {
            let _ = reply.send(state.run_status(run));
            None
        }
        WorkflowCommand::Download { dir, reply } => match state.result() {
            Some(artifact) => Some(SideEffect::Download {
                artifact: artifact.clone(),
                dir,
                reply,
            }),
            None => {
                let _ = reply.send(Err(WorkflowError::NoResult));
                None
            }
        },
        WorkflowCommand::Snapshot { reply } => {
            let _ = reply.send(state.snapshot());
            None
        }
    }
}

/// Apply a finished preview read.
pub fn handle_read(state: &mut WorkflowState, done: ReadCompletion, events: &mut Vec<WorkflowEvent>) {
    let ReadCompletion {
        ticket,
        result,
        reply,
    } = done;
    let slot = ticket.slot;

    let outcome = match result {
        Ok(image) => {
            let file = image.file.clone();
            match state.complete_upload(ticket, image) {
                Ok(()) => {
                    tracing::info!(%slot, name = %file.name, "slot updated");
                    events.push(WorkflowEvent::SlotUpdated {
                        slot,
                        file: file.clone(),
                    });
                    Ok(SlotUpdate { slot, file })
                }
                Err(_) => {
                    tracing::debug!(%slot, name = %file.name, "discarding stale preview");
                    Err(WorkflowError::Superseded)
                }
            }
        }
        Err(e) => match state.fail_upload(ticket, &e) {
            Ok(()) => {
                tracing::warn!(%slot, error = %e, "preview read failed");
                Err(WorkflowError::Read(e))
            }
            Err(_) => Err(WorkflowError::Superseded),
        },
    };
    let _ = reply.send(outcome);
}

/// Apply a finished download. Success sets the notice whether or not
/// the result is still current.
pub fn handle_download(state: &mut WorkflowState, done: DownloadCompletion) {
    let outcome = match done.result {
        Ok(path) => {
            tracing::info!(path = %path.display(), "result downloaded");
            state.record_download();
            Ok(path)
        }
        Err(e) => {
            tracing::warn!(error = %e, "download failed");
            Err(WorkflowError::Download(e))
        }
    };
    let _ = done.reply.send(outcome);
}

/// One progress tick. Emits an event only when progress moved.
pub fn handle_tick(state: &mut WorkflowState, run: RunId, events: &mut Vec<WorkflowEvent>) {
    if let Some(percent) = state.tick(run) {
        tracing::trace!(%run, percent, "progress");
        events.push(WorkflowEvent::Progress { run, percent });
    }
}

/// The run deadline elapsed: report 100% and publish the result.
///
/// Returns `true` if `run` was the active run.
pub fn handle_deadline(state: &mut WorkflowState, run: RunId, events: &mut Vec<WorkflowEvent>) -> bool {
    match state.finish_run(run) {
        Some(artifact) => {
            tracing::info!(%run, artifact = %artifact.id, "processing complete");
            events.push(WorkflowEvent::Progress { run, percent: 100 });
            events.push(WorkflowEvent::Completed { run, artifact });
            true
        }
        None => false,
    }
}

fn run_error(reason: &str) -> WorkflowError {
    match reason {
        "already_processing" => WorkflowError::AlreadyProcessing,
        _ => WorkflowError::Precondition,
    }
}
