//! CLI driver for the workflow.
//!
//! `swap` plays the part of the demo page: both files are staged
//! concurrently, the simulated run is started, events are printed as
//! they arrive, and the result is downloaded into the output directory.
//! `validate` checks files against the upload rules without staging
//! them.

mod format;

use std::path::{Path, PathBuf};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::upload::{self, CandidateFile};
use crate::workflow::state::WorkflowConfig;
use crate::workflow::{self, SlotId, WorkflowError, WorkflowEvent};

/// Session error type.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("output error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Inputs of one `swap` invocation.
#[derive(Debug)]
pub struct SwapRequest {
    pub source: PathBuf,
    pub target: PathBuf,
    pub out_dir: PathBuf,
    pub json: bool,
}

/// Run a full swap session and return the downloaded result path.
///
/// # Errors
///
/// [`SessionError::Open`] if an input cannot be opened, and
/// [`SessionError::Workflow`] for a refused upload or a failed download.
pub async fn run_swap(request: SwapRequest, config: WorkflowConfig) -> Result<PathBuf, SessionError> {
    let source = open(&request.source)?;
    let target = open(&request.target)?;

    let wf = workflow::spawn(config);
    let printer = tokio::spawn(print_events(wf.subscribe(), request.json));

    let outcome = drive(&wf, source, target, &request.out_dir).await;

    // Dropping the last handle stops the loop and closes the event
    // channel, which lets the printer drain and exit.
    drop(wf);
    match printer.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "event output failed"),
        Err(e) => tracing::warn!(error = %e, "event printer panicked"),
        Ok(Ok(())) => {}
    }

    let path = outcome?;
    if !request.json {
        println!("saved {}", path.display());
    }
    Ok(path)
}

async fn drive(
    wf: &workflow::WorkflowHandle,
    source: CandidateFile,
    target: CandidateFile,
    out_dir: &Path,
) -> Result<PathBuf, SessionError> {
    let (source, target) = tokio::join!(
        wf.upload(SlotId::Source, source),
        wf.upload(SlotId::Target, target),
    );
    source?;
    target?;

    let artifact = wf.run_to_completion().await?;
    tracing::debug!(artifact = %artifact.id, "run finished, downloading");
    Ok(wf.download(out_dir).await?)
}

async fn print_events(
    mut events: broadcast::Receiver<WorkflowEvent>,
    json: bool,
) -> Result<(), serde_json::Error> {
    loop {
        match events.recv().await {
            Ok(event) => format::print_event(&event, json)?,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event output lagging");
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

/// Check each path against the upload rules.
///
/// Returns `true` if every file would be accepted.
pub fn run_validate(paths: &[PathBuf], max_upload_bytes: u64) -> Result<bool, SessionError> {
    let mut all_accepted = true;
    for path in paths {
        let candidate = open(path)?;
        let outcome = upload::validate(&candidate.info, max_upload_bytes);
        if outcome != upload::ValidationOutcome::Accepted {
            all_accepted = false;
        }
        format::print_validation(&path.display().to_string(), &candidate.info, outcome);
    }
    Ok(all_accepted)
}

fn open(path: &Path) -> Result<CandidateFile, SessionError> {
    CandidateFile::from_path(path).map_err(|e| SessionError::Open {
        path: path.to_path_buf(),
        source: e,
    })
}
