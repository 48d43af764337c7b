//! Upload/validate/process workflow.
//!
//! Architecture: channel-based actor. A single workflow loop owns all
//! mutable state ([`state::WorkflowState`]). [`WorkflowHandle`]s forward
//! commands over an mpsc channel and get answers on oneshot channels.
//! Preview reads run as spawned tasks and report back through a second
//! channel; the simulated processing run is a progress ticker plus a
//! completion deadline on the tokio clock.
//!
//! Downloads are handled the same way as reads.
//!
//! After every transition the loop publishes a [`WorkflowSnapshot`] on a
//! watch channel and any [`WorkflowEvent`]s on a broadcast channel. Every
//! notice write is broadcast, repeats included; a cleared notice is
//! broadcast as [`WorkflowEvent::NoticeCleared`].

mod command;
mod handle;
mod handler;
pub mod state;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::artifact::{self, DownloadError};
use crate::upload::{self, ReadError, RejectReason};

use command::{DownloadCompletion, ReadCompletion, WorkflowCommand};
use handler::SideEffect;
use state::{WorkflowConfig, WorkflowState};

pub use command::{SlotUpdate, WorkflowEvent};
pub use handle::WorkflowHandle;
pub use state::{Notice, RunId, RunStatus, SlotId, WorkflowSnapshot};

const EVENT_CAPACITY: usize = 64;

/// Errors surfaced to workflow callers.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("upload rejected: {0}")]
    Validation(RejectReason),
    #[error("preview read failed: {0}")]
    Read(#[from] ReadError),
    #[error("both images required")]
    Precondition,
    #[error("a processing run is already active")]
    AlreadyProcessing,
    #[error("upload superseded by a later change to the slot")]
    Superseded,
    #[error("no result to download")]
    NoResult,
    #[error("{0} is neither active nor the last completed run")]
    UnknownRun(RunId),
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),
    #[error("workflow loop stopped")]
    Closed,
}

/// Timers of the run in progress.
struct ActiveRun {
    run: RunId,
    ticker: Interval,
    deadline: Instant,
}

/// Start the workflow loop on the current runtime.
///
/// The loop runs until every handle has been dropped.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn spawn(config: WorkflowConfig) -> WorkflowHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let state = WorkflowState::new(config);
    let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
    let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

    tokio::spawn(run_loop(state, cmd_rx, snapshot_tx, event_tx.clone()));

    WorkflowHandle::new(cmd_tx, snapshot_rx, event_tx)
}

async fn run_loop(
    mut state: WorkflowState,
    mut cmd_rx: mpsc::UnboundedReceiver<WorkflowCommand>,
    snapshot_tx: watch::Sender<WorkflowSnapshot>,
    event_tx: broadcast::Sender<WorkflowEvent>,
) {
    let (read_tx, mut read_rx) = mpsc::unbounded_channel::<ReadCompletion>();
    let (download_tx, mut download_rx) = mpsc::unbounded_channel::<DownloadCompletion>();
    let mut active: Option<ActiveRun> = None;
    let mut events = Vec::new();

    tracing::debug!("workflow loop started");

    loop {
        let notice_seq = state.notice_seq();
        let had_notice = state.notice().is_some();
        let deadline = active.as_ref().map(|a| a.deadline);

        tokio::select! {
            biased;

            // -- Command from a handle --
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match handler::handle_command(&mut state, cmd, &mut events) {
                    Some(SideEffect::Stage { ticket, file, reply }) => {
                        let read_tx = read_tx.clone();
                        tokio::spawn(async move {
                            let result = upload::stage(file).await;
                            let _ = read_tx.send(ReadCompletion { ticket, result, reply });
                        });
                    }
                    Some(SideEffect::ArmRun(run)) => {
                        active = Some(arm_run(run, state.config()));
                    }
                    Some(SideEffect::Download { artifact, dir, reply }) => {
                        let download_tx = download_tx.clone();
                        tokio::spawn(async move {
                            let result = artifact::download(&artifact, &dir).await;
                            let _ = download_tx.send(DownloadCompletion { result, reply });
                        });
                    }
                    None => {}
                }
            }

            // -- Preview read finished --
            Some(done) = read_rx.recv() => {
                handler::handle_read(&mut state, done, &mut events);
            }

            // -- Download finished --
            Some(done) = download_rx.recv() => {
                handler::handle_download(&mut state, done);
            }

            // -- Run deadline --
            () = wait_until(deadline) => {
                if let Some(run) = active.take().map(|a| a.run) {
                    handler::handle_deadline(&mut state, run, &mut events);
                }
            }

            // -- Progress tick --
            run = next_tick(&mut active) => {
                handler::handle_tick(&mut state, run, &mut events);
            }
        }

        if state.notice_seq() != notice_seq {
            match state.notice() {
                Some(notice) => events.push(WorkflowEvent::Notice {
                    notice: notice.clone(),
                }),
                None if had_notice => events.push(WorkflowEvent::NoticeCleared),
                None => {}
            }
        }
        publish(&state, &snapshot_tx, &event_tx, &mut events);
    }

    tracing::debug!("workflow loop stopped");
}

fn arm_run(run: RunId, config: &WorkflowConfig) -> ActiveRun {
    let start = Instant::now();
    let mut ticker = tokio::time::interval_at(start + config.tick_interval, config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ActiveRun {
        run,
        ticker,
        deadline: start + config.processing_duration,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(active: &mut Option<ActiveRun>) -> RunId {
    match active {
        Some(a) => {
            a.ticker.tick().await;
            a.run
        }
        None => std::future::pending().await,
    }
}

fn publish(
    state: &WorkflowState,
    snapshot_tx: &watch::Sender<WorkflowSnapshot>,
    event_tx: &broadcast::Sender<WorkflowEvent>,
    events: &mut Vec<WorkflowEvent>,
) {
    snapshot_tx.send_replace(state.snapshot());
    for event in events.drain(..) {
        // No subscribers is fine.
        let _ = event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::broadcast::error::RecvError;

    use super::*;
    use crate::upload::CandidateFile;

    const MB: usize = 1024 * 1024;

    fn jpeg(size: usize) -> CandidateFile {
        let bytes: Vec<u8> = (0..size).map(|i| (i % 253) as u8).collect();
        CandidateFile::in_memory("face.jpg", "image/jpeg", bytes)
    }

    fn png(size: usize) -> CandidateFile {
        CandidateFile::in_memory("scene.png", "image/png", vec![0x42; size])
    }

    async fn next_event(rx: &mut broadcast::Receiver<WorkflowEvent>) -> WorkflowEvent {
        loop {
            match rx.recv().await {
                Ok(event) => return event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_upload_and_processing_flow() {
        let wf = spawn(WorkflowConfig::default());
        let mut events = wf.subscribe();

        let source = jpeg(2 * MB);
        let source_bytes = match &source.body {
            upload::FileBody::Memory(b) => b.clone(),
            upload::FileBody::Disk(_) => unreachable!(),
        };
        let (a, b) = tokio::join!(
            wf.upload(SlotId::Source, source),
            wf.upload(SlotId::Target, png(3 * MB)),
        );
        assert_eq!(a.unwrap().file.size, (2 * MB) as u64);
        assert_eq!(b.unwrap().file.media_type, "image/png");

        let snap = wf.snapshot().await.unwrap();
        assert_eq!(
            snap.source.as_ref().unwrap().preview.decode().unwrap(),
            source_bytes
        );

        let started_at = Instant::now();
        let run = wf.start_processing().await.unwrap();
        assert!(wf.snapshot().await.unwrap().processing);

        let mut progress = Vec::new();
        let mut artifacts = Vec::new();
        loop {
            match next_event(&mut events).await {
                WorkflowEvent::Progress { run: r, percent } if r == run => progress.push(percent),
                WorkflowEvent::Completed { run: r, artifact } if r == run => {
                    artifacts.push(artifact);
                    break;
                }
                _ => {}
            }
        }

        assert_eq!(progress.first(), Some(&0));
        assert_eq!(progress.last(), Some(&100));
        let running = &progress[..progress.len() - 1];
        assert!(!running.is_empty());
        assert!(running.windows(2).all(|w| w[0] < w[1]));
        assert!(running.iter().all(|&p| p <= 90));
        assert_eq!(artifacts.len(), 1);
        assert_eq!(started_at.elapsed(), Duration::from_secs(3));

        let snap = wf.snapshot().await.unwrap();
        assert!(!snap.processing);
        assert_eq!(snap.progress, 0);
        assert_eq!(snap.result.as_ref(), Some(&artifacts[0]));
        assert_eq!(
            snap.notice,
            Some(Notice::Success("Face swap completed successfully!".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_upload_leaves_slot_empty() {
        let wf = spawn(WorkflowConfig::default());
        let err = wf.upload(SlotId::Source, jpeg(15 * MB)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(RejectReason::TooLarge)));

        let snap = wf.snapshot().await.unwrap();
        assert!(snap.source.is_none());
        assert_eq!(
            snap.notice,
            Some(Notice::Error(RejectReason::TooLarge.user_message().into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn processing_needs_both_slots() {
        let wf = spawn(WorkflowConfig::default());
        wf.upload(SlotId::Source, jpeg(1024)).await.unwrap();
        assert!(matches!(
            wf.start_processing().await,
            Err(WorkflowError::Precondition)
        ));
        assert!(!wf.snapshot().await.unwrap().processing);
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_while_processing_is_rejected() {
        let wf = spawn(WorkflowConfig::default());
        wf.upload(SlotId::Source, jpeg(1024)).await.unwrap();
        wf.upload(SlotId::Target, png(1024)).await.unwrap();

        let first = wf.start_processing().await.unwrap();
        assert!(matches!(
            wf.start_processing().await,
            Err(WorkflowError::AlreadyProcessing)
        ));

        let artifact = wf.wait_for_completion(first).await.unwrap();
        assert_eq!(wf.snapshot().await.unwrap().result, Some(artifact));

        // Reusable once the first run is done.
        let second = wf.start_processing().await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn run_to_completion_returns_artifact() {
        let wf = spawn(WorkflowConfig {
            processing_duration: Duration::from_millis(900),
            ..WorkflowConfig::default()
        });
        wf.upload(SlotId::Source, jpeg(64)).await.unwrap();
        wf.upload(SlotId::Target, png(64)).await.unwrap();

        let artifact = wf.run_to_completion().await.unwrap();
        assert_eq!(artifact.file_name, "magicswap-result.jpg");
        assert_eq!(wf.snapshot().await.unwrap().result, Some(artifact));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_slot_keeps_other_slot_and_result() {
        let wf = spawn(WorkflowConfig::default());
        wf.upload(SlotId::Source, jpeg(64)).await.unwrap();
        wf.upload(SlotId::Target, png(64)).await.unwrap();
        wf.run_to_completion().await.unwrap();

        wf.clear_slot(SlotId::Source).await.unwrap();
        let snap = wf.snapshot().await.unwrap();
        assert!(snap.source.is_none());
        assert!(snap.target.is_some());
        assert!(snap.result.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_is_idempotent() {
        let wf = spawn(WorkflowConfig::default());
        wf.upload(SlotId::Source, jpeg(64)).await.unwrap();
        wf.clear_all().await.unwrap();
        let once = wf.snapshot().await.unwrap();
        wf.clear_all().await.unwrap();
        assert_eq!(wf.snapshot().await.unwrap(), once);
        assert_eq!(once, WorkflowSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_during_run_does_not_cancel_it() {
        let wf = spawn(WorkflowConfig::default());
        wf.upload(SlotId::Source, jpeg(64)).await.unwrap();
        wf.upload(SlotId::Target, png(64)).await.unwrap();
        let run = wf.start_processing().await.unwrap();
        wf.clear_all().await.unwrap();
        wf.wait_for_completion(run).await.unwrap();
        let snap = wf.snapshot().await.unwrap();
        assert!(snap.result.is_some());
        assert!(snap.source.is_none());
    }

    #[tokio::test]
    async fn unreadable_disk_file_reports_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        std::fs::write(&path, b"pixels").unwrap();
        let candidate = CandidateFile::from_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let wf = spawn(WorkflowConfig::default());
        let err = wf.upload(SlotId::Source, candidate).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Read(_)));
        let snap = wf.snapshot().await.unwrap();
        assert!(snap.source.is_none());
        assert_eq!(
            snap.notice.as_ref().map(Notice::message),
            Some("Failed to read the image file. Please try again.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn drop_files_takes_first_and_ignores_empty() {
        let wf = spawn(WorkflowConfig::default());
        assert!(wf.drop_files(SlotId::Target, Vec::new()).await.is_none());

        let first = CandidateFile::in_memory("first.png", "image/png", vec![1; 8]);
        let second = CandidateFile::in_memory("second.png", "image/png", vec![2; 8]);
        let update = wf
            .drop_files(SlotId::Target, vec![first, second])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.file.name, "first.png");
        assert_eq!(
            wf.snapshot().await.unwrap().target.as_ref().unwrap().file.name,
            "first.png"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn notices_are_broadcast() {
        let wf = spawn(WorkflowConfig::default());
        let mut events = wf.subscribe();
        wf.upload(SlotId::Source, jpeg(16)).await.unwrap();

        let mut notices = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let WorkflowEvent::Notice { notice } = event {
                notices.push(notice);
            }
        }
        assert_eq!(
            notices,
            vec![Notice::Success("Source image uploaded successfully!".into())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn download_writes_result_and_sets_notice() {
        let dir = tempfile::tempdir().unwrap();
        let wf = spawn(WorkflowConfig::default());
        assert!(matches!(
            wf.download(dir.path()).await,
            Err(WorkflowError::NoResult)
        ));

        wf.upload(SlotId::Source, jpeg(64)).await.unwrap();
        wf.upload(SlotId::Target, png(64)).await.unwrap();
        wf.run_to_completion().await.unwrap();

        let path = wf.download(dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("magicswap-result.jpg"));
        assert!(path.exists());
        assert_eq!(
            wf.snapshot().await.unwrap().notice,
            Some(Notice::Success("Image downloaded successfully!".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_download_notice_is_broadcast_each_time() {
        let dir = tempfile::tempdir().unwrap();
        let wf = spawn(WorkflowConfig::default());
        wf.upload(SlotId::Source, jpeg(64)).await.unwrap();
        wf.upload(SlotId::Target, png(64)).await.unwrap();
        wf.run_to_completion().await.unwrap();

        let mut events = wf.subscribe();
        wf.download(dir.path()).await.unwrap();
        wf.download(dir.path()).await.unwrap();
        wf.clear_all().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                WorkflowEvent::Notice { notice } => seen.push(Some(notice)),
                WorkflowEvent::NoticeCleared => seen.push(None),
                _ => {}
            }
        }
        let downloaded = Notice::Success("Image downloaded successfully!".into());
        assert_eq!(seen, vec![Some(downloaded.clone()), Some(downloaded), None]);
    }

    #[tokio::test(start_paused = true)]
    async fn download_survives_concurrent_dismiss() {
        let dir = tempfile::tempdir().unwrap();
        let wf = spawn(WorkflowConfig::default());
        wf.upload(SlotId::Source, jpeg(64)).await.unwrap();
        wf.upload(SlotId::Target, png(64)).await.unwrap();
        wf.run_to_completion().await.unwrap();

        let (downloaded, dismissed) = tokio::join!(wf.download(dir.path()), wf.dismiss_result());
        let path = downloaded.unwrap();
        assert!(dismissed.unwrap());
        assert!(path.exists());
        let snap = wf.snapshot().await.unwrap();
        assert!(snap.result.is_none());
        assert_eq!(
            snap.notice,
            Some(Notice::Success("Image downloaded successfully!".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_finished_run_while_next_run_is_active() {
        let wf = spawn(WorkflowConfig::default());
        wf.upload(SlotId::Source, jpeg(64)).await.unwrap();
        wf.upload(SlotId::Target, png(64)).await.unwrap();

        let first = wf.start_processing().await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        let expected = wf.snapshot().await.unwrap().result.unwrap();
        let second = wf.start_processing().await.unwrap();
        assert_eq!(wf.snapshot().await.unwrap().run, Some(second));

        let artifact = tokio::time::timeout(Duration::from_secs(60), wf.wait_for_completion(first))
            .await
            .expect("wait for a finished run must not block")
            .unwrap();
        assert_eq!(artifact, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_after_clear_all_still_returns_artifact() {
        let wf = spawn(WorkflowConfig::default());
        wf.upload(SlotId::Source, jpeg(64)).await.unwrap();
        wf.upload(SlotId::Target, png(64)).await.unwrap();
        let run = wf.start_processing().await.unwrap();
        let expected = wf.wait_for_completion(run).await.unwrap();

        wf.clear_all().await.unwrap();
        assert_eq!(wf.wait_for_completion(run).await.unwrap(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_superseded_run_is_unknown() {
        let wf = spawn(WorkflowConfig::default());
        wf.upload(SlotId::Source, jpeg(64)).await.unwrap();
        wf.upload(SlotId::Target, png(64)).await.unwrap();
        let first = wf.start_processing().await.unwrap();
        wf.wait_for_completion(first).await.unwrap();
        wf.run_to_completion().await.unwrap();

        assert!(matches!(
            wf.wait_for_completion(first).await,
            Err(WorkflowError::UnknownRun(r)) if r == first
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn watch_follows_published_state() {
        let wf = spawn(WorkflowConfig::default());
        let mut rx = wf.watch();
        assert!(rx.borrow_and_update().source.is_none());

        wf.upload(SlotId::Source, jpeg(32)).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().source.as_ref().map(|s| s.file.name.clone()),
            Some("face.jpg".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dismiss_result_clears_it() {
        let wf = spawn(WorkflowConfig::default());
        wf.upload(SlotId::Source, jpeg(64)).await.unwrap();
        wf.upload(SlotId::Target, png(64)).await.unwrap();
        wf.run_to_completion().await.unwrap();

        assert!(wf.dismiss_result().await.unwrap());
        assert!(wf.snapshot().await.unwrap().result.is_none());
        assert!(!wf.dismiss_result().await.unwrap());
    }
}
