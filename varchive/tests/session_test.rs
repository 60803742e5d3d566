//! End-to-end tests for the session and download state machines.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use providers::{Provider, ProviderError, ProviderRegistry, ResolvedSource, Source, SourceInfo};
use pubsub::Channel;
use tokio_util::sync::CancellationToken;
use transfer::Transfer;
use varchive::store::{DownloadStore, JsonFileStore, NullStore};
use varchive::{
    AddDownloadOptions, Download, DownloadEvent, DownloadId, DownloadStage, DownloadStatus,
    PersistentState, Session, SessionConfig,
};

const WAIT: Duration = Duration::from_secs(5);

/// Two read chunks' worth of payload, so a download emits more than one
/// progress update.
const PAYLOAD_LEN: usize = 100_000;

// ---------------------------------------------------------------------------
// Mock provider: matches https:// and mock:// URLs; path segments control
// failure injection ("recon-fail", "dl-fail") and blocking ("hang").
// ---------------------------------------------------------------------------

struct MockSource {
    url: String,
}

#[async_trait]
impl Source for MockSource {
    fn url(&self) -> &str {
        &self.url
    }

    fn display_name(&self) -> String {
        format!("matched {}", self.url)
    }

    async fn recon(
        &self,
        _token: CancellationToken,
    ) -> Result<Arc<dyn ResolvedSource>, ProviderError> {
        if self.url.contains("recon-fail") {
            return Err(ProviderError::ReconFailed("recon exploded".into()));
        }
        Ok(Arc::new(MockResolved {
            url: self.url.clone(),
            info: SourceInfo {
                id: "mock-1".into(),
                title: format!("resolved {}", self.url),
            },
        }))
    }
}

struct MockResolved {
    url: String,
    info: SourceInfo,
}

#[async_trait]
impl ResolvedSource for MockResolved {
    fn display_name(&self) -> String {
        self.info.title.clone()
    }

    fn info(&self) -> &SourceInfo {
        &self.info
    }

    async fn download(&self, sink: &Transfer) -> Result<(), ProviderError> {
        if self.url.contains("dl-fail") {
            return Err(ProviderError::DownloadFailed("transfer exploded".into()));
        }
        if self.url.contains("hang") {
            sink.token().cancelled().await;
            return Err(ProviderError::Cancelled);
        }
        let payload = vec![0xAB; PAYLOAD_LEN];
        sink.add_expected_bytes(PAYLOAD_LEN as u64);
        sink.save_stream("mock.bin", std::io::Cursor::new(payload))
            .await?;
        Ok(())
    }
}

fn mock_registry() -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    registry
        .add(Provider::new(
            "raw",
            Arc::new(|input: &str| {
                if input.starts_with("https://") || input.starts_with("mock://") {
                    Ok(Arc::new(MockSource {
                        url: input.to_string(),
                    }) as Arc<dyn Source>)
                } else {
                    Err(ProviderError::MatchFailed("unsupported scheme".into()))
                }
            }) as providers::MatchFn,
        ))
        .unwrap();
    Arc::new(registry)
}

fn test_config(save_dir: &std::path::Path) -> SessionConfig {
    SessionConfig::new()
        .with_registry(mock_registry())
        .with_default_save_path(save_dir)
        // Let every progress update through; the tests assert on them.
        .with_progress_update_interval(Duration::ZERO)
}

async fn next_event(events: &Channel<DownloadEvent>) -> DownloadEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed unexpectedly")
}

/// Collect events up to and including the next `Stopped`.
async fn collect_until_stopped(events: &Channel<DownloadEvent>) -> Vec<DownloadEvent> {
    let mut collected = Vec::new();
    loop {
        let event = next_event(events).await;
        let stop = matches!(event, DownloadEvent::Stopped { .. });
        collected.push(event);
        if stop {
            return collected;
        }
    }
}

fn updated_statuses(events: &[DownloadEvent]) -> Vec<DownloadStatus> {
    events
        .iter()
        .filter_map(|event| match event {
            DownloadEvent::Updated { new_state, .. } => Some(new_state.persistent.status),
            _ => None,
        })
        .collect()
}

fn dedup<T: PartialEq>(mut items: Vec<T>) -> Vec<T> {
    items.dedup();
    items
}

async fn wait_for_status(download: &Download, status: DownloadStatus) {
    tokio::time::timeout(WAIT, async {
        while download.state().status() != status {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "timed out waiting for status {status}, stuck at {}",
            download.state().status()
        )
    });
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_emits_full_event_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::new(test_config(dir.path()), &CancellationToken::new());
    let events = session.subscribe_with_capacity(256).await.unwrap();

    let download = session
        .add_download("https://host/a.mp4", AddDownloadOptions::default())
        .await
        .unwrap();

    assert!(matches!(next_event(&events).await, DownloadEvent::Added { .. }));
    assert_eq!(download.state().status(), DownloadStatus::New);

    download.start(DownloadStage::Downloaded).await;
    assert!(matches!(next_event(&events).await, DownloadEvent::Started { .. }));

    let collected = collect_until_stopped(&events).await;
    assert_eq!(
        dedup(updated_statuses(&collected)),
        vec![
            DownloadStatus::Matching,
            DownloadStatus::Matched,
            DownloadStatus::Fetching,
            DownloadStatus::Ready,
            DownloadStatus::Downloading,
            DownloadStatus::Complete,
        ]
    );

    // At least one progress update before completion.
    let saw_partial_progress = collected.iter().any(|event| {
        matches!(
            event,
            DownloadEvent::Updated { new_state, .. }
                if new_state.persistent.status == DownloadStatus::Downloading
                    && new_state.ephemeral.progress > 0
        )
    });
    assert!(saw_partial_progress, "expected progress updates: {collected:?}");

    match collected.last().unwrap() {
        DownloadEvent::Stopped { error, .. } => assert!(error.is_none()),
        other => panic!("expected Stopped, got {other:?}"),
    }

    let state = download.state();
    assert_eq!(state.status(), DownloadStatus::Complete);
    assert_eq!(state.progress(), 100);
    assert_eq!(state.persistent.provider_name, "raw");
    assert!(!state.persistent.display_name.is_empty());
    assert!(download.is_complete());
    assert!(!download.is_running());

    // The bytes actually landed under the save path.
    let written = tokio::fs::read(dir.path().join("mock.bin")).await.unwrap();
    assert_eq!(written.len(), PAYLOAD_LEN);

    session.close().await;
}

#[tokio::test]
async fn match_failure_transitions_to_error() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::new(test_config(dir.path()), &CancellationToken::new());
    let events = session.subscribe_with_capacity(64).await.unwrap();

    let download = session
        .add_download("zzz://nope", AddDownloadOptions::default())
        .await
        .unwrap();
    assert!(matches!(next_event(&events).await, DownloadEvent::Added { .. }));

    download.start(DownloadStage::Downloaded).await;
    assert!(matches!(next_event(&events).await, DownloadEvent::Started { .. }));

    let collected = collect_until_stopped(&events).await;
    assert_eq!(
        updated_statuses(&collected),
        vec![DownloadStatus::Matching, DownloadStatus::Error]
    );

    // The error state lands right before the stop.
    let [.., penultimate, last] = collected.as_slice() else {
        panic!("expected at least two events");
    };
    match penultimate {
        DownloadEvent::Updated { new_state, .. } => {
            assert_eq!(new_state.persistent.status, DownloadStatus::Error);
            assert!(!new_state.persistent.error_message.is_empty());
        }
        other => panic!("expected Updated before Stopped, got {other:?}"),
    }
    match last {
        DownloadEvent::Stopped { error, .. } => assert!(error.is_some()),
        other => panic!("expected Stopped, got {other:?}"),
    }

    let state = download.state();
    assert_eq!(state.status(), DownloadStatus::Error);
    assert!(state.persistent.provider_name.is_empty());
    assert!(!state.persistent.error_message.is_empty());

    session.close().await;
}

#[tokio::test]
async fn recon_failure_transitions_to_error() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::new(test_config(dir.path()), &CancellationToken::new());
    let events = session.subscribe_with_capacity(64).await.unwrap();

    let download = session
        .add_download("mock://host/recon-fail", AddDownloadOptions::default())
        .await
        .unwrap();
    download.start(DownloadStage::Downloaded).await;

    let collected = collect_until_stopped(&events).await;
    assert_eq!(
        updated_statuses(&collected),
        vec![
            DownloadStatus::Matching,
            DownloadStatus::Matched,
            DownloadStatus::Fetching,
            DownloadStatus::Error,
        ]
    );
    assert_eq!(download.state().status(), DownloadStatus::Error);
    // The match stage completed, so its outputs stay.
    assert_eq!(download.state().persistent.provider_name, "raw");

    session.close().await;
}

#[tokio::test]
async fn start_to_lower_stage_then_raise_runs_remaining_stages_only() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::new(test_config(dir.path()), &CancellationToken::new());
    let events = session.subscribe_with_capacity(256).await.unwrap();

    let download = session
        .add_download("https://host/a.mp4", AddDownloadOptions::default())
        .await
        .unwrap();
    assert!(matches!(next_event(&events).await, DownloadEvent::Added { .. }));

    // First run only as far as the match.
    download.start(DownloadStage::Matched).await;
    assert!(matches!(next_event(&events).await, DownloadEvent::Started { .. }));
    let first = collect_until_stopped(&events).await;
    assert_eq!(
        updated_statuses(&first),
        vec![DownloadStatus::Matching, DownloadStatus::Matched]
    );
    assert_eq!(download.state().status(), DownloadStatus::Matched);

    // Raising the target re-runs only the remaining stages.
    download.start(DownloadStage::Downloaded).await;
    assert!(matches!(next_event(&events).await, DownloadEvent::Started { .. }));
    let second = collect_until_stopped(&events).await;
    let statuses = dedup(updated_statuses(&second));
    assert_eq!(
        statuses,
        vec![
            DownloadStatus::Fetching,
            DownloadStatus::Ready,
            DownloadStatus::Downloading,
            DownloadStatus::Complete,
        ]
    );

    session.close().await;
}

#[tokio::test]
async fn start_on_completed_download_does_not_spawn_a_worker() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::new(test_config(dir.path()), &CancellationToken::new());
    let events = session.subscribe_with_capacity(256).await.unwrap();

    let download = session
        .add_download("https://host/a.mp4", AddDownloadOptions::default())
        .await
        .unwrap();
    download.start(DownloadStage::Downloaded).await;
    wait_for_status(&download, DownloadStatus::Complete).await;
    tokio::time::timeout(WAIT, download.stopped()).await.unwrap();

    // Drain everything emitted so far.
    while let Ok(Some(_)) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
    }

    // A second start with nothing left to do is a no-op: no Started event,
    // no state change.
    download.start(DownloadStage::Downloaded).await;
    let quiet = tokio::time::timeout(Duration::from_millis(300), events.recv()).await;
    assert!(quiet.is_err(), "expected no events, got {quiet:?}");
    assert!(!download.is_running());
    assert_eq!(download.state().status(), DownloadStatus::Complete);

    session.close().await;
}

#[tokio::test]
async fn stop_cancels_promptly_and_regresses_status() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::new(test_config(dir.path()), &CancellationToken::new());
    let events = session.subscribe_with_capacity(64).await.unwrap();

    let download = session
        .add_download("mock://host/hang", AddDownloadOptions::default())
        .await
        .unwrap();
    download.start(DownloadStage::Downloaded).await;
    wait_for_status(&download, DownloadStatus::Downloading).await;
    assert!(download.is_running());

    download.stop().await;
    tokio::time::timeout(WAIT, download.stopped())
        .await
        .expect("stop should settle promptly");
    assert!(!download.is_running());

    // A user-initiated stop is not an error: status regresses to the
    // non-running predecessor.
    assert_eq!(download.state().status(), DownloadStatus::Ready);

    let collected = collect_until_stopped(&events).await;
    match collected.last().unwrap() {
        DownloadEvent::Stopped { error, .. } => assert!(error.is_none()),
        other => panic!("expected Stopped, got {other:?}"),
    }

    session.close().await;
}

#[tokio::test]
async fn set_url_resets_pipeline_and_rerun_starts_from_match() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::new(test_config(dir.path()), &CancellationToken::new());
    let events = session.subscribe_with_capacity(256).await.unwrap();

    let download = session
        .add_download("https://host/a.mp4", AddDownloadOptions::default())
        .await
        .unwrap();
    assert!(matches!(next_event(&events).await, DownloadEvent::Added { .. }));

    // Reach `ready`.
    download.start(DownloadStage::Resolved).await;
    wait_for_status(&download, DownloadStatus::Ready).await;
    tokio::time::timeout(WAIT, download.stopped()).await.unwrap();
    assert!(!download.state().persistent.display_name.is_empty());

    // Editing the URL resets everything derived from the old one.
    download.set_url("https://host/b.mp4").await;
    wait_for_status(&download, DownloadStatus::New).await;
    let state = download.state();
    assert_eq!(state.url(), "https://host/b.mp4");
    assert!(state.persistent.provider_name.is_empty());
    assert!(state.persistent.display_name.is_empty());
    assert!(state.persistent.error_message.is_empty());
    assert_eq!(state.progress(), 0);

    // Drain events from the first run and the reset.
    while let Ok(Some(_)) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
    }

    // The next start re-runs the full pipeline from the match.
    download.start(DownloadStage::Downloaded).await;
    assert!(matches!(next_event(&events).await, DownloadEvent::Started { .. }));
    let rerun = collect_until_stopped(&events).await;
    assert_eq!(
        dedup(updated_statuses(&rerun)),
        vec![
            DownloadStatus::Matching,
            DownloadStatus::Matched,
            DownloadStatus::Fetching,
            DownloadStatus::Ready,
            DownloadStatus::Downloading,
            DownloadStatus::Complete,
        ]
    );

    session.close().await;
}

#[tokio::test]
async fn concurrent_add_and_close_is_safe() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::new(test_config(dir.path()), &CancellationToken::new());

    let mut adders = Vec::new();
    for i in 0..20 {
        let session = session.clone();
        adders.push(tokio::spawn(async move {
            let mut results = Vec::new();
            for j in 0..10 {
                let result = session
                    .add_download(
                        format!("https://host/{i}-{j}.mp4"),
                        AddDownloadOptions::default(),
                    )
                    .await;
                results.push(result);
            }
            results
        }));
    }

    // Close in the middle of the add storm.
    tokio::task::yield_now().await;
    session.close().await;

    let mut accepted = Vec::new();
    let mut rejected = 0usize;
    for adder in adders {
        for result in adder.await.unwrap() {
            match result {
                Ok(download) => accepted.push(download),
                Err(varchive::Error::SessionClosed) => rejected += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
    }
    assert_eq!(accepted.len() + rejected, 200);

    // Every accepted download was swept by the close.
    for download in accepted {
        tokio::time::timeout(WAIT, download.done())
            .await
            .expect("accepted download should be closed by session close");
    }

    // The session stays closed.
    assert!(session.is_closed());
    assert!(matches!(
        session
            .add_download("https://host/late.mp4", AddDownloadOptions::default())
            .await,
        Err(varchive::Error::SessionClosed)
    ));
    assert!(matches!(
        session.subscribe().await,
        Err(varchive::Error::SessionClosed)
    ));
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

fn stored_record(
    url: &str,
    status: DownloadStatus,
    save_path: &std::path::Path,
) -> PersistentState {
    PersistentState {
        id: DownloadId::random(),
        url: url.to_string(),
        save_path: save_path.to_path_buf(),
        added_at: Utc::now(),
        status,
        error_message: String::new(),
        provider_name: "raw".to_string(),
        display_name: "stored clip".to_string(),
    }
}

async fn quiesce_rehydration(session: &Session, expected: usize) {
    tokio::time::timeout(WAIT, async {
        while session.list_downloads().len() < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("rehydration did not finish");
}

#[tokio::test]
async fn rehydrates_persisted_downloads_faithfully() {
    let store_dir = tempfile::tempdir().unwrap();
    let save_dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(store_dir.path());

    let ready = stored_record("https://host/ready.mp4", DownloadStatus::Ready, save_dir.path());
    let complete = stored_record("https://host/done.mp4", DownloadStatus::Complete, save_dir.path());
    // A status that claims to be running must load as not-running.
    let was_running = stored_record(
        "https://host/cut-short.mp4",
        DownloadStatus::Downloading,
        save_dir.path(),
    );
    for record in [&ready, &complete, &was_running] {
        store.write_download(record).await.unwrap();
    }

    let config = test_config(save_dir.path()).with_store(Arc::new(store));
    let session = Session::new(config, &CancellationToken::new());
    quiesce_rehydration(&session, 3).await;

    let find = |id: &DownloadId| session.get_download(id).unwrap().state();

    let ready_state = find(&ready.id);
    assert_eq!(ready_state.status(), DownloadStatus::Ready);
    assert_eq!(ready_state.url(), ready.url);
    assert_eq!(ready_state.persistent.provider_name, "raw");
    assert_eq!(ready_state.persistent.display_name, "stored clip");
    assert_eq!(ready_state.progress(), 0);

    let complete_state = find(&complete.id);
    assert_eq!(complete_state.status(), DownloadStatus::Complete);
    assert_eq!(complete_state.progress(), 100);
    assert!(session.get_download(&complete.id).unwrap().is_complete());

    let normalized = find(&was_running.id);
    assert_eq!(normalized.status(), DownloadStatus::Ready);

    session.close().await;
}

#[tokio::test]
async fn rehydrated_ready_download_proceeds_straight_to_downloading() {
    let store_dir = tempfile::tempdir().unwrap();
    let save_dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(store_dir.path());
    let record = stored_record("https://host/ready.mp4", DownloadStatus::Ready, save_dir.path());
    store.write_download(&record).await.unwrap();

    let config = test_config(save_dir.path()).with_store(Arc::new(store));
    let session = Session::new(config, &CancellationToken::new());
    quiesce_rehydration(&session, 1).await;

    let events = session.subscribe_with_capacity(256).await.unwrap();
    let download = session.get_download(&record.id).unwrap();
    download.start(DownloadStage::Downloaded).await;

    // Depending on timing the subscriber may still see the rehydration's
    // Added event first.
    loop {
        match next_event(&events).await {
            DownloadEvent::Added { .. } => continue,
            DownloadEvent::Started { .. } => break,
            other => panic!("expected Started, got {other:?}"),
        }
    }
    let collected = collect_until_stopped(&events).await;
    let statuses = dedup(updated_statuses(&collected));
    // Match and resolve are skipped: no matching/fetching statuses surface.
    assert_eq!(
        statuses,
        vec![DownloadStatus::Downloading, DownloadStatus::Complete]
    );

    session.close().await;
}

#[tokio::test]
async fn state_transitions_write_through_to_the_store() {
    let store_dir = tempfile::tempdir().unwrap();
    let save_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::new(store_dir.path()));

    let config = test_config(save_dir.path()).with_store(store.clone());
    let session = Session::new(config, &CancellationToken::new());

    let download = session
        .add_download("https://host/a.mp4", AddDownloadOptions::default())
        .await
        .unwrap();

    // The add persisted immediately.
    let records = store.list_downloads().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, DownloadStatus::New);

    download.start(DownloadStage::Downloaded).await;
    wait_for_status(&download, DownloadStatus::Complete).await;
    tokio::time::timeout(WAIT, download.stopped()).await.unwrap();

    let records = store.list_downloads().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, DownloadStatus::Complete);
    assert_eq!(records[0].provider_name, "raw");

    session.close().await;
}

#[tokio::test]
async fn remove_download_deletes_record_and_orders_events() {
    let store_dir = tempfile::tempdir().unwrap();
    let save_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::new(store_dir.path()));

    let config = test_config(save_dir.path()).with_store(store.clone());
    let session = Session::new(config, &CancellationToken::new());
    let events = session.subscribe_with_capacity(256).await.unwrap();

    let download = session
        .add_download("mock://host/hang", AddDownloadOptions::default())
        .await
        .unwrap();
    let id = download.id();
    download.start(DownloadStage::Downloaded).await;
    wait_for_status(&download, DownloadStatus::Downloading).await;

    // Removing a running download closes it first.
    session.remove_download(&id).await.unwrap();
    assert!(session.get_download(&id).is_none());
    assert!(store.list_downloads().await.unwrap().is_empty());

    // The final Stopped precedes Removed in the stream.
    let mut saw_stopped_at = None;
    let mut saw_removed_at = None;
    let mut index = 0usize;
    while saw_removed_at.is_none() {
        match next_event(&events).await {
            DownloadEvent::Stopped { .. } => saw_stopped_at = Some(index),
            DownloadEvent::Removed { .. } => saw_removed_at = Some(index),
            _ => {}
        }
        index += 1;
    }
    assert!(saw_stopped_at.unwrap() < saw_removed_at.unwrap());

    // Removing again reports not-found.
    assert!(matches!(
        session.remove_download(&id).await,
        Err(varchive::Error::NotFound(_))
    ));

    session.close().await;
}

#[tokio::test]
async fn null_store_session_works_end_to_end() {
    let save_dir = tempfile::tempdir().unwrap();
    let config = test_config(save_dir.path()).with_store(Arc::new(NullStore));
    let session = Session::new(config, &CancellationToken::new());

    let download = session
        .add_download("https://host/a.mp4", AddDownloadOptions::default())
        .await
        .unwrap();
    download.start(DownloadStage::Downloaded).await;
    wait_for_status(&download, DownloadStatus::Complete).await;

    session.close().await;
}
