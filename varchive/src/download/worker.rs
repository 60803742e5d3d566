//! The background worker: advances a download through the stage pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use providers::{Match, ResolvedSource, Source};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use transfer::{ProgressFn, Transfer};

use super::{DownloadStage, DownloadStatus, Shared};
use crate::Error;

/// Run the pipeline toward the current target stage and report the outcome
/// on the `finished` channel.
pub(crate) async fn run(
    shared: Arc<Shared>,
    token: CancellationToken,
    finished: mpsc::Sender<Option<Arc<Error>>>,
) {
    let result = run_pipeline(&shared, &token).await;
    let report = result.err().map(Arc::new);
    let _ = finished.send(report).await;
}

async fn run_pipeline(shared: &Arc<Shared>, token: &CancellationToken) -> Result<(), Error> {
    for stage in DownloadStage::PIPELINE {
        let (target, current) = shared.pipeline.locked(|p| (p.target, p.current));
        if stage > target {
            // The caller didn't ask to go this far (or lowered the target
            // since); stopping here is success.
            return Ok(());
        }
        if current >= stage {
            continue;
        }
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        debug!(?stage, "running stage");
        match stage {
            DownloadStage::Matched => run_match(shared).await?,
            DownloadStage::Resolved => run_resolve(shared, token).await?,
            DownloadStage::Downloaded => run_download(shared, token).await?,
            DownloadStage::Undefined => unreachable!("not a pipeline stage"),
        }
        shared.pipeline.locked(|p| p.current = p.current.max(stage));
    }
    Ok(())
}

async fn run_match(shared: &Arc<Shared>) -> Result<(), Error> {
    shared
        .update_state(|state| state.persistent.status = DownloadStatus::Matching)
        .await;
    let matched = match_source(shared)?;
    let display_name = matched.source.display_name();
    shared
        .pipeline
        .locked(|p| p.source = Some(matched.source.clone()));
    shared
        .update_state(|state| {
            state.persistent.status = DownloadStatus::Matched;
            state.persistent.provider_name = matched.provider_name.clone();
            state.persistent.display_name = display_name.clone();
        })
        .await;
    Ok(())
}

async fn run_resolve(shared: &Arc<Shared>, token: &CancellationToken) -> Result<(), Error> {
    shared
        .update_state(|state| state.persistent.status = DownloadStatus::Fetching)
        .await;
    let source = ensure_source(shared)?;
    let resolved = source.recon(token.clone()).await?;
    let display_name = resolved.display_name();
    shared
        .pipeline
        .locked(|p| p.resolved = Some(resolved.clone()));
    shared
        .update_state(|state| {
            state.persistent.status = DownloadStatus::Ready;
            state.persistent.display_name = display_name.clone();
        })
        .await;
    Ok(())
}

async fn run_download(shared: &Arc<Shared>, token: &CancellationToken) -> Result<(), Error> {
    shared
        .update_state(|state| state.persistent.status = DownloadStatus::Downloading)
        .await;
    let resolved = ensure_resolved(shared, token).await?;
    let save_path = shared
        .state
        .read_locked(|state| state.persistent.save_path.clone());
    let sink = Transfer::builder()
        .with_token(token.clone())
        .with_target_dir(save_path)
        .with_progress(progress_callback(
            shared.clone(),
            shared.progress_interval,
        ))
        .build();
    resolved.download(&sink).await?;
    shared
        .update_state(|state| state.persistent.status = DownloadStatus::Complete)
        .await;
    Ok(())
}

fn match_source(shared: &Arc<Shared>) -> Result<Match, Error> {
    let (url, provider_name) = shared.state.read_locked(|state| {
        (
            state.persistent.url.clone(),
            state.persistent.provider_name.clone(),
        )
    });
    let matched = if provider_name.is_empty() {
        shared.registry.match_url(&url)?
    } else {
        shared.registry.match_with(&provider_name, &url)?
    };
    Ok(matched)
}

/// The matched source, re-deriving it quietly when the pipeline no longer
/// holds one. That happens only after rehydration, where the current stage
/// came from the persisted status but the artifact lives in memory; the
/// re-match does not emit a `matching` status, so an already-matched
/// download observably picks up where it left off.
fn ensure_source(shared: &Arc<Shared>) -> Result<Arc<dyn Source>, Error> {
    if let Some(source) = shared.pipeline.locked(|p| p.source.clone()) {
        return Ok(source);
    }
    let matched = match_source(shared)?;
    shared
        .pipeline
        .locked(|p| p.source = Some(matched.source.clone()));
    Ok(matched.source)
}

/// Like [`ensure_source`], for the resolved artifact.
async fn ensure_resolved(
    shared: &Arc<Shared>,
    token: &CancellationToken,
) -> Result<Arc<dyn ResolvedSource>, Error> {
    if let Some(resolved) = shared.pipeline.locked(|p| p.resolved.clone()) {
        return Ok(resolved);
    }
    let source = ensure_source(shared)?;
    let resolved = source.recon(token.clone()).await?;
    shared
        .pipeline
        .locked(|p| p.resolved = Some(resolved.clone()));
    Ok(resolved)
}

/// Build the rate-limited progress callback for the byte sink.
///
/// The first allowed update lands at a random offset within one interval,
/// so a hundred downloads starting together don't emit in lockstep.
fn progress_callback(shared: Arc<Shared>, interval: Duration) -> ProgressFn {
    let next_update = Mutex::new(Instant::now() + interval.mul_f64(rand::random::<f64>()));
    Arc::new(move |downloaded, expected| {
        if expected == 0 {
            return;
        }
        {
            let mut next = next_update.lock();
            let now = Instant::now();
            if now < *next {
                return;
            }
            *next = now + interval;
        }
        let percent = (downloaded.saturating_mul(100) / expected).min(100) as u8;
        shared.update_progress(percent);
    })
}
