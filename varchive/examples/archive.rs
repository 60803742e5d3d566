//! Archive a single URL from the command line and print the event stream.
//!
//! ```sh
//! cargo run --example archive -- https://example.com/video.mp4 [save-dir]
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use varchive::store::JsonFileStore;
use varchive::{
    AddDownloadOptions, DownloadEvent, DownloadStage, Session, SessionConfig,
};

#[tokio::main]
async fn main() -> varchive::Result<()> {
    varchive::logging::init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| {
        eprintln!("usage: archive <url> [save-dir]");
        std::process::exit(2);
    });
    let save_dir = args.next().unwrap_or_else(|| ".".to_string());

    let mut registry = providers::ProviderRegistry::new();
    registry.add(providers::raw::RawConfig::default().provider())?;

    let config = SessionConfig::new()
        .with_registry(Arc::new(registry))
        .with_store(Arc::new(JsonFileStore::new(format!("{save_dir}/.varchive"))))
        .with_default_save_path(&save_dir);

    let root = CancellationToken::new();
    let session = Session::new(config, &root);
    let events = session.subscribe_with_capacity(64).await?;

    let download = session.add_download(url, AddDownloadOptions::default()).await?;
    download.start(DownloadStage::Downloaded).await;

    while let Some(event) = events.recv().await {
        match &event {
            DownloadEvent::Updated { new_state, .. } => {
                println!(
                    "  {} {}%",
                    new_state.persistent.status, new_state.ephemeral.progress
                );
            }
            DownloadEvent::Stopped { download, error } => {
                match error {
                    Some(err) => println!("failed: {err}"),
                    None => {
                        let state = download.state();
                        println!("stopped: {} ({}%)", state.status(), state.progress());
                    }
                }
                break;
            }
            other => println!("{other:?}"),
        }
    }

    session.close().await;
    Ok(())
}
