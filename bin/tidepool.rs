use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use tidepool::rpc::{subscription, ChainEvent, Subscriber};
use tidepool::{ChainRpc, Database, Indexer, RpcClient, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    // Load configuration
    let settings = Arc::new(
        Settings::new()
            .context("Failed to load config.yaml. Please ensure it exists and is valid")?,
    );

    let cancellation_token = CancellationToken::new();

    let db = Database::new(settings.clone())
        .await
        .context("Failed to initialize database connection")?;

    let rpc = Arc::new(RpcClient::new(&settings.rpc)?);

    let chain_id = rpc.chain_id().await.context("Failed to reach chain RPC")?;
    info!("Connected to chain {chain_id}");

    let indexer = Indexer::new(
        db.store(),
        rpc.clone(),
        settings.indexer.pool_ids.clone(),
        settings.indexer.blocks_to_index,
        settings.indexer.verbose,
    )
    .await
    .context("Failed to initialize indexer")?;

    info!(
        "Indexer started at height {} tracking pools {:?}",
        indexer.current_height(),
        settings.indexer.pool_ids
    );

    // Back-fill loop
    let backfill_token = cancellation_token.child_token();
    let backfill_handle = {
        let indexer = indexer.clone();
        tokio::spawn(async move {
            if let Err(e) = indexer.run(backfill_token).await {
                error!("Back-fill loop failed: {e:#}");
            }
        })
    };

    // Block subscription feeding the clock
    let subscriber = Subscriber::new(settings.rpc.ws_url.clone());
    let mut blocks = subscriber
        .subscribe(subscription::NEW_BLOCK_QUERY, cancellation_token.child_token())
        .await
        .context("Failed to subscribe to new blocks")?;

    let ingest_token = cancellation_token.child_token();
    let ingest_handle = {
        let indexer = indexer.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ingest_token.cancelled() => break,
                    event = blocks.recv() => {
                        let Some(event) = event else {
                            warn!("Block subscription closed");
                            break;
                        };
                        match event {
                            ChainEvent::NewBlock { height, time } => {
                                indexer.set_latest_block_height(height, time);
                            }
                            ChainEvent::Tx { .. } => {}
                            ChainEvent::Unknown { kind } => {
                                warn!("Unhandled event kind {kind}");
                            }
                        }
                    }
                }
            }
        })
    };

    // Periodic status log
    let status_token = cancellation_token.child_token();
    let status_handle = {
        let indexer = indexer.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = status_token.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {
                        let status = indexer.get_status();
                        info!(
                            "STATUS height={} bph={} errors={} queue={}",
                            status["indexer_pool_current_height"],
                            status["indexer_blocks_per_hour"],
                            status["indexer_errors"],
                            status["indexer_pool_sync_count"],
                        );
                    }
                }
            }
        })
    };

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Indexer running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    info!("Finishing all tasks...");
    cancellation_token.cancel();

    let _ = backfill_handle.await;
    let _ = ingest_handle.await;
    let _ = status_handle.await;

    info!("All tasks stopped");
    Ok(())
}
