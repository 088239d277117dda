//! Bookshop demo.
//!
//! Seeds one book and two users, then lets Bob and Alice buy the same book
//! concurrently in the chosen concurrency mode.
//!
//! ```bash
//! bookshop --mode optimistic --alice-quantity 6 --bob-quantity 6
//! RUST_LOG=debug bookshop --mode pessimistic --think-time-ms 200
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tracing::{Instrument, error, info, info_span};
use tracing_subscriber::EnvFilter;

use bookshop_core::app::ConfigError;
use bookshop_core::domain::{BookId, OrderId, UserId};
use bookshop_core::observability::{StoreCounts, StoreSnapshot};
use bookshop_core::{
    ConcurrencyMode, Fixtures, InMemoryStore, PurchaseRequest, PurchaseService, ShopConfig,
    TxnCoordinator, TxnError, seed_catalog_and_users,
};

#[derive(Parser, Debug)]
#[command(name = "bookshop", version, about = "Concurrent book purchases over an in-memory store")]
struct Cli {
    /// Concurrency mode: pessimistic or optimistic
    #[arg(short, long, default_value = "pessimistic")]
    mode: ConcurrencyMode,

    /// JSON config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Delay at the start of every purchase attempt (overrides config)
    #[arg(long)]
    think_time_ms: Option<u64>,

    /// Retry budget of optimistic purchases (overrides config)
    #[arg(long)]
    max_retries: Option<u32>,

    /// Row lock wait limit in pessimistic mode (overrides config)
    #[arg(long)]
    lock_wait_timeout_ms: Option<u64>,

    #[arg(long, default_value_t = 4)]
    bob_quantity: u32,

    #[arg(long, default_value_t = 6)]
    alice_quantity: u32,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("seeding failed: {0}")]
    Seed(TxnError),

    #[error("buyer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("failed to render report: {0}")]
    Render(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct Report {
    mode: ConcurrencyMode,
    counts: StoreCounts,
    state: StoreSnapshot,
}

fn load_config(cli: &Cli) -> Result<ShopConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => ShopConfig::from_path(path)?,
        None => ShopConfig::default(),
    };
    if let Some(ms) = cli.think_time_ms {
        config.think_time_ms = ms;
    }
    if let Some(n) = cli.max_retries {
        config.max_retries = n;
    }
    if let Some(ms) = cli.lock_wait_timeout_ms {
        config.lock_wait_timeout_ms = Some(ms);
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli)?;
    info!(mode = %cli.mode, ?config, "starting");

    // (A) ストアとコーディネータを用意
    let store = InMemoryStore::with_config(config.store_config());
    let coordinator = Arc::new(
        TxnCoordinator::new(Arc::new(store.clone()))
            .with_classifier(config.classifier())
            .with_retry_policy(config.retry_policy()),
    );

    // (B) 初期データ投入。失敗したら購入に進まない
    seed_catalog_and_users(&coordinator, &Fixtures::default())
        .await
        .map_err(CliError::Seed)?;

    let service = PurchaseService::new(coordinator)
        .with_max_retries(config.max_retries)
        .with_think_time(config.think_time());

    // (C) Bob と Alice が同じ本を同時に買う
    let buyers = [
        ("bob", OrderId::new(1000), UserId::new(1), cli.bob_quantity),
        ("alice", OrderId::new(1001), UserId::new(2), cli.alice_quantity),
    ];
    let mut handles = Vec::with_capacity(buyers.len());
    for (n, (name, order_id, user_id, quantity)) in buyers.into_iter().enumerate() {
        let service = service.clone();
        let mode = cli.mode;
        let request = PurchaseRequest {
            order_id,
            book_id: BookId::new(1),
            user_id,
            quantity,
        };
        let span = info_span!("buyer", n = n + 1, name);
        handles.push(tokio::spawn(
            async move {
                let report = service.run_purchase_traced(mode, request).await;
                (name, report)
            }
            .instrument(span),
        ));
    }

    // (D) 結果を表示
    for handle in handles {
        let (name, report) = handle.await?;
        let attempts = report.attempt_count();
        match report.result {
            Ok(receipt) => println!(
                "{name}: bought {} of {} for {} (attempts={attempts})",
                receipt.quantity, receipt.book_id, receipt.total
            ),
            Err(err) => println!("{name}: failed: {err} (attempts={attempts})"),
        }
    }

    let report = Report {
        mode: cli.mode,
        counts: store.counts(),
        state: store.snapshot(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    // 終わった時点でロックが残っていないこと
    if store.held_locks() != 0 {
        error!(locks = store.held_locks(), "locks still held after all buyers finished");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "bookshop failed");
            ExitCode::FAILURE
        }
    }
}
