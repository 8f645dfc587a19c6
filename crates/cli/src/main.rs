use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use optexec_broker_paper::PaperBroker;
use optexec_core::{run_feed, ConfigLoader, LtpCache, Tick, UserBrokerSession};
use optexec_engine::{load_rows, Dispatcher, EngineCommand, Scheduler};

#[derive(Parser)]
#[command(name = "optexec")]
#[command(about = "Options leg-pair execution engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a sheet and print the parsed rows
    Check {
        /// Sheet CSV path
        #[arg(short, long)]
        sheet: String,
    },
    /// Run the engine against paper broker sessions with a simulated feed
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Sheet CSV path
        #[arg(short, long)]
        sheet: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Check { sheet } => check_sheet(&sheet),
        Commands::Run { config, sheet } => run(&config, &sheet).await,
    }
}

fn check_sheet(path: &str) -> Result<()> {
    let rows = load_rows(path).context("sheet validation failed")?;
    for row in &rows {
        println!(
            "row {}: {} {:?} {} lots x {} = {} | window {}-{} | CE {} / PE {}",
            row.id,
            row.symbol,
            row.side,
            row.lots,
            row.lot_size,
            row.quantity,
            row.entry_time,
            row.exit_time,
            row.call.instrument,
            row.put.instrument,
        );
    }
    println!("{} rows ok", rows.len());
    Ok(())
}

async fn run(config_path: &str, sheet_path: &str) -> Result<()> {
    let config = ConfigLoader::load(config_path).context("failed to load config")?;
    let rows = load_rows(sheet_path).context("sheet validation failed")?;

    // Paper sessions for every configured user. Real deployments construct
    // sessions from their broker adapters instead.
    let brokers: Vec<Arc<PaperBroker>> = if config.users.is_empty() {
        vec![Arc::new(PaperBroker::new())]
    } else {
        config.users.iter().map(|_| Arc::new(PaperBroker::new())).collect()
    };
    let sessions: Vec<UserBrokerSession> = if config.users.is_empty() {
        vec![UserBrokerSession::new("paper", 1, brokers[0].clone())]
    } else {
        config
            .users
            .iter()
            .zip(&brokers)
            .map(|(user, broker)| {
                UserBrokerSession::new(user.user_id.clone(), user.lot_multiplier, broker.clone())
            })
            .collect()
    };

    let ltp = Arc::new(LtpCache::new());
    let (tick_tx, tick_rx) = mpsc::channel::<Tick>(1024);
    tokio::spawn(run_feed(ltp.clone(), tick_rx));

    let cancel = CancellationToken::new();
    tokio::spawn(simulated_feed(
        instrument_tokens(&rows),
        tick_tx,
        brokers.clone(),
        cancel.clone(),
    ));

    let (command_tx, command_rx) = mpsc::channel::<EngineCommand>(64);
    let dispatcher = Dispatcher::new(sessions, &config.engine);
    let (scheduler, mut snapshot_rx) =
        Scheduler::new(rows, dispatcher, ltp, command_rx, cancel.clone(), config.engine);

    // Ctrl-C requests a cooperative stop; in-flight broker calls finish.
    {
        let command_tx = command_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping");
                let _ = command_tx.send(EngineCommand::Stop).await;
            }
        });
    }

    tokio::spawn(async move {
        while snapshot_rx.changed().await.is_ok() {
            let snap = snapshot_rx.borrow_and_update().clone();
            for row in &snap.rows {
                tracing::debug!(
                    row = row.id,
                    symbol = row.symbol,
                    state = row.state,
                    ce_profit = %row.call.profit,
                    pe_profit = %row.put.profit,
                    "snapshot"
                );
            }
        }
    });

    scheduler.run().await
}

fn instrument_tokens(rows: &[optexec_engine::InstrumentRow]) -> HashMap<u32, String> {
    let mut tokens = HashMap::new();
    for row in rows {
        tokens.insert(row.call.token, row.call.instrument.clone());
        tokens.insert(row.put.token, row.put.instrument.clone());
    }
    tokens
}

/// Random-walk price feed for demo runs: every instrument starts at 100 and
/// drifts a few ticks per step. Prices go both to the LTP cache (via the
/// feed channel) and into each paper broker's book.
async fn simulated_feed(
    tokens: HashMap<u32, String>,
    tick_tx: mpsc::Sender<Tick>,
    brokers: Vec<Arc<PaperBroker>>,
    cancel: CancellationToken,
) {
    let mut prices: HashMap<u32, Decimal> =
        tokens.keys().map(|&t| (t, Decimal::from(100))).collect();
    let mut interval = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        for (&token, instrument) in &tokens {
            let step = {
                let mut rng = rand::thread_rng();
                Decimal::new(rng.gen_range(-25i64..=25), 2)
            };
            let price = (prices[&token] + step).max(Decimal::new(5, 2));
            prices.insert(token, price);

            for broker in &brokers {
                broker.set_price(instrument, price);
            }
            let tick = Tick {
                token,
                price,
                volume: Decimal::from(75),
                ts: chrono::Utc::now(),
            };
            if tick_tx.send(tick).await.is_err() {
                return;
            }
        }
    }
}
