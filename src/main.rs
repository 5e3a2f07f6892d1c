//! Stock Ledger - operator CLI
//!
//! ```text
//! stock_ledger [--env dev] [--seed rows.json] <command> [args]
//!
//!   transfer  <product> <from> <to> <qty> [--by <user>]
//!   sweep     <product> | --all
//!   repair    <product>
//!   set-stock <product> <store> <qty> [--min <min_qty>]
//!   receive   <product> <store> <qty>
//! ```
//!
//! Results are printed to stdout as JSON; logs go to stderr and the log file.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use stock_ledger::config::{AppConfig, StoreBackend};
use stock_ledger::db::Database;
use stock_ledger::inventory::{
    InMemoryStore, InventoryRecord, InventoryStore, PgInventoryStore, ProductId,
    RawTransferRequest, Reconciler, StockEditor, StoreId, TransferOrchestrator, total_stock,
};

fn get_flag_value(args: &[String], names: &[&str]) -> Option<String> {
    args.iter()
        .position(|a| names.contains(&a.as_str()))
        .and_then(|i| args.get(i + 1).cloned())
}

fn get_env(args: &[String]) -> String {
    get_flag_value(args, &["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

/// Flags that consume the following argument
const VALUE_FLAGS: &[&str] = &["--env", "-e", "--seed", "--by", "--min"];

/// Positional arguments with every `--flag value` pair removed
///
/// Anything else starting with `-` stays positional, so `-3` reaches quantity
/// validation and `--all` reaches `sweep`.
fn positionals(args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if VALUE_FLAGS.contains(&arg.as_str()) {
            iter.next();
        } else {
            out.push(arg.clone());
        }
    }
    out
}

/// Row format accepted by `--seed`
#[derive(Debug, Deserialize)]
struct SeedRow {
    product_id: String,
    store_id: String,
    qty: i64,
    #[serde(default)]
    min_qty: i64,
}

fn load_seed(path: &str, store: &InMemoryStore) -> Result<usize> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading seed file {path}"))?;
    let rows: Vec<SeedRow> =
        serde_json::from_str(&content).with_context(|| format!("parsing seed file {path}"))?;

    for row in &rows {
        store.seed(InventoryRecord::new(
            ProductId::new(&row.product_id)?,
            StoreId::new(&row.store_id)?,
            row.qty,
            row.min_qty,
        ));
    }
    Ok(rows.len())
}

async fn open_store(config: &AppConfig, args: &[String]) -> Result<Arc<dyn InventoryStore>> {
    match config.store {
        StoreBackend::Memory => {
            let store = InMemoryStore::new();
            if let Some(path) = get_flag_value(args, &["--seed"]) {
                let count = load_seed(&path, &store)?;
                tracing::info!(count, path = %path, "Seeded in-memory store");
            }
            Ok(Arc::new(store))
        }
        StoreBackend::Postgres => {
            let db = Database::connect(config.postgres()?)
                .await
                .context("connecting to PostgreSQL")?;
            let store = PgInventoryStore::new(db.pool().clone());
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let env = get_env(&args);
    let config = AppConfig::load(&env)?;
    let log_guard = stock_ledger::logging::init_logging(&config);

    tracing::info!(env = %env, store = ?config.store, "Starting stock ledger");

    let store = open_store(&config, &args).await?;
    let pos = positionals(&args);
    let Some(command) = pos.first() else {
        bail!("missing command (transfer | sweep | repair | set-stock | receive)");
    };

    match (command.as_str(), &pos[1..]) {
        ("transfer", [product, from, to, qty]) => {
            let raw = RawTransferRequest {
                product_id: product.clone(),
                from_store_id: from.clone(),
                to_store_id: to.clone(),
                quantity: qty.clone(),
                requested_by: get_flag_value(&args, &["--by"])
                    .unwrap_or_else(|| "cli".to_string()),
            };
            let orchestrator = TransferOrchestrator::with_config(store, config.transfer.clone());
            let result = orchestrator.transfer_raw(&raw).await;
            orchestrator.flush().await;
            match result {
                Ok(receipt) => print_json(&receipt)?,
                Err(e) => {
                    print_json(&serde_json::json!({
                        "code": e.code(),
                        "error": e.to_string(),
                        "available": e.available_hint(),
                        "retryable": e.is_retryable(),
                    }))?;
                    let code = if e.is_fatal() { 2 } else { 1 };
                    drop(log_guard);
                    std::process::exit(code);
                }
            }
        }
        ("sweep", [target]) => {
            let reconciler = Reconciler::new(store);
            if target == "--all" {
                print_json(&reconciler.load_all().await?)?;
            } else {
                let product = ProductId::new(target)?;
                let report = reconciler.load_product(&product).await?;
                print_json(&serde_json::json!({
                    "total": total_stock(&report, &product),
                    "report": report,
                }))?;
            }
        }
        ("repair", [product]) => {
            let product = ProductId::new(product)?;
            print_json(&Reconciler::new(store).repair_product(&product).await?)?;
        }
        ("set-stock", [product, store_id, qty]) => {
            let min_qty = get_flag_value(&args, &["--min"])
                .map(|m| m.parse::<i64>())
                .transpose()
                .context("--min must be an integer")?;
            let record = StockEditor::new(store)
                .set_stock_level(
                    &ProductId::new(product)?,
                    &StoreId::new(store_id)?,
                    qty.as_str(),
                    min_qty,
                )
                .await?;
            print_json(&record)?;
        }
        ("receive", [product, store_id, qty]) => {
            let record = StockEditor::new(store)
                .receive_stock(&ProductId::new(product)?, &StoreId::new(store_id)?, qty.as_str())
                .await?;
            print_json(&record)?;
        }
        (other, rest) => bail!("unknown command or wrong arguments: {other} {rest:?}"),
    }

    drop(log_guard);
    Ok(())
}
