//! `rebuild-ledger`: recomputes the `ledger_tx_index` derived table from
//! `ledger_entry` and verifies the chain, grounded directly on this
//! codebase's existing `verify-ledger` binary (§6's exit-code contract).
//!
//! Usage: `cargo run --bin rebuild-ledger`
//!
//! Exit codes: `0` success (index aligned and chain verified), `1` on any
//! mismatch.

use sqlx::PgPool;
use sync_ledger::{ChainVerification, LedgerStore, PgLedgerStore};
use sync_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let pool = PgPool::connect(&config.database_url).await?;
    let store = PgLedgerStore::new(pool.clone(), config.ledger_keys());

    let last_seq = store.last_seq().await?;
    println!("rebuilding ledger_tx_index up to seq {last_seq}");

    let mut rebuilt = 0u64;
    let mut from = 1u64;
    const WINDOW: u32 = 1_000;
    while from <= last_seq {
        let entries = store.range(from, WINDOW).await?;
        if entries.is_empty() {
            break;
        }
        for entry in &entries {
            sqlx::query(
                r#"
                INSERT INTO ledger_tx_index (server_seq, table_name, row_id, tx_hash)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (server_seq) DO UPDATE SET
                    table_name = excluded.table_name,
                    row_id = excluded.row_id,
                    tx_hash = excluded.tx_hash
                "#,
            )
            .bind(entry.seq as i64)
            .bind(&entry.table_name)
            .bind(&entry.row_id)
            .bind(&entry.tx_hash)
            .execute(&pool)
            .await?;
            rebuilt += 1;
        }
        from += entries.len() as u64;
    }
    println!("rebuilt {rebuilt} ledger_tx_index rows");

    let indexed_max: Option<i64> =
        sqlx::query_scalar("SELECT max(server_seq) FROM ledger_tx_index")
            .fetch_one(&pool)
            .await?;
    let indexed_max = indexed_max.unwrap_or(0) as u64;

    if indexed_max != last_seq {
        eprintln!(
            "MISMATCH: max(server_seq in index) = {indexed_max}, ledger.last_seq = {last_seq}"
        );
        std::process::exit(1);
    }

    match store.verify_chain(1, last_seq.max(1)).await? {
        ChainVerification::Valid => {
            println!("ledger chain verified OK, index aligned at seq {last_seq}");
            Ok(())
        }
        ChainVerification::Invalid { first_bad_seq, reason } => {
            eprintln!("LEDGER CORRUPT at seq {first_bad_seq}: {reason}");
            std::process::exit(1);
        }
    }
}
