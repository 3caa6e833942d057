//! Process configuration (§6, §9 "global mutable state"): every secret and
//! tunable is read once in [`Config::from_env`] and passed down by value —
//! no crate in this workspace reads the environment itself.

use ed25519_dalek::SigningKey;

/// All process-wide configuration, constructed once in `main` (or by a test
/// with its own values).
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// `LEDGER_HMAC_KEY`, raw bytes used to chain ledger entries.
    pub ledger_hmac_key: Vec<u8>,
    /// `LEDGER_SIGN_KEY`, used both to sign ledger entries/checkpoints and to
    /// sign access tokens (`EdDSA`) — one Ed25519 key for every signature
    /// this system produces, per §6's addition note.
    pub ledger_signing_key: SigningKey,
    pub refresh_token_ttl_days: i64,
    pub pull_default_limit: u32,
    pub push_max_total: u32,
    pub push_max_per_table: u32,
    pub poll_interval_ms: u64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Read configuration from the environment. Call `dotenvy::dotenv()`
    /// before this if a `.env` file should be honored; this function itself
    /// never touches the filesystem.
    pub fn from_env() -> anyhow::Result<Self> {
        let hmac_hex = std::env::var("LEDGER_HMAC_KEY")
            .map_err(|_| anyhow::anyhow!("LEDGER_HMAC_KEY must be set"))?;
        let sign_hex = std::env::var("LEDGER_SIGN_KEY")
            .map_err(|_| anyhow::anyhow!("LEDGER_SIGN_KEY must be set"))?;

        let ledger_hmac_key = hex::decode(&hmac_hex)?;
        let seed_bytes = hex::decode(&sign_hex)?;
        let seed: [u8; 32] = seed_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("LEDGER_SIGN_KEY must be a 32-byte hex seed"))?;
        let ledger_signing_key = SigningKey::from_bytes(&seed);

        Ok(Self {
            database_url: env_or("DATABASE_URL", "postgres://sync@localhost:5432/sync_dev"),
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
            ledger_hmac_key,
            ledger_signing_key,
            refresh_token_ttl_days: env_parse("REFRESH_TOKEN_TTL_DAYS", 30),
            pull_default_limit: env_parse("SYNC_PULL_DEFAULT_LIMIT", 2_000),
            push_max_total: env_parse("SYNC_PUSH_MAX_TOTAL", 5_000),
            push_max_per_table: env_parse("SYNC_PUSH_MAX_PER_TABLE", 1_000),
            poll_interval_ms: env_parse("SYNC_POLL_INTERVAL_MS", 5_000),
        })
    }

    pub fn ledger_keys(&self) -> sync_ledger::LedgerKeys {
        sync_ledger::LedgerKeys {
            hmac_key: self.ledger_hmac_key.clone(),
            signing_key: self.ledger_signing_key.clone(),
        }
    }

    pub fn protocol_config(&self) -> sync_protocol::ProtocolConfig {
        sync_protocol::ProtocolConfig {
            default_pull_limit: self.pull_default_limit,
            push_max_total: self.push_max_total,
            push_max_per_table: self.push_max_per_table,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_to_default_on_missing_or_bad_value() {
        std::env::remove_var("SYNC_TEST_UNSET_KEY");
        assert_eq!(env_parse::<u32>("SYNC_TEST_UNSET_KEY", 7), 7);
    }
}
