use std::{env, fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Account block: identity plus the EdDSA key pair handed to the signer.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub exchange_address: String,
    pub account_address: String,
    pub account_id: u32,
    pub api_key: String,
    pub public_key_x: String,
    pub public_key_y: String,
    pub private_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MakerConfig {
    pub rest_api_base_url: String,
    pub ws_base_url: String,
    pub account: AccountConfig,
    /// Pair symbol, e.g. `DAI-USDT`.
    pub pair: String,
    /// Hard upper bound for buy quotes.
    #[serde(with = "rust_decimal::serde::str")]
    pub max_buy_price: Decimal,
    /// Hard lower bound for sell quotes.
    #[serde(with = "rust_decimal::serde::str")]
    pub min_sell_price: Decimal,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_after_missed_heartbeat_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_reconnect_secs() -> u64 {
    60
}

impl MakerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref()).with_context(|| "Failed to read config")?;
        let mut cfg: MakerConfig =
            toml::from_str(&data).with_context(|| "Failed to parse TOML config")?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        override_string("MAKER_REST_API_BASE_URL", &mut self.rest_api_base_url);
        override_string("MAKER_WS_BASE_URL", &mut self.ws_base_url);
        override_string("MAKER_PAIR", &mut self.pair);
        override_string("MAKER_API_KEY", &mut self.account.api_key);
        override_decimal("MAKER_MAX_BUY_PRICE", &mut self.max_buy_price);
        override_decimal("MAKER_MIN_SELL_PRICE", &mut self.min_sell_price);
        override_u64("MAKER_POLL_INTERVAL_MS", &mut self.poll_interval_ms);
        override_u64(
            "MAKER_RECONNECT_AFTER_MISSED_HEARTBEAT_SECS",
            &mut self.reconnect_after_missed_heartbeat_secs,
        );
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.pair.split('-').count() == 2,
            "pair must be of the form BASE-QUOTE"
        );
        anyhow::ensure!(
            self.max_buy_price > Decimal::ZERO,
            "max_buy_price must be positive"
        );
        anyhow::ensure!(
            self.min_sell_price > Decimal::ZERO,
            "min_sell_price must be positive"
        );
        anyhow::ensure!(self.poll_interval_ms > 0, "poll_interval_ms must be positive");
        anyhow::ensure!(
            self.reconnect_after_missed_heartbeat_secs > 0,
            "reconnect_after_missed_heartbeat_secs must be positive"
        );
        Ok(())
    }

    /// Base and quote symbols of the configured pair.
    pub fn pair_symbols(&self) -> (&str, &str) {
        let mut parts = self.pair.splitn(2, '-');
        // validated at load time
        let base = parts.next().unwrap_or_default();
        let quote = parts.next().unwrap_or_default();
        (base, quote)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_after_missed_heartbeat_secs)
    }
}

fn override_string(key: &str, field: &mut String) {
    if let Ok(value) = env::var(key) {
        *field = value;
    }
}

fn override_decimal(key: &str, field: &mut Decimal) {
    if let Ok(value) = env::var(key) {
        if let Ok(parsed) = value.parse::<Decimal>() {
            *field = parsed;
        }
    }
}

fn override_u64(key: &str, field: &mut u64) {
    if let Ok(value) = env::var(key) {
        if let Ok(parsed) = value.parse::<u64>() {
            *field = parsed;
        }
    }
}
