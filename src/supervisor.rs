use std::sync::Arc;
use std::time::Instant;

use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

use crate::{
    api::{ExchangeApi, OrderSigner},
    config::MakerConfig,
    errors::{MakerError, Result},
    loadable::LoadableCell,
    market_state::MarketState,
    strategy::{StrategyEngine, StrategyEvent},
    ws::{ChannelEvent, PushChannel},
};

/// Pause between push-channel connection attempts.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Owns the whole agent: resolves exchange metadata once, then runs the
/// connect / feed / tick loop until the task is cancelled.
///
/// All entry points into [`MarketState`] and [`StrategyEngine`] are driven
/// from this single task, so state transitions never race each other.
pub struct Supervisor {
    config: MakerConfig,
    api: Arc<dyn ExchangeApi>,
    state: Arc<MarketState>,
    engine: StrategyEngine,
    ws_key: LoadableCell<String>,
}

impl Supervisor {
    /// Fetch token and market metadata and wire up the state and strategy
    /// for the configured pair.
    pub async fn bootstrap(
        config: MakerConfig,
        api: Arc<dyn ExchangeApi>,
        signer: Arc<dyn OrderSigner>,
    ) -> Result<Self> {
        let (base_symbol, quote_symbol) = config.pair_symbols();
        let (tokens, markets) = loop {
            match tokio::try_join!(api.tokens(), api.markets()) {
                Ok(metadata) => break metadata,
                Err(err) => {
                    tracing::warn!(error = %err, "exchange metadata fetch failed, retrying");
                    sleep(RECONNECT_BACKOFF).await;
                }
            }
        };

        let market = markets
            .into_iter()
            .find(|m| m.market == config.pair)
            .ok_or_else(|| MakerError::UnknownPair(config.pair.clone()))?;
        let base_token = tokens
            .iter()
            .find(|t| t.symbol == base_symbol && t.token_id == market.base_token_id)
            .cloned()
            .ok_or_else(|| MakerError::UnknownToken(base_symbol.to_string()))?;
        let quote_token = tokens
            .iter()
            .find(|t| t.symbol == quote_symbol && t.token_id == market.quote_token_id)
            .cloned()
            .ok_or_else(|| MakerError::UnknownToken(quote_symbol.to_string()))?;

        tracing::info!(
            market = %market.market,
            base = %base_token.token_id,
            quote = %quote_token.token_id,
            "pair resolved"
        );

        let state = Arc::new(MarketState::new(
            market,
            base_token,
            quote_token,
            &config,
            Arc::clone(&api),
            signer,
        ));
        let engine = StrategyEngine::new(Arc::clone(&state));

        Ok(Self {
            config,
            api,
            state,
            engine,
            ws_key: LoadableCell::new(),
        })
    }

    pub fn state(&self) -> &Arc<MarketState> {
        &self.state
    }

    pub fn engine(&self) -> &StrategyEngine {
        &self.engine
    }

    /// Run forever. Each pass waits for the market state to come up, then
    /// connects the push channel and alternates between channel events and
    /// the strategy tick until the channel dies or goes silent.
    pub async fn run(&self) -> Result<()> {
        loop {
            // the flag is sticky, so only the first pass can spin here
            if !self.state.initialized() && !self.state.initialize().await {
                tracing::warn!("market state not ready, retrying");
                sleep(RECONNECT_BACKOFF).await;
                continue;
            }

            let channel = match self.connect_channel().await {
                Ok(channel) => channel,
                Err(err) => {
                    tracing::warn!(error = %err, "push channel connect failed, retrying");
                    // a stale key is the usual culprit, fetch a fresh one
                    let _ = self.ws_key.unset();
                    sleep(RECONNECT_BACKOFF).await;
                    continue;
                }
            };

            self.run_session(channel).await;

            let _ = self.ws_key.unset();
            sleep(RECONNECT_BACKOFF).await;
        }
    }

    /// One connected session. Returns when the channel closes or the
    /// heartbeat watchdog fires.
    async fn run_session(&self, mut channel: PushChannel) {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let heartbeat_timeout = self.config.heartbeat_timeout();
        let mut last_heartbeat = Instant::now();
        let mut market_events = self.state.subscribe();
        let mut strategy_events = self.engine.subscribe();

        loop {
            tokio::select! {
                event = channel.recv() => match event {
                    Some(ChannelEvent::Subscribed) => {
                        tracing::info!("push channel subscribed");
                        last_heartbeat = Instant::now();
                    }
                    Some(ChannelEvent::Heartbeat) => {
                        last_heartbeat = Instant::now();
                    }
                    Some(ChannelEvent::Notification(notification)) => {
                        self.state.consume_notification(notification).await;
                    }
                    Some(ChannelEvent::Closed) | None => {
                        tracing::warn!("push channel closed");
                        break;
                    }
                },
                event = market_events.recv() => {
                    if let Ok(event) = event {
                        tracing::debug!(?event, "market update");
                    }
                }
                event = strategy_events.recv() => {
                    if let Ok(StrategyEvent::OrderSubmitted { side, result, .. }) = event {
                        tracing::info!(%side, hash = %result.hash, "order resting");
                    }
                }
                _ = ticker.tick() => {
                    if last_heartbeat.elapsed() > heartbeat_timeout {
                        tracing::warn!(
                            timeout_secs = heartbeat_timeout.as_secs(),
                            "no heartbeat from push channel, reconnecting"
                        );
                        break;
                    }
                    if let Err(err) = self.engine.poll().await {
                        tracing::warn!(error = %err, "strategy tick failed");
                    }
                }
            }
        }

        channel.close();
    }

    async fn connect_channel(&self) -> Result<PushChannel> {
        let key = self.fresh_ws_key().await?;
        let channel = PushChannel::connect(
            &self.config.ws_base_url,
            &key,
            &self.config.account.api_key,
            &self.state.market().market,
        )
        .await
        .map_err(MakerError::from)?;
        Ok(channel)
    }

    /// The key is single-use per connection but cached across connect
    /// retries that never reached the server.
    async fn fresh_ws_key(&self) -> Result<String> {
        if let Ok(key) = self.ws_key.value() {
            return Ok(key);
        }
        let api = Arc::clone(&self.api);
        let key = self
            .ws_key
            .update(|| async move { api.ws_key().await.map_err(MakerError::from) })
            .await?;
        Ok(key)
    }
}
