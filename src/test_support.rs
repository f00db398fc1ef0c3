//! Shared fixtures and a recording stub of the exchange surface, used by the
//! module tests. The DAI-USDT pair mirrors real Loopring v3 metadata.

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::{
    api::{ExchangeApi, OrderSigner},
    config::{AccountConfig, MakerConfig},
    errors::{ApiError, ApiResult},
    market_state::MarketState,
    types::{
        Balance, CancelResult, Market, NewOrder, Notification, OrderAmounts, OrderBook,
        OrderResult, OrderStatus, OrderSummary, PriceLevel, Token, TokenId,
    },
};

pub(crate) fn test_base_token() -> Token {
    Token {
        token_id: TokenId(5),
        symbol: "DAI".to_string(),
        decimals: 18,
        order_amounts: OrderAmounts {
            minimum: dec!(5000000000000000000),
            maximum: dec!(200000000000000000000000),
            dust: dec!(250000000000000000),
        },
        enabled: true,
    }
}

pub(crate) fn test_quote_token() -> Token {
    Token {
        token_id: TokenId(3),
        symbol: "USDT".to_string(),
        decimals: 6,
        order_amounts: OrderAmounts {
            minimum: dec!(5000000),
            maximum: dec!(200000000000),
            dust: dec!(250000),
        },
        enabled: true,
    }
}

pub(crate) fn test_market() -> Market {
    Market {
        market: "DAI-USDT".to_string(),
        base_token_id: TokenId(5),
        quote_token_id: TokenId(3),
        precision_for_price: 4,
        enabled: true,
    }
}

pub(crate) fn test_config() -> MakerConfig {
    MakerConfig {
        rest_api_base_url: "https://api3.loopring.io".to_string(),
        ws_base_url: "wss://ws.api3.loopring.io".to_string(),
        account: AccountConfig {
            exchange_address: "0x0BABA1Ad5bE3a5C0a66E7ac838a129Bf948f1eA4".to_string(),
            account_address: "0x0".to_string(),
            account_id: 11,
            api_key: "stub-api-key".to_string(),
            public_key_x: "0x0".to_string(),
            public_key_y: "0x0".to_string(),
            private_key: "0x0".to_string(),
        },
        pair: "DAI-USDT".to_string(),
        max_buy_price: dec!(1.0002),
        min_sell_price: dec!(1.0000),
        poll_interval_ms: 2000,
        reconnect_after_missed_heartbeat_secs: 60,
    }
}

pub(crate) fn test_book(bid: &str, ask: &str) -> OrderBook {
    let level = |price: &str| PriceLevel {
        price: Decimal::from_str(price).unwrap(),
        size: dec!(1),
        volume: dec!(1),
        count: 1,
    };
    OrderBook {
        bids: vec![level(bid)],
        asks: vec![level(ask)],
    }
}

pub(crate) fn account_notification(
    token_id: TokenId,
    total: Decimal,
    locked: Decimal,
) -> Notification {
    Notification::Account {
        token_id,
        total,
        locked,
    }
}

pub(crate) fn orderbook_notification(bid: &str, ask: &str, version: Option<u64>) -> Notification {
    Notification::OrderBook {
        market: "DAI-USDT".to_string(),
        book: test_book(bid, ask),
        version,
    }
}

struct StubState {
    base_total: Decimal,
    base_locked: Decimal,
    quote_total: Decimal,
    quote_locked: Decimal,
    base_storage_id: u64,
    quote_storage_id: u64,
    open_orders: Vec<OrderSummary>,
    fail_balances: bool,
    fail_submissions: bool,
    submissions: Vec<NewOrder>,
    cancelled: Vec<String>,
    open_order_fetches: usize,
}

impl Default for StubState {
    fn default() -> Self {
        Self {
            // 500 DAI free, no USDT
            base_total: dec!(500000000000000000000),
            base_locked: Decimal::ZERO,
            quote_total: Decimal::ZERO,
            quote_locked: Decimal::ZERO,
            base_storage_id: 10,
            quote_storage_id: 20,
            open_orders: Vec::new(),
            fail_balances: false,
            fail_submissions: false,
            submissions: Vec::new(),
            cancelled: Vec::new(),
            open_order_fetches: 0,
        }
    }
}

/// Recording stub of [`ExchangeApi`]; clones share state.
#[derive(Clone, Default)]
pub(crate) struct StubApi {
    inner: Arc<Mutex<StubState>>,
}

impl StubApi {
    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_balances(
        &self,
        base_total: Decimal,
        base_locked: Decimal,
        quote_total: Decimal,
        quote_locked: Decimal,
    ) {
        let mut state = self.lock();
        state.base_total = base_total;
        state.base_locked = base_locked;
        state.quote_total = quote_total;
        state.quote_locked = quote_locked;
    }

    pub(crate) fn set_open_orders(&self, orders: Vec<OrderSummary>) {
        self.lock().open_orders = orders;
    }

    pub(crate) fn fail_balances(&self) {
        self.lock().fail_balances = true;
    }

    pub(crate) fn fail_submissions(&self) {
        self.lock().fail_submissions = true;
    }

    pub(crate) fn submissions(&self) -> Vec<NewOrder> {
        self.lock().submissions.clone()
    }

    pub(crate) fn cancelled(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }

    pub(crate) fn open_order_fetches(&self) -> usize {
        self.lock().open_order_fetches
    }
}

#[async_trait]
impl ExchangeApi for StubApi {
    async fn ws_key(&self) -> ApiResult<String> {
        Ok("stub-ws-key".to_string())
    }

    async fn tokens(&self) -> ApiResult<Vec<Token>> {
        Ok(vec![test_base_token(), test_quote_token()])
    }

    async fn markets(&self) -> ApiResult<Vec<Market>> {
        Ok(vec![test_market()])
    }

    async fn balances(&self, token_ids: &[TokenId]) -> ApiResult<Vec<Balance>> {
        let state = self.lock();
        if state.fail_balances {
            return Err(ApiError::Http("stub balance outage".to_string()));
        }
        let mut balances = Vec::new();
        if token_ids.contains(&TokenId(5)) {
            balances.push(Balance {
                token_id: TokenId(5),
                total: state.base_total,
                locked: state.base_locked,
            });
        }
        if token_ids.contains(&TokenId(3)) {
            balances.push(Balance {
                token_id: TokenId(3),
                total: state.quote_total,
                locked: state.quote_locked,
            });
        }
        Ok(balances)
    }

    async fn storage_id(&self, token_id: TokenId) -> ApiResult<u64> {
        let state = self.lock();
        match token_id {
            TokenId(5) => Ok(state.base_storage_id),
            TokenId(3) => Ok(state.quote_storage_id),
            other => Err(ApiError::InvalidResponse(format!(
                "no storage id for token {other}"
            ))),
        }
    }

    async fn open_orders(&self, _market: &str) -> ApiResult<Vec<OrderSummary>> {
        let mut state = self.lock();
        state.open_order_fetches += 1;
        Ok(state.open_orders.clone())
    }

    async fn submit_order(&self, order: &NewOrder) -> ApiResult<OrderResult> {
        let mut state = self.lock();
        if state.fail_submissions {
            return Err(ApiError::Rejected {
                code: 102007,
                message: "stub rejection".to_string(),
            });
        }
        state.submissions.push(order.clone());
        Ok(OrderResult {
            hash: format!("0xorder{}", state.submissions.len()),
            status: OrderStatus::Processing,
        })
    }

    async fn cancel_order(&self, hash: &str) -> ApiResult<CancelResult> {
        self.lock().cancelled.push(hash.to_string());
        Ok(CancelResult {
            status: OrderStatus::Cancelling,
        })
    }
}

pub(crate) struct StubSigner;

impl OrderSigner for StubSigner {
    fn sign(&self, order: &mut NewOrder) -> Result<(), String> {
        order.eddsa_signature = Some("0xstub-signature".to_string());
        Ok(())
    }
}

pub(crate) fn market_state_with(api: StubApi) -> (MarketState, StubApi) {
    let state = MarketState::new(
        test_market(),
        test_base_token(),
        test_quote_token(),
        &test_config(),
        Arc::new(api.clone()),
        Arc::new(StubSigner),
    );
    (state, api)
}
