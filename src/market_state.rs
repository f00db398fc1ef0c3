use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use rust_decimal::Decimal;
use time::{Duration, OffsetDateTime};
use tokio::sync::broadcast;

use crate::{
    api::{ExchangeApi, OrderSigner},
    config::MakerConfig,
    errors::{MakerError, Result},
    loadable::LoadableCell,
    types::{
        AccountId, Balance, CancelResult, Market, NewOrder, Notification, OrderBook, OrderLeg,
        OrderResult, OrderSummary, OrderType, Side, Token, TokenId,
    },
};

/// Horizon stamped on every draft before signing.
const ORDER_LIFETIME: Duration = Duration::days(60);
/// Fixed fee allowance, in bips.
const MAX_FEE_BIPS: u32 = 50;
/// Slots the exchange consumes per accepted order.
const STORAGE_ID_STRIDE: u64 = 2;

/// Change events emitted whenever a tracked quantity actually moves.
#[derive(Clone, Debug, PartialEq)]
pub enum MarketEvent {
    BestBidChanged(Option<Decimal>),
    BestAskChanged(Option<Decimal>),
    BaseUnallocatedChanged(Decimal),
    QuoteUnallocatedChanged(Decimal),
}

#[derive(Debug, Default)]
struct BookTop {
    book: Option<OrderBook>,
    last_version: Option<u64>,
    best_bid: Option<Decimal>,
    best_ask: Option<Decimal>,
}

/// Single source of truth for the tracked pair's tradable state.
///
/// Merges push notifications and polled REST responses into one consistent
/// view; every externally sourced quantity sits in its own [`LoadableCell`]
/// so redundant refreshes collapse into `AlreadyLoading` no-ops instead of
/// corrupting each other.
pub struct MarketState {
    api: Arc<dyn ExchangeApi>,
    signer: Arc<dyn OrderSigner>,
    market: Market,
    base_token: Token,
    quote_token: Token,
    exchange_address: String,
    account_id: AccountId,
    max_buy_price: Decimal,
    min_sell_price: Decimal,
    min_step: Decimal,
    base_unit: Decimal,
    quote_unit: Decimal,

    pub base_unallocated: LoadableCell<Decimal>,
    pub quote_unallocated: LoadableCell<Decimal>,
    pub base_storage_id: LoadableCell<u64>,
    pub quote_storage_id: LoadableCell<u64>,
    pub open_orders: LoadableCell<Vec<OrderSummary>>,

    book: Mutex<BookTop>,
    initialized: AtomicBool,
    events: broadcast::Sender<MarketEvent>,
}

impl MarketState {
    pub fn new(
        market: Market,
        base_token: Token,
        quote_token: Token,
        config: &MakerConfig,
        api: Arc<dyn ExchangeApi>,
        signer: Arc<dyn OrderSigner>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let min_step = market.min_step();
        let base_unit = base_token.unit();
        let quote_unit = quote_token.unit();
        Self {
            api,
            signer,
            market,
            base_token,
            quote_token,
            exchange_address: config.account.exchange_address.clone(),
            account_id: AccountId(config.account.account_id),
            max_buy_price: config.max_buy_price,
            min_sell_price: config.min_sell_price,
            min_step,
            base_unit,
            quote_unit,
            base_unallocated: LoadableCell::new(),
            quote_unallocated: LoadableCell::new(),
            base_storage_id: LoadableCell::new(),
            quote_storage_id: LoadableCell::new(),
            open_orders: LoadableCell::new(),
            book: Mutex::new(BookTop::default()),
            initialized: AtomicBool::new(false),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn base_token(&self) -> &Token {
        &self.base_token
    }

    pub fn quote_token(&self) -> &Token {
        &self.quote_token
    }

    pub fn min_step(&self) -> Decimal {
        self.min_step
    }

    pub fn max_buy_price(&self) -> Decimal {
        self.max_buy_price
    }

    pub fn min_sell_price(&self) -> Decimal {
        self.min_sell_price
    }

    fn book_lock(&self) -> MutexGuard<'_, BookTop> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.book_lock().best_bid
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.book_lock().best_ask
    }

    pub fn order_book(&self) -> Option<OrderBook> {
        self.book_lock().book.clone()
    }

    /// `true` once all four readiness cells have been available at least
    /// once. Sticky: a later refresh failure does not lock the strategy out.
    pub fn initialized(&self) -> bool {
        if self.initialized.load(Ordering::Relaxed) {
            return true;
        }
        if self.base_storage_id.is_available()
            && self.quote_storage_id.is_available()
            && self.base_unallocated.is_available()
            && self.quote_unallocated.is_available()
        {
            self.initialized.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Apply a depth snapshot under the monotonic-version rule and emit
    /// best-bid/best-ask change events. Returns whether it was applied.
    pub fn update_order_book(&self, book: OrderBook, version: Option<u64>) -> bool {
        let mut top = self.book_lock();
        if let (Some(version), Some(last)) = (version, top.last_version) {
            if version <= last {
                tracing::debug!(version, last, "stale order book snapshot ignored");
                return false;
            }
        }

        let best_bid = book.best_bid();
        let best_ask = book.best_ask();
        top.book = Some(book);
        if version.is_some() {
            top.last_version = version;
        }

        if best_bid != top.best_bid {
            top.best_bid = best_bid;
            let _ = self.events.send(MarketEvent::BestBidChanged(best_bid));
        }
        if best_ask != top.best_ask {
            top.best_ask = best_ask;
            let _ = self.events.send(MarketEvent::BestAskChanged(best_ask));
        }
        true
    }

    /// Store `total - locked` for a tracked token, emitting a change event
    /// only when the value actually moved. Unknown tokens are ignored, as is
    /// an update racing a refresh of the same cell.
    pub fn update_unallocated_balance(
        &self,
        token_id: TokenId,
        total: Decimal,
        locked: Decimal,
    ) -> bool {
        let unallocated = total - locked;
        let (cell, event) = if token_id == self.base_token.token_id {
            (
                &self.base_unallocated,
                MarketEvent::BaseUnallocatedChanged(unallocated),
            )
        } else if token_id == self.quote_token.token_id {
            (
                &self.quote_unallocated,
                MarketEvent::QuoteUnallocatedChanged(unallocated),
            )
        } else {
            return false;
        };

        if cell.value().ok() == Some(unallocated) {
            return false;
        }
        if cell.set(unallocated).is_err() {
            tracing::debug!(%token_id, "balance update skipped: cell refresh in flight");
            return false;
        }
        let _ = self.events.send(event);
        true
    }

    /// Route a push-channel message. A balance change usually means an order
    /// filled, so it also triggers an open-orders refresh.
    pub async fn consume_notification(&self, notification: Notification) {
        match notification {
            Notification::Account {
                token_id,
                total,
                locked,
            } => {
                if self.update_unallocated_balance(token_id, total, locked) {
                    if let Err(err) = self.refresh_open_orders().await {
                        if !matches!(err, MakerError::Cell(_)) {
                            tracing::warn!(error = %err, "open orders refresh after balance change failed");
                        }
                    }
                }
            }
            Notification::OrderBook {
                market,
                book,
                version,
            } => {
                if market == self.market.market {
                    self.update_order_book(book, version);
                }
            }
        }
    }

    /// Convert an amount in one leg's smallest unit into the other leg's
    /// smallest unit at `price`, truncating to an integer amount.
    pub fn counterpart_amount(&self, amount: Decimal, price: Decimal, side: Side) -> Decimal {
        if price.is_zero() {
            return Decimal::ZERO;
        }
        match side {
            Side::Buy => (amount / self.quote_unit / price * self.base_unit).trunc(),
            Side::Sell => (amount / self.base_unit * price * self.quote_unit).trunc(),
        }
    }

    /// Concurrently refresh the four readiness cells; each refresh records
    /// its own failure in its cell. Returns the readiness flag.
    pub async fn initialize(&self) -> bool {
        self.refresh_all().await;
        self.initialized()
    }

    /// Periodic refresh of balances, open orders and both storage counters.
    pub async fn poll(&self) {
        self.refresh_all().await;
    }

    async fn refresh_all(&self) {
        let (base_id, quote_id, balances, orders) = tokio::join!(
            self.refresh_base_storage_id(),
            self.refresh_quote_storage_id(),
            self.refresh_balances(),
            self.refresh_open_orders(),
        );
        for outcome in [
            base_id.map(|_| ()),
            quote_id.map(|_| ()),
            balances.map(|_| ()),
            orders.map(|_| ()),
        ] {
            if let Err(err) = outcome {
                match err {
                    // a concurrent refresh of the same cell is redundant, not an error
                    MakerError::Cell(_) => {}
                    other => tracing::warn!(error = %other, "refresh failed"),
                }
            }
        }
    }

    pub async fn refresh_base_storage_id(&self) -> Result<u64> {
        let token_id = self.base_token.token_id;
        let api = Arc::clone(&self.api);
        let id = self
            .base_storage_id
            .update(|| async move { api.storage_id(token_id).await.map_err(MakerError::from) })
            .await?;
        tracing::info!(%token_id, id, "base token storage id updated");
        Ok(id)
    }

    pub async fn refresh_quote_storage_id(&self) -> Result<u64> {
        let token_id = self.quote_token.token_id;
        let api = Arc::clone(&self.api);
        let id = self
            .quote_storage_id
            .update(|| async move { api.storage_id(token_id).await.map_err(MakerError::from) })
            .await?;
        tracing::info!(%token_id, id, "quote token storage id updated");
        Ok(id)
    }

    pub async fn refresh_balances(&self) -> Result<Vec<Balance>> {
        let token_ids = [self.base_token.token_id, self.quote_token.token_id];
        match self.api.balances(&token_ids).await {
            Ok(balances) => {
                for balance in &balances {
                    self.update_unallocated_balance(
                        balance.token_id,
                        balance.total,
                        balance.locked,
                    );
                }
                Ok(balances)
            }
            Err(err) => {
                tracing::error!(error = %err, "error updating balances");
                let _ = self.base_unallocated.unset();
                let _ = self.quote_unallocated.unset();
                Err(err.into())
            }
        }
    }

    pub async fn refresh_open_orders(&self) -> Result<Vec<OrderSummary>> {
        let api = Arc::clone(&self.api);
        let market = self.market.market.clone();
        let orders = self
            .open_orders
            .update(|| async move { api.open_orders(&market).await.map_err(MakerError::from) })
            .await?;
        tracing::info!(count = orders.len(), "open orders loaded");
        Ok(orders)
    }

    /// Build a signed draft selling `amount` (smallest units of the selling
    /// leg) at `price`. Returns `None` when the unallocated balance does not
    /// cover `amount`.
    pub fn prepare_new_order(
        &self,
        amount: Decimal,
        price: Decimal,
        side: Side,
    ) -> Result<Option<NewOrder>> {
        let storage_id = match side {
            Side::Buy => self.quote_storage_id.value()?,
            Side::Sell => self.base_storage_id.value()?,
        };

        tracing::info!(%amount, %price, %side, "preparing order");

        let (sell_token, buy_token, available) = match side {
            Side::Buy => (
                &self.quote_token,
                &self.base_token,
                self.quote_unallocated.value()?,
            ),
            Side::Sell => (
                &self.base_token,
                &self.quote_token,
                self.base_unallocated.value()?,
            ),
        };

        if amount > available {
            tracing::warn!(%amount, %available, "draft declined: amount exceeds unallocated balance");
            return Ok(None);
        }

        let counterpart = self.counterpart_amount(amount, price, side);
        let mut order = NewOrder {
            exchange: self.exchange_address.clone(),
            account_id: self.account_id,
            storage_id,
            sell_token: OrderLeg {
                token_id: sell_token.token_id.to_string(),
                volume: volume_string(amount),
            },
            buy_token: OrderLeg {
                token_id: buy_token.token_id.to_string(),
                volume: volume_string(counterpart),
            },
            all_or_none: false,
            fill_amount_b_or_s: side == Side::Buy,
            valid_until: (OffsetDateTime::now_utc() + ORDER_LIFETIME).unix_timestamp(),
            max_fee_bips: MAX_FEE_BIPS,
            order_type: OrderType::MakerOnly,
            eddsa_signature: None,
        };

        self.signer.sign(&mut order).map_err(MakerError::Signing)?;
        Ok(Some(order))
    }

    /// Submit a draft. On acceptance the buying leg's storage counter is
    /// advanced optimistically by the exchange's two-slot stride, unless that
    /// counter is itself mid-refresh.
    pub async fn submit_order(&self, order: &NewOrder) -> Result<OrderResult> {
        let result = self.api.submit_order(order).await?;

        let leg = match order.side() {
            Side::Buy => &self.base_storage_id,
            Side::Sell => &self.quote_storage_id,
        };
        if !leg.is_loading() {
            if let Ok(current) = leg.value() {
                let _ = leg.set(current + STORAGE_ID_STRIDE);
            }
        }

        Ok(result)
    }

    pub async fn cancel_order(&self, hash: &str) -> Result<CancelResult> {
        Ok(self.api.cancel_order(hash).await?)
    }
}

fn volume_string(amount: Decimal) -> String {
    amount.normalize().to_string()
}
