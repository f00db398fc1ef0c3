use std::sync::{Arc, Mutex, MutexGuard};

use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::{
    errors::{MakerError, Result},
    market_state::MarketState,
    types::{NewOrder, OrderResult, Side},
};

/// Emitted after the exchange accepts a submitted draft.
#[derive(Clone, Debug)]
pub enum StrategyEvent {
    OrderSubmitted {
        order: NewOrder,
        side: Side,
        result: OrderResult,
    },
}

/// Per-side submission state. A side never holds more than one draft, and a
/// draft is never submitted more than once.
#[derive(Clone, Debug, Default)]
enum SideState {
    #[default]
    Idle,
    Pending(NewOrder),
    Submitting,
}

impl SideState {
    fn is_idle(&self) -> bool {
        matches!(self, SideState::Idle)
    }
}

#[derive(Debug, Default)]
struct Sides {
    buy: SideState,
    sell: SideState,
}

impl Sides {
    fn slot(&mut self, side: Side) -> &mut SideState {
        match side {
            Side::Buy => &mut self.buy,
            Side::Sell => &mut self.sell,
        }
    }
}

/// Derives target prices from the market view and keeps at most one in-flight
/// order per side resting near the top of the book, inside the configured
/// price bounds.
pub struct StrategyEngine {
    state: Arc<MarketState>,
    sides: Mutex<Sides>,
    events: broadcast::Sender<StrategyEvent>,
}

impl StrategyEngine {
    pub fn new(state: Arc<MarketState>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state,
            sides: Mutex::new(Sides::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StrategyEvent> {
        self.events.subscribe()
    }

    fn sides_lock(&self) -> MutexGuard<'_, Sides> {
        self.sides.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The draft currently pending for `side`, if any.
    pub fn pending_order(&self, side: Side) -> Option<NewOrder> {
        match self.sides_lock().slot(side) {
            SideState::Pending(order) => Some(order.clone()),
            _ => None,
        }
    }

    /// Price a new quote on `side` should rest at, clamped to the configured
    /// bound. `None` when the opposing side of the book is empty.
    pub fn target_price(&self, side: Side) -> Option<Decimal> {
        let step = self.state.min_step();
        match side {
            Side::Buy => {
                let best_ask = self.state.best_ask()?;
                Some((best_ask - step).min(self.state.max_buy_price()))
            }
            Side::Sell => {
                let best_bid = self.state.best_bid()?;
                Some((best_bid + step).max(self.state.min_sell_price()))
            }
        }
    }

    /// Decide which sides need a fresh quote and which resting orders have
    /// drifted away from the top of the book and must be cancelled.
    pub async fn apply_strategy(&self) -> Result<()> {
        if !self.state.initialized() {
            return Ok(());
        }

        self.consider_side(Side::Sell)?;
        self.consider_side(Side::Buy)?;
        self.cancel_stale_orders().await;
        Ok(())
    }

    fn consider_side(&self, side: Side) -> Result<()> {
        if !self.sides_lock().slot(side).is_idle() {
            return Ok(());
        }

        let (cell, minimum) = match side {
            Side::Buy => (
                &self.state.quote_unallocated,
                self.state.quote_token().order_amounts.minimum,
            ),
            Side::Sell => (
                &self.state.base_unallocated,
                self.state.base_token().order_amounts.minimum,
            ),
        };

        let Ok(balance) = cell.value() else {
            return Ok(());
        };
        if balance < minimum {
            return Ok(());
        }
        let Some(price) = self.target_price(side) else {
            return Ok(());
        };

        match self.state.prepare_new_order(balance, price, side) {
            Ok(Some(order)) => {
                tracing::info!(%side, %price, "new outgoing order drafted");
                *self.sides_lock().slot(side) = SideState::Pending(order);
            }
            Ok(None) => {}
            // a cell mid-refresh or emptied by a failed poll; skip the side
            // this tick rather than aborting the whole decision pass
            Err(MakerError::Cell(err)) => {
                tracing::debug!(%side, error = %err, "draft skipped: state not ready");
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// A resting buy below the buy target, or a resting sell above the sell
    /// target, no longer sits at the top of the book. Only orders the
    /// exchange still reports as `processing` are cancellable.
    async fn cancel_stale_orders(&self) {
        let Ok(orders) = self.state.open_orders.value() else {
            return;
        };
        let buy_target = self.target_price(Side::Buy);
        let sell_target = self.target_price(Side::Sell);

        for order in orders {
            if !order.status.is_cancellable() {
                continue;
            }
            let stale = match order.side {
                Side::Buy => buy_target.map(|t| order.price < t).unwrap_or(false),
                Side::Sell => sell_target.map(|t| order.price > t).unwrap_or(false),
            };
            if !stale {
                continue;
            }
            tracing::info!(hash = %order.hash, side = %order.side, price = %order.price, "cancelling stale order");
            if let Err(err) = self.state.cancel_order(&order.hash).await {
                tracing::error!(hash = %order.hash, error = %err, "error cancelling order");
            }
        }
    }

    /// Submit every pending draft exactly once. The slot returns to idle on
    /// success and failure alike, so the side can be retried next tick.
    pub async fn submit_outgoing_orders(&self) {
        if !self.state.initialized() {
            return;
        }
        for side in [Side::Sell, Side::Buy] {
            let order = {
                let mut sides = self.sides_lock();
                let slot = sides.slot(side);
                match std::mem::replace(slot, SideState::Submitting) {
                    SideState::Pending(order) => order,
                    other => {
                        *slot = other;
                        continue;
                    }
                }
            };

            match self.state.submit_order(&order).await {
                Ok(result) => {
                    tracing::info!(%side, hash = %result.hash, "order submitted");
                    let _ = self.events.send(StrategyEvent::OrderSubmitted {
                        order,
                        side,
                        result,
                    });
                }
                Err(err) => {
                    tracing::error!(%side, error = %err, "error submitting order");
                }
            }
            *self.sides_lock().slot(side) = SideState::Idle;
        }
    }

    /// One strategy tick: refresh the market view first, then decide, then
    /// submit. Decisions are never made on the previous tick's data.
    pub async fn poll(&self) -> Result<()> {
        self.state.poll().await;
        self.apply_strategy().await?;
        self.submit_outgoing_orders().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        account_notification, market_state_with, orderbook_notification, StubApi,
    };
    use crate::types::{OrderStatus, OrderSummary};
    use rust_decimal_macros::dec;

    async fn engine_with(api: StubApi) -> (StrategyEngine, StubApi) {
        let (state, api) = market_state_with(api);
        state.initialize().await;
        (StrategyEngine::new(Arc::new(state)), api)
    }

    #[tokio::test]
    async fn no_orders_without_funds() {
        let api = StubApi::default();
        api.set_balances(dec!(0), dec!(0), dec!(0), dec!(0));
        let (engine, _) = engine_with(api).await;

        engine.apply_strategy().await.unwrap();
        assert!(engine.pending_order(Side::Buy).is_none());
        assert!(engine.pending_order(Side::Sell).is_none());
    }

    #[tokio::test]
    async fn no_orders_with_funds_but_without_order_book() {
        let (engine, _) = engine_with(StubApi::default()).await;

        engine
            .state
            .consume_notification(account_notification(
                engine.state.base_token().token_id,
                dec!(500000000000000000000),
                dec!(0),
            ))
            .await;
        engine.apply_strategy().await.unwrap();
        assert!(engine.pending_order(Side::Buy).is_none());
        assert!(engine.pending_order(Side::Sell).is_none());
    }

    #[tokio::test]
    async fn sell_draft_priced_at_configured_floor() {
        // base funded above minimum, quote empty, thin book just below the
        // floor: only a sell is drafted, at max(bid + step, min_sell_price)
        let (engine, _) = engine_with(StubApi::default()).await;
        engine
            .state
            .consume_notification(orderbook_notification("0.9998", "1.0000", Some(1)))
            .await;

        engine.apply_strategy().await.unwrap();
        assert!(engine.pending_order(Side::Buy).is_none());
        let draft = engine.pending_order(Side::Sell).expect("sell draft");

        // 500 DAI sold at 1.0000 buys 500 USDT (smallest units)
        assert_eq!(draft.buy_token.volume, "500000000");
        assert_eq!(engine.target_price(Side::Sell), Some(dec!(1.0000)));
    }

    #[tokio::test]
    async fn buy_target_respects_configured_ceiling() {
        let (engine, _) = engine_with(StubApi::default()).await;
        engine
            .state
            .update_order_book(crate::test_support::test_book("1.0100", "1.0200"), Some(1));

        // ask - step = 1.0199 is above the 1.0002 ceiling
        assert_eq!(engine.target_price(Side::Buy), Some(dec!(1.0002)));
    }

    #[tokio::test]
    async fn no_target_when_book_side_absent() {
        let (engine, _) = engine_with(StubApi::default()).await;
        assert_eq!(engine.target_price(Side::Buy), None);
        assert_eq!(engine.target_price(Side::Sell), None);
    }

    #[tokio::test]
    async fn single_flight_per_side() {
        let (engine, _) = engine_with(StubApi::default()).await;
        engine
            .state
            .consume_notification(orderbook_notification("0.9998", "1.0000", Some(1)))
            .await;

        engine.apply_strategy().await.unwrap();
        let first = engine.pending_order(Side::Sell).expect("sell draft");
        engine.apply_strategy().await.unwrap();
        let second = engine.pending_order(Side::Sell).expect("sell draft");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn stale_sell_order_is_cancelled() {
        let api = StubApi::default();
        api.set_open_orders(vec![
            OrderSummary {
                hash: "0xstale".to_string(),
                side: Side::Sell,
                price: dec!(0.9000),
                status: OrderStatus::Processing,
            },
            // non-live statuses are never cancelled, however stale
            OrderSummary {
                hash: "0xdone".to_string(),
                side: Side::Sell,
                price: dec!(0.9000),
                status: OrderStatus::Processed,
            },
        ]);
        let (engine, api) = engine_with(api).await;
        engine
            .state
            .consume_notification(orderbook_notification("0.9998", "1.0000", Some(1)))
            .await;

        engine.apply_strategy().await.unwrap();
        assert_eq!(api.cancelled(), vec!["0xstale".to_string()]);
    }

    #[tokio::test]
    async fn lost_storage_id_skips_side_but_still_cancels_stale_orders() {
        // initialized is sticky, so a storage-id cell emptied by a failed
        // refresh must not abort the tick: the funded side is skipped and
        // the cancellation scan still runs
        let api = StubApi::default();
        api.set_open_orders(vec![OrderSummary {
            hash: "0xstale".to_string(),
            side: Side::Sell,
            price: dec!(0.9000),
            status: OrderStatus::Processing,
        }]);
        let (engine, api) = engine_with(api).await;
        engine
            .state
            .consume_notification(orderbook_notification("0.9998", "1.0000", Some(1)))
            .await;
        engine.state.base_storage_id.unset().unwrap();

        engine.apply_strategy().await.unwrap();
        assert!(engine.pending_order(Side::Sell).is_none());
        assert_eq!(api.cancelled(), vec!["0xstale".to_string()]);
    }

    #[tokio::test]
    async fn fresh_buy_order_is_left_alone() {
        let api = StubApi::default();
        api.set_balances(dec!(0), dec!(0), dec!(0), dec!(0));
        api.set_open_orders(vec![OrderSummary {
            hash: "0xfresh".to_string(),
            side: Side::Buy,
            price: dec!(0.9999),
            status: OrderStatus::Processing,
        }]);
        let (engine, api) = engine_with(api).await;
        engine
            .state
            .consume_notification(orderbook_notification("0.9998", "1.0000", Some(1)))
            .await;

        // buy target is min(ask - step, ceiling) = 0.9999, not above the order
        engine.apply_strategy().await.unwrap();
        assert!(api.cancelled().is_empty());
    }

    #[tokio::test]
    async fn submit_clears_slot_and_emits_event() {
        let (engine, api) = engine_with(StubApi::default()).await;
        let mut events = engine.subscribe();
        engine
            .state
            .consume_notification(orderbook_notification("0.9998", "1.0000", Some(1)))
            .await;

        engine.apply_strategy().await.unwrap();
        engine.submit_outgoing_orders().await;

        assert!(engine.pending_order(Side::Sell).is_none());
        assert_eq!(api.submissions().len(), 1);
        match events.try_recv().unwrap() {
            StrategyEvent::OrderSubmitted { side, .. } => assert_eq!(side, Side::Sell),
        }
    }

    #[tokio::test]
    async fn failed_submit_clears_slot_for_retry() {
        let (engine, api) = engine_with(StubApi::default()).await;
        api.fail_submissions();
        engine
            .state
            .consume_notification(orderbook_notification("0.9998", "1.0000", Some(1)))
            .await;

        engine.apply_strategy().await.unwrap();
        engine.submit_outgoing_orders().await;

        // side is idle again; the next tick may retry
        assert!(engine.pending_order(Side::Sell).is_none());
        engine.apply_strategy().await.unwrap();
        assert!(engine.pending_order(Side::Sell).is_some());
    }

    #[tokio::test]
    async fn strategy_noop_until_market_state_initialized() {
        let (state, _) = market_state_with(StubApi::default());
        let engine = StrategyEngine::new(Arc::new(state));
        engine
            .state
            .consume_notification(orderbook_notification("0.9998", "1.0000", Some(1)))
            .await;

        engine.apply_strategy().await.unwrap();
        assert!(engine.pending_order(Side::Sell).is_none());
    }
}
