//! Maker agent for a single Loopring v3 spot pair.
//!
//! The crate is organised around three layers: [`market_state`] merges push
//! notifications and REST polls into one consistent view of the tracked
//! pair, [`strategy`] turns that view into at most one resting order per
//! side inside the configured price bounds, and [`supervisor`] drives both
//! from a single task with a heartbeat-watched push channel and a periodic
//! tick.

pub mod api;
pub mod config;
pub mod errors;
pub mod loadable;
pub mod market_state;
pub mod rest;
pub mod strategy;
pub mod supervisor;
pub mod types;
pub mod ws;

#[cfg(test)]
mod test_support;

pub use api::{ExchangeApi, OrderSigner};
pub use config::{AccountConfig, MakerConfig};
pub use errors::{ApiError, CellError, LoadError, MakerError, Result, WsError};
pub use loadable::LoadableCell;
pub use market_state::{MarketEvent, MarketState};
pub use rest::RestClient;
pub use strategy::{StrategyEngine, StrategyEvent};
pub use supervisor::Supervisor;
pub use types::{
    AccountId, Balance, CancelResult, Market, NewOrder, Notification, OrderBook, OrderResult,
    OrderStatus, OrderSummary, OrderType, Side, Token, TokenId,
};
pub use ws::{ChannelEvent, PushChannel};
