use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identifier for a token listed on the exchange.
#[repr(transparent)]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TokenId(pub u32);

impl TokenId {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn into_inner(self) -> u32 {
        self.0
    }
}

impl From<u32> for TokenId {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<TokenId> for u32 {
    fn from(value: TokenId) -> Self {
        value.into_inner()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for an exchange account.
#[repr(transparent)]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AccountId(pub u32);

impl AccountId {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn into_inner(self) -> u32 {
        self.0
    }
}

impl From<u32> for AccountId {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One side of a two-leg order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    #[serde(alias = "buy")]
    Buy,
    #[serde(alias = "sell")]
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Order-size thresholds for a token, denominated in its smallest unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderAmounts {
    #[serde(with = "rust_decimal::serde::str")]
    pub minimum: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub maximum: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub dust: Decimal,
}

/// Static descriptor of a listed token. Loaded once at startup, never
/// mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub token_id: TokenId,
    pub symbol: String,
    pub decimals: u32,
    pub order_amounts: OrderAmounts,
    #[serde(default)]
    pub enabled: bool,
}

impl Token {
    /// `10^decimals`, the token's smallest-unit scale.
    pub fn unit(&self) -> Decimal {
        Decimal::from_i128_with_scale(10i128.pow(self.decimals), 0)
    }
}

/// Static descriptor of a trading pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub market: String,
    pub base_token_id: TokenId,
    pub quote_token_id: TokenId,
    pub precision_for_price: u32,
    #[serde(default)]
    pub enabled: bool,
}

impl Market {
    /// Minimum price increment, `10^-precisionForPrice`.
    pub fn min_step(&self) -> Decimal {
        Decimal::new(1, self.precision_for_price)
    }
}

/// One depth level: the wire sends `[price, size, volume, count]` as strings.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "(String, String, String, String)")]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
    pub volume: Decimal,
    pub count: u64,
}

impl TryFrom<(String, String, String, String)> for PriceLevel {
    type Error = String;

    fn try_from(raw: (String, String, String, String)) -> Result<Self, Self::Error> {
        let (price, size, volume, count) = raw;
        Ok(PriceLevel {
            price: Decimal::from_str(&price).map_err(|e| format!("price: {e}"))?,
            size: Decimal::from_str(&size).map_err(|e| format!("size: {e}"))?,
            volume: Decimal::from_str(&volume).map_err(|e| format!("volume: {e}"))?,
            count: count.parse().map_err(|e| format!("count: {e}"))?,
        })
    }
}

/// Depth snapshot: bids descending, asks ascending.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|level| level.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|level| level.price)
    }
}

/// Per-token balance as reported by the exchange, in smallest units.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub token_id: TokenId,
    #[serde(with = "rust_decimal::serde::str")]
    pub total: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,
}

/// Exchange-side order status. Only `processing` counts as live and
/// cancellable; anything unrecognized is treated as non-cancellable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Processing,
    Processed,
    Cancelling,
    Cancelled,
    Expired,
    Failed,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Processing)
    }
}

/// A resting order as returned by the open-orders endpoint.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub hash: String,
    pub side: Side,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub status: OrderStatus,
}

/// One leg of an order draft: token and volume in smallest units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLeg {
    pub token_id: String,
    pub volume: String,
}

/// Order type flag; the strategy only ever places maker-only orders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    LimitOrder,
    TakerOnly,
    MakerOnly,
    Amm,
}

/// An order draft ready for signing and submission, matching the
/// Loopring v3 `POST /api/v3/order` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub exchange: String,
    pub account_id: AccountId,
    pub storage_id: u64,
    pub sell_token: OrderLeg,
    pub buy_token: OrderLeg,
    pub all_or_none: bool,
    /// `true` when the fill amount is measured on the buy leg, i.e. a buy.
    pub fill_amount_b_or_s: bool,
    pub valid_until: i64,
    pub max_fee_bips: u32,
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eddsa_signature: Option<String>,
}

impl NewOrder {
    pub fn side(&self) -> Side {
        if self.fill_amount_b_or_s {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

/// Acknowledgement of a submitted order.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResult {
    pub hash: String,
    pub status: OrderStatus,
}

/// Acknowledgement of a cancellation request.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResult {
    pub status: OrderStatus,
}

/// A decoded push-channel message, keyed by topic on the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    Account {
        token_id: TokenId,
        total: Decimal,
        locked: Decimal,
    },
    OrderBook {
        market: String,
        book: OrderBook,
        version: Option<u64>,
    },
}
