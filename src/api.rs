use async_trait::async_trait;

use crate::{
    errors::ApiResult,
    types::{Balance, CancelResult, Market, NewOrder, OrderResult, OrderSummary, Token, TokenId},
};

/// The exchange REST surface the maker core consumes.
///
/// Transport details live behind this trait; tests substitute a recording
/// stub. All calls are asynchronous and may fail with [`crate::ApiError`];
/// the caller decides which failures are retryable.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// One-time credential for the push channel.
    async fn ws_key(&self) -> ApiResult<String>;

    /// Full static token catalog.
    async fn tokens(&self) -> ApiResult<Vec<Token>>;

    /// Full static market catalog.
    async fn markets(&self) -> ApiResult<Vec<Market>>;

    /// Current balances for the given tokens.
    async fn balances(&self, token_ids: &[TokenId]) -> ApiResult<Vec<Balance>>;

    /// Next free sequence number (storage id) for orders selling `token_id`.
    async fn storage_id(&self, token_id: TokenId) -> ApiResult<u64>;

    /// Orders still resting on the book for `market`.
    async fn open_orders(&self, market: &str) -> ApiResult<Vec<OrderSummary>>;

    /// Submit a signed order draft.
    async fn submit_order(&self, order: &NewOrder) -> ApiResult<OrderResult>;

    /// Cancel a resting order by hash.
    async fn cancel_order(&self, hash: &str) -> ApiResult<CancelResult>;
}

/// Cryptographic signing seam. The EdDSA/Poseidon routine itself is a
/// collaborator; the core only requires that a draft comes back carrying a
/// signature.
pub trait OrderSigner: Send + Sync {
    fn sign(&self, order: &mut NewOrder) -> Result<(), String>;
}
