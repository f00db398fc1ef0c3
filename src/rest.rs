use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::{
    api::ExchangeApi,
    config::MakerConfig,
    errors::{ApiError, ApiResult},
    types::{Balance, CancelResult, Market, NewOrder, OrderResult, OrderSummary, Token, TokenId},
};

const API_KEY_HEADER: &str = "X-API-KEY";

/// Loopring v3 REST client backing every [`ExchangeApi`] collaborator.
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    account_id: u32,
    api_key: String,
}

impl RestClient {
    pub fn new(config: &MakerConfig) -> ApiResult<Self> {
        let base_url = Url::parse(&config.rest_api_base_url)?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            account_id: config.account.account_id,
            api_key: config.account.api_key.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> ApiResult<RequestBuilder> {
        let url = self.base_url.join(path)?;
        Ok(self.http.request(method, url))
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(rejection_from_body(status, &body));
        }
        Ok(response.json::<T>().await?)
    }
}

/// Loopring reports request-level failures in a `resultInfo` envelope; fall
/// back to the raw status line when the body is not in that shape.
fn rejection_from_body(status: StatusCode, body: &str) -> ApiError {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ErrorBody {
        result_info: ResultInfo,
    }

    #[derive(Deserialize)]
    struct ResultInfo {
        code: i64,
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => ApiError::Rejected {
            code: parsed.result_info.code,
            message: parsed.result_info.message,
        },
        Err(_) => ApiError::with_http_status(status, body),
    }
}

#[derive(Deserialize)]
struct WsKeyResponse {
    key: String,
}

#[derive(Deserialize)]
struct MarketsResponse {
    markets: Vec<Market>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageIdResponse {
    order_id: u64,
}

#[derive(Deserialize)]
struct OrdersResponse {
    #[serde(default)]
    orders: Vec<OrderSummary>,
}

#[async_trait]
impl ExchangeApi for RestClient {
    async fn ws_key(&self) -> ApiResult<String> {
        let request = self.request(Method::GET, "/v3/ws/key")?;
        let response: WsKeyResponse = self.execute(request).await?;
        Ok(response.key)
    }

    async fn tokens(&self) -> ApiResult<Vec<Token>> {
        let request = self.request(Method::GET, "/api/v3/exchange/tokens")?;
        self.execute(request).await
    }

    async fn markets(&self) -> ApiResult<Vec<Market>> {
        let request = self.request(Method::GET, "/api/v3/exchange/markets")?;
        let response: MarketsResponse = self.execute(request).await?;
        Ok(response.markets)
    }

    async fn balances(&self, token_ids: &[TokenId]) -> ApiResult<Vec<Balance>> {
        let tokens = token_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let request = self
            .request(Method::GET, "/api/v3/user/balances")?
            .query(&[
                ("accountId", self.account_id.to_string()),
                ("tokens", tokens),
            ])
            .header(API_KEY_HEADER, &self.api_key);
        self.execute(request).await
    }

    async fn storage_id(&self, token_id: TokenId) -> ApiResult<u64> {
        let request = self
            .request(Method::GET, "/api/v3/storageId")?
            .query(&[
                ("accountId", self.account_id.to_string()),
                ("sellTokenId", token_id.to_string()),
            ])
            .header(API_KEY_HEADER, &self.api_key);
        let response: StorageIdResponse = self.execute(request).await?;
        Ok(response.order_id)
    }

    async fn open_orders(&self, market: &str) -> ApiResult<Vec<OrderSummary>> {
        let request = self
            .request(Method::GET, "/api/v3/orders")?
            .query(&[
                ("accountId", self.account_id.to_string()),
                ("market", market.to_string()),
                ("status", "processing".to_string()),
            ])
            .header(API_KEY_HEADER, &self.api_key);
        let response: OrdersResponse = self.execute(request).await?;
        Ok(response.orders)
    }

    async fn submit_order(&self, order: &NewOrder) -> ApiResult<OrderResult> {
        let request = self
            .request(Method::POST, "/api/v3/order")?
            .header(API_KEY_HEADER, &self.api_key)
            .json(order);
        self.execute(request).await
    }

    async fn cancel_order(&self, hash: &str) -> ApiResult<CancelResult> {
        let request = self
            .request(Method::DELETE, "/api/v3/order")?
            .query(&[
                ("accountId", self.account_id.to_string()),
                ("orderHash", hash.to_string()),
            ])
            .header(API_KEY_HEADER, &self.api_key);
        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_parses_result_info_envelope() {
        let body = r#"{"resultInfo": {"code": 102007, "message": "order existed"}}"#;
        match rejection_from_body(StatusCode::BAD_REQUEST, body) {
            ApiError::Rejected { code, message } => {
                assert_eq!(code, 102007);
                assert_eq!(message, "order existed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejection_falls_back_to_status_line() {
        match rejection_from_body(StatusCode::BAD_GATEWAY, "upstream unavailable") {
            ApiError::Http(msg) => {
                assert!(msg.contains("502"));
                assert!(msg.contains("upstream unavailable"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
