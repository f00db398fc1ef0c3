use thiserror::Error;

pub type Result<T> = std::result::Result<T, MakerError>;

/// Misuse of a [`LoadableCell`](crate::loadable::LoadableCell).
///
/// These are caught at call sites and treated as "retry later", never
/// propagated out of the supervisor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CellError {
    #[error("cell already holds a value")]
    AlreadyInitialized,
    #[error("a refresh is already in flight")]
    AlreadyLoading,
    #[error("cell cannot be mutated while a refresh is in flight")]
    InvalidState,
    #[error("value is not available")]
    Unavailable,
}

/// Outcome of [`LoadableCell::update`](crate::loadable::LoadableCell::update):
/// either the cell rejected the refresh, or the loader itself failed.
#[derive(Debug, Error)]
pub enum LoadError<E> {
    #[error(transparent)]
    Cell(CellError),
    #[error("refresh failed: {0}")]
    Refresh(E),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors from the REST collaborators.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(String),
    #[error("rejected by exchange: {message} (code: {code})")]
    Rejected { code: i64, message: String },
    #[error("unexpected response shape: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

impl ApiError {
    pub fn with_http_status(status: reqwest::StatusCode, body: &str) -> Self {
        let mut msg = format!("status code {}", status);
        if !body.is_empty() {
            msg.push_str(": ");
            msg.push_str(body);
        }
        ApiError::Http(msg)
    }
}

pub type WsResult<T> = std::result::Result<T, WsError>;

/// Errors from the push channel.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("subscription rejected [{code}]: {message}")]
    SubscriptionFailed { code: i64, message: String },
    #[error("invalid channel message: {0}")]
    InvalidMessage(String),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Umbrella error for the maker core.
#[derive(Debug, Error)]
pub enum MakerError {
    #[error(transparent)]
    Cell(#[from] CellError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Ws(#[from] WsError),
    #[error("pair {0} not found in exchange metadata")]
    UnknownPair(String),
    #[error("token {0} not found in exchange metadata")]
    UnknownToken(String),
    #[error("signing error: {0}")]
    Signing(String),
}

impl From<LoadError<MakerError>> for MakerError {
    fn from(err: LoadError<MakerError>) -> Self {
        match err {
            LoadError::Cell(cell) => MakerError::Cell(cell),
            LoadError::Refresh(inner) => inner,
        }
    }
}
