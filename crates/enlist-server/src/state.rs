use enlist_client::{GatewayOptions, HttpConnection};
use enlist_core::error::AppError;
use enlist_core::pool::WorkerPool;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub pool: WorkerPool<HttpConnection>,
    /// Bearer key protecting `/v1/*`.
    pub api_key: String,
    /// Gateway used for workers registered without an explicit URL.
    pub default_gateway: Option<String>,
    /// Timeout and proxy applied to every worker connection.
    pub gateway: GatewayOptions,
}

impl AppState {
    /// Build a gateway connection for a worker, falling back to the default gateway.
    pub fn connect(
        &self,
        gateway_url: Option<&str>,
        session_token: &str,
    ) -> Result<HttpConnection, AppError> {
        let base_url = gateway_url
            .or(self.default_gateway.as_deref())
            .ok_or_else(|| {
                AppError::ConfigError(
                    "gateway_url is required when ENLIST_GATEWAY_URL is not set".to_string(),
                )
            })?;
        HttpConnection::with_options(base_url, session_token, &self.gateway)
    }
}
