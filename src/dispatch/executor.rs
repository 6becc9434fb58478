//! Execution of a single request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::pool::DispatchError;
use super::request::{BodyType, Req};
use super::response::Res;

/// Executes one request and captures its outcome.
///
/// Implementations never fail: transport problems are reported through
/// [`Res::err`].
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(&self, req: Req, forced: BodyType) -> Res;
}

/// [`HttpExecutor`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: Client,
    timeout: Duration,
}

impl ReqwestExecutor {
    /// Creates an executor whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Client` if the TLS backend cannot be
    /// initialised.
    pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, req: Req, forced: BodyType) -> Res {
        let builder = match req.to_request(&self.client) {
            Ok(builder) => builder,
            Err(e) => return Res::failed(req, e.to_string()),
        };

        match builder.send().await {
            Ok(response) => {
                debug!(url = %req.url, status = response.status().as_u16(), "Response received");
                Res::from_response(req, response, forced).await
            }
            Err(e) => {
                debug!(url = %req.url, error = %e, "Request failed");
                Res::failed(req, e.to_string())
            }
        }
    }
}
