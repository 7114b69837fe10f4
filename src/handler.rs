//! Middleware-shaped request handler
//!
//! [`Handler::handle`] resolves the cached value for a request, stores it in
//! [`Response::data`] and runs the continuation. Any failure, whatever its
//! kind, ends the response with status 500 and a fixed JSON body instead.

use crate::coordinator::Coordinator;
use crate::endpoint::EndpointConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const FAILURE_STATUS: u16 = 500;
pub const FAILURE_MESSAGE: &str = "Something went wrong, please try again later.";

/// Incoming request as seen by generators and key functions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub original_url: String,
    pub body: Value,
}

impl Request {
    pub fn new(original_url: &str, body: Value) -> Self {
        Self {
            original_url: original_url.to_string(),
            body,
        }
    }

    /// Raw JSON body, as recorded in usage stats
    pub fn body_snapshot(&self) -> String {
        self.body.to_string()
    }
}

/// Outgoing response being assembled by the middleware chain
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    pub data: Option<Value>,
    pub status: Option<u16>,
    pub body: Option<Value>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminate with the fixed failure payload
    pub fn fail(&mut self, failure: &FailureResponse) {
        self.status = Some(failure.code);
        self.body = serde_json::to_value(failure).ok();
    }

    pub fn is_failed(&self) -> bool {
        self.status == Some(FAILURE_STATUS)
    }
}

/// The only failure shape end callers ever see
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureResponse {
    pub success: bool,
    pub code: u16,
    pub error: String,
}

impl Default for FailureResponse {
    fn default() -> Self {
        Self {
            success: false,
            code: FAILURE_STATUS,
            error: FAILURE_MESSAGE.to_string(),
        }
    }
}

/// What happened to a request
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome<T> {
    /// The continuation ran and returned this
    Continued(T),
    /// The response was terminated with the failure payload
    Failed(FailureResponse),
}

impl<T> HandlerOutcome<T> {
    pub fn is_continued(&self) -> bool {
        matches!(self, HandlerOutcome::Continued(_))
    }
}

/// Request handler bound to one endpoint, produced by [`Coordinator::control`]
#[derive(Clone, Debug)]
pub struct Handler {
    pub(crate) coordinator: Coordinator,
    pub(crate) endpoint: Arc<EndpointConfig>,
}

impl Handler {
    pub(crate) fn new(coordinator: Coordinator, endpoint: EndpointConfig) -> Self {
        Self {
            coordinator,
            endpoint: Arc::new(endpoint),
        }
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub async fn handle<F, T>(&self, request: &Request, response: &mut Response, next: F) -> HandlerOutcome<T>
    where
        F: FnOnce(&mut Response) -> T,
    {
        match self.coordinator.resolve(&self.endpoint, request).await {
            Ok(data) => {
                response.data = Some(data);
                HandlerOutcome::Continued(next(response))
            }
            Err(e) => {
                tracing::error!(
                    error.kind = e.kind(),
                    error = %e,
                    prefix = %self.endpoint.prefix,
                    url = %request.original_url,
                    "request failed, responding with generic failure"
                );
                let failure = FailureResponse::default();
                response.fail(&failure);
                HandlerOutcome::Failed(failure)
            }
        }
    }
}
