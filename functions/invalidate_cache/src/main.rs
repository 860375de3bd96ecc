//! Invalidates every cached path of one CloudFront distribution.
//! The distribution is read from `DISTRIBUTION_ID` on each invocation.

use aws_sdk_cloudfront::error::DisplayErrorContext;
use aws_sdk_cloudfront::types::{InvalidationBatch, Paths};
use lambda_runtime::{service_fn, LambdaEvent};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const DISTRIBUTION_ENV_VAR: &str = "DISTRIBUTION_ID";
const INVALIDATE_ALL: &str = "/*";

#[derive(Debug, Serialize, PartialEq)]
struct Response {
    #[serde(rename = "statusCode")]
    status_code: u16,
    /// a json encoded string, so API Gateway style callers can pass it through.
    body: String,
}

impl Response {
    fn new(status_code: u16, message: &str) -> Self {
        Self {
            status_code,
            body: serde_json::to_string(message).unwrap_or_default(),
        }
    }
}

trait Invalidator {
    /// returns the id of the created invalidation
    async fn create_invalidation(&self, distribution_id: &str, caller_reference: &str) -> Result<String, String>;
}

struct CloudFrontInvalidator {
    client: aws_sdk_cloudfront::Client,
}

impl Invalidator for CloudFrontInvalidator {
    async fn create_invalidation(&self, distribution_id: &str, caller_reference: &str) -> Result<String, String> {
        let paths = Paths::builder()
            .quantity(1)
            .items(INVALIDATE_ALL)
            .build()
            .map_err(|e| e.to_string())?;
        let batch = InvalidationBatch::builder()
            .paths(paths)
            .caller_reference(caller_reference)
            .build()
            .map_err(|e| e.to_string())?;
        let resp = self.client
            .create_invalidation()
            .distribution_id(distribution_id)
            .invalidation_batch(batch)
            .send()
            .await
            .map_err(|e| DisplayErrorContext(&e).to_string())?;
        Ok(resp.invalidation().map(|i| i.id().to_string()).unwrap_or_default())
    }
}

/// the request id doubles as the caller reference, so a retried delivery
/// of the same event does not create a second invalidation.
async fn handle<I: Invalidator>(invalidator: &I, distribution_id: Option<&str>, request_id: &str) -> Response {
    let distribution_id = match distribution_id {
        Some(d) if !d.is_empty() => d,
        _ => {
            tracing::error!("{DISTRIBUTION_ENV_VAR} is not set");
            return Response::new(500, &format!("Error: {DISTRIBUTION_ENV_VAR} is not set"));
        }
    };
    match invalidator.create_invalidation(distribution_id, request_id).await {
        Ok(id) => {
            tracing::info!(distribution_id, invalidation_id = %id, "invalidation created");
            Response::new(200, &format!("Invalidation created: {id}"))
        }
        Err(e) => {
            tracing::error!(distribution_id, "failed to create invalidation: {e}");
            Response::new(500, &format!("Error: {e}"))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), lambda_runtime::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .without_time()
        .init();

    let config = aws_config::load_from_env().await;
    let invalidator = CloudFrontInvalidator { client: aws_sdk_cloudfront::Client::new(&config) };
    let invalidator = &invalidator;
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        let distribution_id = std::env::var(DISTRIBUTION_ENV_VAR).ok();
        let resp = handle(invalidator, distribution_id.as_deref(), &event.context.request_id).await;
        Ok::<Response, lambda_runtime::Error>(resp)
    })).await
}
