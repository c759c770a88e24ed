use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use potholer_messenger::{
    delivery::DeliveryRunner,
    webhook::{parse_webhook_body, verify_subscription, SubscriptionError, WebhookParseError},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

#[derive(Clone)]
pub struct WebhookState {
    verify_token: SecretString,
    runner: DeliveryRunner,
    batches: TaskTracker,
}

impl WebhookState {
    /// `batches` tracks acknowledged batches so shutdown can wait for them.
    pub fn new(verify_token: SecretString, runner: DeliveryRunner, batches: TaskTracker) -> Self {
        Self { verify_token, runner, batches }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/", get(verify).post(receive)).with_state(state)
}

pub async fn verify(
    State(state): State<WebhookState>,
    Query(query): Query<SubscriptionQuery>,
) -> (StatusCode, String) {
    match verify_subscription(
        query.mode.as_deref(),
        query.verify_token.as_deref(),
        query.challenge.as_deref(),
        state.verify_token.expose_secret(),
    ) {
        Ok(challenge) => {
            info!(
                event_name = "ingress.webhook.subscription_verified",
                correlation_id = "subscription",
                "webhook subscription verified"
            );
            (StatusCode::OK, challenge.to_string())
        }
        Err(error) => {
            warn!(
                event_name = "ingress.webhook.subscription_rejected",
                correlation_id = "subscription",
                error = %error,
                "webhook subscription rejected"
            );
            let status = match error {
                SubscriptionError::MissingChallenge => StatusCode::BAD_REQUEST,
                SubscriptionError::UnsupportedMode(_) | SubscriptionError::TokenMismatch => {
                    StatusCode::FORBIDDEN
                }
            };
            (status, error.to_string())
        }
    }
}

/// Acknowledges the batch straight away; events are handled on a tracked task
/// so the platform never waits on the classifier.
pub async fn receive(State(state): State<WebhookState>, body: Bytes) -> StatusCode {
    let parsed = match parse_webhook_body(&body) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn!(
                event_name = "ingress.webhook.payload_invalid",
                correlation_id = "unknown-correlation-id",
                error = %error,
                "rejecting webhook body"
            );
            return match error {
                WebhookParseError::InvalidJson(_) => StatusCode::BAD_REQUEST,
                WebhookParseError::UnsupportedObject(_) => StatusCode::NOT_FOUND,
            };
        }
    };

    info!(
        event_name = "ingress.webhook.batch_received",
        correlation_id = "unknown-correlation-id",
        envelopes = parsed.envelopes.len(),
        rejected = parsed.rejected.len(),
        "webhook batch accepted"
    );

    if !parsed.envelopes.is_empty() {
        let runner = state.runner.clone();
        state.batches.spawn(async move {
            runner.process(parsed.envelopes).await;
        });
    }

    StatusCode::OK
}
