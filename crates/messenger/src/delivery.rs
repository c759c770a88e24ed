use std::sync::Arc;

use async_trait::async_trait;
use potholer_core::UserId;
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::events::{EventContext, EventDispatcher, HandlerResult, WebhookEnvelope};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct UserProfile {
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessengerError {
    #[error("messenger request failed: {0}")]
    Request(String),
    #[error("messenger rejected the request with status {status}: {detail}")]
    Rejected { status: u16, detail: String },
    #[error("messenger response could not be decoded: {0}")]
    Decode(String),
}

/// Outbound side of the messaging platform.
#[async_trait]
pub trait MessengerApi: Send + Sync {
    async fn send_text(&self, recipient: &UserId, text: &str) -> Result<(), MessengerError>;
    async fn get_profile(&self, user: &UserId) -> Result<UserProfile, MessengerError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Replied,
    ReplyFailed,
    Ignored,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub replied: usize,
    pub reply_failures: usize,
    pub ignored: usize,
    pub aborted: usize,
}

impl DeliverySummary {
    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Replied => self.replied += 1,
            DeliveryOutcome::ReplyFailed => self.reply_failures += 1,
            DeliveryOutcome::Ignored => self.ignored += 1,
        }
    }
}

/// Runs every envelope of a webhook batch on its own task, then sends
/// whatever reply the dispatcher produced.
#[derive(Clone)]
pub struct DeliveryRunner {
    dispatcher: Arc<EventDispatcher>,
    messenger: Arc<dyn MessengerApi>,
}

impl DeliveryRunner {
    pub fn new(dispatcher: Arc<EventDispatcher>, messenger: Arc<dyn MessengerApi>) -> Self {
        Self { dispatcher, messenger }
    }

    pub async fn process(&self, envelopes: Vec<WebhookEnvelope>) -> DeliverySummary {
        let mut tasks = JoinSet::new();
        for envelope in envelopes {
            let dispatcher = self.dispatcher.clone();
            let messenger = self.messenger.clone();
            tasks.spawn(async move { deliver(&dispatcher, messenger.as_ref(), envelope).await });
        }

        let mut summary = DeliverySummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(outcome),
                Err(error) => {
                    summary.aborted += 1;
                    warn!(
                        event_name = "ingress.messenger.delivery_aborted",
                        error = %error,
                        "event delivery task did not complete"
                    );
                }
            }
        }

        info!(
            event_name = "ingress.messenger.batch_processed",
            replied = summary.replied,
            reply_failures = summary.reply_failures,
            ignored = summary.ignored,
            aborted = summary.aborted,
            "processed messenger webhook batch"
        );
        summary
    }
}

async fn deliver(
    dispatcher: &EventDispatcher,
    messenger: &dyn MessengerApi,
    envelope: WebhookEnvelope,
) -> DeliveryOutcome {
    let user_id = envelope.event.sender_id().map(UserId::as_str).unwrap_or("unknown");

    info!(
        event_name = "ingress.messenger.event_received",
        delivery_id = %envelope.delivery_id,
        event_type = ?envelope.event.event_type(),
        correlation_id = %envelope.delivery_id,
        user_id,
        "received messenger event"
    );

    let context = EventContext { correlation_id: envelope.delivery_id.clone() };
    match dispatcher.dispatch(&envelope, &context).await {
        HandlerResult::Responded(reply) => {
            match messenger.send_text(&reply.recipient, &reply.text).await {
                Ok(()) => {
                    debug!(
                        event_name = "egress.messenger.reply_sent",
                        correlation_id = %envelope.delivery_id,
                        user_id = %reply.recipient,
                        "reply sent"
                    );
                    DeliveryOutcome::Replied
                }
                Err(error) => {
                    warn!(
                        event_name = "egress.messenger.reply_failed",
                        correlation_id = %envelope.delivery_id,
                        user_id = %reply.recipient,
                        error = %error,
                        "failed to send reply; continuing"
                    );
                    DeliveryOutcome::ReplyFailed
                }
            }
        }
        HandlerResult::Ignored => {
            debug!(
                event_name = "ingress.messenger.event_ignored",
                correlation_id = %envelope.delivery_id,
                event_type = ?envelope.event.event_type(),
                user_id,
                "no action for event"
            );
            DeliveryOutcome::Ignored
        }
    }
}
