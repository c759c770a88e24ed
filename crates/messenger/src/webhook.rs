//! Messenger Platform webhook payloads.
//!
//! The wire format is loosely typed (attachment payloads differ per attachment
//! type), so everything is decoded into the closed [`InboundEvent`] union here
//! and nothing downstream inspects raw JSON.

use potholer_core::UserId;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::events::{
    Attachment, AttachmentMessageEvent, Coordinates, DeliveryReceiptEvent, InboundEvent,
    OptinEvent, PostbackEvent, TextMessageEvent, WebhookEnvelope,
};

pub const PAGE_OBJECT: &str = "page";

#[derive(Debug, Error)]
pub enum WebhookParseError {
    #[error("webhook body is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("unsupported webhook object `{0}` (expected `page`)")]
    UnsupportedObject(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectionReason {
    MissingSender,
    ImageWithoutUrl,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadRejection {
    pub entry_index: usize,
    pub item_index: usize,
    pub reason: RejectionReason,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedDeliveries {
    pub envelopes: Vec<WebhookEnvelope>,
    pub rejected: Vec<PayloadRejection>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub messaging: Vec<MessagingItem>,
}

#[derive(Debug, Deserialize)]
pub struct MessagingItem {
    sender: Option<Party>,
    timestamp: Option<i64>,
    message: Option<RawMessage>,
    delivery: Option<RawDelivery>,
    postback: Option<RawPostback>,
    optin: Option<RawOptin>,
    read: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Party {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    mid: Option<String>,
    text: Option<String>,
    #[serde(default)]
    is_echo: bool,
    #[serde(default)]
    attachments: Vec<RawAttachment>,
}

#[derive(Debug, Deserialize)]
struct RawAttachment {
    #[serde(rename = "type")]
    kind: String,
    payload: Option<RawAttachmentPayload>,
}

#[derive(Debug, Deserialize)]
struct RawAttachmentPayload {
    url: Option<String>,
    coordinates: Option<Coordinates>,
}

#[derive(Debug, Deserialize)]
struct RawDelivery {
    #[serde(default)]
    mids: Vec<String>,
    watermark: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawPostback {
    payload: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOptin {
    #[serde(rename = "ref")]
    reference: Option<String>,
}

pub fn parse_webhook_body(body: &[u8]) -> Result<ParsedDeliveries, WebhookParseError> {
    let payload: WebhookPayload = serde_json::from_slice(body)?;
    decode_payload(payload)
}

pub fn decode_payload(payload: WebhookPayload) -> Result<ParsedDeliveries, WebhookParseError> {
    if payload.object != PAGE_OBJECT {
        return Err(WebhookParseError::UnsupportedObject(payload.object));
    }

    let mut parsed = ParsedDeliveries::default();
    for (entry_index, entry) in payload.entry.into_iter().enumerate() {
        for (item_index, item) in entry.messaging.into_iter().enumerate() {
            match decode_item(item) {
                Ok(envelope) => parsed.envelopes.push(envelope),
                Err(reason) => {
                    warn!(
                        event_name = "ingress.messenger.payload_rejected",
                        page_id = entry.id.as_deref().unwrap_or("unknown"),
                        entry_index,
                        item_index,
                        reason = ?reason,
                        "dropping malformed messaging item"
                    );
                    parsed.rejected.push(PayloadRejection { entry_index, item_index, reason });
                }
            }
        }
    }

    Ok(parsed)
}

fn decode_item(item: MessagingItem) -> Result<WebhookEnvelope, RejectionReason> {
    let timestamp = item.timestamp.unwrap_or_default();

    if let Some(message) = &item.message {
        if message.is_echo {
            return Ok(unsupported("message_echo", message.mid.clone(), timestamp));
        }
    }
    if item.read.is_some() {
        return Ok(unsupported("read", None, timestamp));
    }

    let is_known = item.message.is_some()
        || item.delivery.is_some()
        || item.postback.is_some()
        || item.optin.is_some();
    if !is_known {
        return Ok(unsupported("unknown", None, timestamp));
    }

    let sender_id = item
        .sender
        .map(|party| UserId(party.id))
        .filter(|id| !id.0.trim().is_empty())
        .ok_or(RejectionReason::MissingSender)?;

    if let Some(message) = item.message {
        let delivery_id =
            message.mid.clone().unwrap_or_else(|| fallback_id("message", &sender_id, timestamp));
        return Ok(WebhookEnvelope { delivery_id, event: decode_message(sender_id, message)? });
    }

    if let Some(delivery) = item.delivery {
        return Ok(WebhookEnvelope {
            delivery_id: fallback_id("delivery", &sender_id, timestamp),
            event: InboundEvent::DeliveryReceipt(DeliveryReceiptEvent {
                sender_id,
                message_ids: delivery.mids,
                watermark: delivery.watermark,
            }),
        });
    }

    if let Some(postback) = item.postback {
        return Ok(WebhookEnvelope {
            delivery_id: fallback_id("postback", &sender_id, timestamp),
            event: InboundEvent::Postback(PostbackEvent { sender_id, payload: postback.payload }),
        });
    }

    let reference = item.optin.and_then(|optin| optin.reference);
    Ok(WebhookEnvelope {
        delivery_id: fallback_id("optin", &sender_id, timestamp),
        event: InboundEvent::AuthenticationOptin(OptinEvent { sender_id, reference }),
    })
}

fn decode_message(sender_id: UserId, message: RawMessage) -> Result<InboundEvent, RejectionReason> {
    let mut raw_attachments = message.attachments.into_iter();
    let Some(first) = raw_attachments.next() else {
        return Ok(InboundEvent::TextMessage(TextMessageEvent {
            sender_id,
            text: message.text.unwrap_or_default(),
        }));
    };

    // Only the first attachment drives the conversation; broken extras are
    // dropped instead of failing the whole message.
    let attachment = decode_attachment(first)?;
    let additional = raw_attachments
        .enumerate()
        .filter_map(|(index, raw)| match decode_attachment(raw) {
            Ok(attachment) => Some(attachment),
            Err(reason) => {
                debug!(
                    event_name = "ingress.messenger.attachment_dropped",
                    user_id = %sender_id,
                    attachment_index = index + 1,
                    reason = ?reason,
                    "dropping malformed additional attachment"
                );
                None
            }
        })
        .collect();

    Ok(InboundEvent::AttachmentMessage(AttachmentMessageEvent {
        sender_id,
        text: message.text,
        attachment,
        additional,
    }))
}

/// Attachment types are matched exactly as the platform sends them.
fn decode_attachment(raw: RawAttachment) -> Result<Attachment, RejectionReason> {
    let url = raw.payload.as_ref().and_then(|payload| payload.url.clone());

    match raw.kind.as_str() {
        "image" => {
            let url =
                url.filter(|url| !url.trim().is_empty()).ok_or(RejectionReason::ImageWithoutUrl)?;
            Ok(Attachment::Image { url })
        }
        "location" => Ok(Attachment::Location {
            coordinates: raw.payload.and_then(|payload| payload.coordinates),
        }),
        _ => Ok(Attachment::Other { kind: raw.kind, url }),
    }
}

fn unsupported(event_type: &str, mid: Option<String>, timestamp: i64) -> WebhookEnvelope {
    WebhookEnvelope {
        delivery_id: mid.unwrap_or_else(|| format!("{event_type}:{timestamp}")),
        event: InboundEvent::Unsupported { event_type: event_type.to_owned() },
    }
}

fn fallback_id(kind: &str, sender_id: &UserId, timestamp: i64) -> String {
    format!("{kind}:{sender_id}:{timestamp}")
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("unsupported hub.mode `{0}`")]
    UnsupportedMode(String),
    #[error("verify token mismatch")]
    TokenMismatch,
    #[error("missing hub.challenge")]
    MissingChallenge,
}

/// Webhook subscription handshake: echo `hub.challenge` back when the mode is
/// `subscribe` and the token matches.
pub fn verify_subscription<'a>(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&'a str>,
    expected_token: &str,
) -> Result<&'a str, SubscriptionError> {
    let mode = mode.unwrap_or_default();
    if mode != "subscribe" {
        return Err(SubscriptionError::UnsupportedMode(mode.to_owned()));
    }
    if token != Some(expected_token) {
        return Err(SubscriptionError::TokenMismatch);
    }
    challenge.ok_or(SubscriptionError::MissingChallenge)
}
