//! Messenger integration - webhook bot interface
//!
//! This crate provides the chat surface for potholer:
//! - **Webhook** (`webhook`) - payload decoding and the subscription handshake
//! - **Events** (`events`) - typed inbound events and the handler registry
//! - **Router** (`router`) - drives the conversation engine for each user
//! - **Replies** (`replies`) - the bot's canned texts
//! - **Delivery** (`delivery`) - per-event tasks and the outbound `MessengerApi`
//!
//! # Architecture
//!
//! ```text
//! Webhook POST → parse_webhook_body → DeliveryRunner → EventDispatcher
//!                                                          ↓
//!                 MessengerApi::send_text ← reply ← ConversationRouter
//!                                                    ↓            ↓
//!                                           ImageClassifier  PendingReportStore
//! ```
//!
//! # Key Types
//!
//! - `DeliveryRunner` - fans a webhook batch out to one task per event
//! - `EventDispatcher` - routes events to the registered handlers
//! - `ConversationRouter` - per-user decision table and side effects
//! - `MessengerApi` - trait for the outbound platform client

pub mod delivery;
pub mod events;
pub mod replies;
pub mod router;
pub mod webhook;

#[cfg(test)]
mod testing;
