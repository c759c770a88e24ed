use std::time::Duration;

use async_trait::async_trait;
use potholer_core::config::MessengerConfig;
use potholer_core::UserId;
use potholer_messenger::delivery::{MessengerApi, MessengerError, UserProfile};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

const NOTIFICATION_TYPE_REGULAR: &str = "REGULAR";

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    message: String,
}

/// Send API and user profile lookups against the Facebook Graph API.
pub struct GraphApiClient {
    client: Client,
    base_url: String,
    access_token: SecretString,
}

impl GraphApiClient {
    pub fn new(config: &MessengerConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;

        Ok(Self {
            client,
            base_url: config.graph_api_base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.query(&[("access_token", self.access_token.expose_secret())])
    }
}

#[async_trait]
impl MessengerApi for GraphApiClient {
    async fn send_text(&self, recipient: &UserId, text: &str) -> Result<(), MessengerError> {
        let request = self
            .client
            .post(format!("{}/me/messages", self.base_url))
            .json(&send_message_body(recipient, text));
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|error| MessengerError::Request(error.to_string()))?;

        ensure_success(response).await.map(|_| ())
    }

    async fn get_profile(&self, user: &UserId) -> Result<UserProfile, MessengerError> {
        let request = self
            .client
            .get(format!("{}/{}", self.base_url, user))
            .query(&[("fields", "first_name,last_name")]);
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|error| MessengerError::Request(error.to_string()))?;

        ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|error| MessengerError::Decode(error.to_string()))
    }
}

fn send_message_body(recipient: &UserId, text: &str) -> Value {
    json!({
        "recipient": { "id": recipient.as_str() },
        "message": { "text": text },
        "notification_type": NOTIFICATION_TYPE_REGULAR,
    })
}

async fn ensure_success(response: Response) -> Result<Response, MessengerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(MessengerError::Rejected { status: status.as_u16(), detail: error_detail(&body) })
}

/// Graph errors come as `{"error": {"message": ...}}`; anything else is passed through.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<GraphErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.to_string())
}
