//! Clarifai v2 prediction client.
//!
//! Authenticates with the OAuth client-credentials grant and caches the access
//! token until shortly before it expires.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use potholer_core::config::ClassifierConfig;
use potholer_core::{ClassificationError, Concept, ImageClassifier};
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Clone)]
struct CachedToken {
    value: SecretString,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        let lifetime = (response.expires_in - TOKEN_REFRESH_MARGIN_SECS).max(0);
        Self { value: response.access_token.into(), expires_at: now + Duration::seconds(lifetime) }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    outputs: Vec<PredictOutput>,
}

#[derive(Debug, Deserialize)]
struct PredictOutput {
    data: Option<PredictData>,
}

#[derive(Debug, Deserialize)]
struct PredictData {
    #[serde(default)]
    concepts: Vec<PredictConcept>,
}

#[derive(Debug, Deserialize)]
struct PredictConcept {
    name: String,
    value: f32,
}

pub struct ClarifaiClient {
    client: Client,
    base_url: String,
    model: String,
    client_id: String,
    client_secret: SecretString,
    token: RwLock<Option<CachedToken>>,
}

impl ClarifaiClient {
    pub fn new(config: &ClassifierConfig) -> Result<Self, reqwest::Error> {
        let client =
            Client::builder().timeout(StdDuration::from_secs(config.timeout_secs)).build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token: RwLock::new(None),
        })
    }

    /// Fetches a token up front so bad credentials are caught at startup.
    pub async fn handshake(&self) -> Result<(), ClassificationError> {
        let token = self.fetch_token().await?;
        info!(
            event_name = "system.classifier.connected",
            correlation_id = "bootstrap",
            model = %self.model,
            expires_at = %token.expires_at,
            "classifier handshake succeeded"
        );
        *self.token.write().await = Some(token);
        Ok(())
    }

    async fn access_token(&self) -> Result<SecretString, ClassificationError> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        let mut cached = self.token.write().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        debug!(event_name = "egress.classifier.token_refresh", "refreshing classifier token");
        let token = self.fetch_token().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<CachedToken, ClassificationError> {
        let response = self
            .client
            .post(format!("{}/v2/token", self.base_url))
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|error| ClassificationError::Handshake(error.to_string()))?;

        let token: TokenResponse = decode(response).await.map_err(|error| match error {
            ClassificationError::Rejected { status, detail } => ClassificationError::Handshake(
                format!("token endpoint returned {status}: {detail}"),
            ),
            other => ClassificationError::Handshake(other.to_string()),
        })?;
        if token.access_token.is_empty() {
            return Err(ClassificationError::Handshake(
                "token endpoint returned empty access token".to_string(),
            ));
        }

        Ok(CachedToken::from_response(token, Utc::now()))
    }
}

#[async_trait]
impl ImageClassifier for ClarifaiClient {
    async fn classify(&self, image_url: &str) -> Result<Vec<Concept>, ClassificationError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}/v2/models/{}/outputs", self.base_url, self.model))
            .bearer_auth(token.expose_secret())
            .json(&predict_request(image_url))
            .send()
            .await
            .map_err(|error| ClassificationError::Request(error.to_string()))?;

        concepts_from_response(decode(response).await?)
    }
}

fn predict_request(image_url: &str) -> Value {
    json!({ "inputs": [{ "data": { "image": { "url": image_url } } }] })
}

/// Concepts of the first output; a response without outputs is an error.
fn concepts_from_response(response: PredictResponse) -> Result<Vec<Concept>, ClassificationError> {
    let output = response.outputs.into_iter().next().ok_or(ClassificationError::NoOutputs)?;
    Ok(output
        .data
        .map(|data| data.concepts)
        .unwrap_or_default()
        .into_iter()
        .map(|concept| Concept::new(concept.name, concept.value))
        .collect())
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClassificationError> {
    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(ClassificationError::Rejected { status: status.as_u16(), detail });
    }
    response.json().await.map_err(|error| ClassificationError::Decode(error.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use chrono::{Duration, TimeZone, Utc};
    use potholer_core::config::ClassifierConfig;
    use potholer_core::{ClassificationError, Concept, ImageClassifier};
    use serde_json::{json, Value};

    use super::{concepts_from_response, predict_request, CachedToken, ClarifaiClient};

    #[derive(Clone, Default)]
    struct FakeClarifai {
        token_requests: Arc<AtomicUsize>,
        reject_token: bool,
        outputs: Value,
    }

    async fn token(State(fake): State<FakeClarifai>) -> (StatusCode, Json<Value>) {
        fake.token_requests.fetch_add(1, Ordering::SeqCst);
        if fake.reject_token {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "status": { "code": 11008 } })));
        }
        (StatusCode::OK, Json(json!({ "access_token": "token-1", "expires_in": 176400 })))
    }

    async fn outputs(State(fake): State<FakeClarifai>) -> Json<Value> {
        Json(fake.outputs.clone())
    }

    async fn serve(fake: FakeClarifai) -> String {
        let app = Router::new()
            .route("/v2/token", post(token))
            .route("/v2/models/{model}/outputs", post(outputs))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake clarifai");
        });
        format!("http://{address}")
    }

    fn config(base_url: String) -> ClassifierConfig {
        ClassifierConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string().into(),
            api_base_url: base_url,
            model: "Stuff".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn takes_concepts_from_first_output() {
        let response = serde_json::from_value(json!({
            "status": { "code": 10000, "description": "Ok" },
            "outputs": [
                { "data": { "concepts": [
                    { "id": "ai_1", "name": "road", "value": 0.97 },
                    { "id": "ai_2", "name": "pothole", "value": 0.91 }
                ] } },
                { "data": { "concepts": [{ "id": "ai_3", "name": "ignored", "value": 1.0 }] } }
            ]
        }))
        .expect("decode");

        let concepts = concepts_from_response(response).expect("concepts");
        assert_eq!(concepts, vec![Concept::new("road", 0.97), Concept::new("pothole", 0.91)]);
    }

    #[test]
    fn missing_outputs_is_an_error() {
        let response = serde_json::from_value(json!({ "outputs": [] })).expect("decode");
        assert_eq!(concepts_from_response(response), Err(ClassificationError::NoOutputs));
    }

    #[test]
    fn output_without_data_yields_no_concepts() {
        let response = serde_json::from_value(json!({ "outputs": [{}] })).expect("decode");
        assert_eq!(concepts_from_response(response), Ok(Vec::new()));
    }

    #[test]
    fn predict_request_carries_the_image_url() {
        assert_eq!(
            predict_request("https://cdn.example/a.jpg")["inputs"][0]["data"]["image"]["url"],
            "https://cdn.example/a.jpg"
        );
    }

    #[test]
    fn cached_token_expires_before_the_server_says_so() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("timestamp");
        let token = CachedToken::from_response(
            super::TokenResponse { access_token: "t".to_string(), expires_in: 3600 },
            now,
        );

        assert!(token.is_fresh(now + Duration::seconds(3500)));
        assert!(!token.is_fresh(now + Duration::seconds(3540)));
    }

    #[tokio::test]
    async fn classifies_against_a_live_endpoint_and_reuses_the_token() {
        let fake = FakeClarifai {
            outputs: json!({ "outputs": [{ "data": { "concepts": [
                { "name": "pothole", "value": 0.88 }
            ] } }] }),
            ..FakeClarifai::default()
        };
        let requests = fake.token_requests.clone();
        let client = ClarifaiClient::new(&config(serve(fake).await)).expect("client");

        client.handshake().await.expect("handshake");
        let first = client.classify("https://cdn.example/a.jpg").await.expect("classify");
        client.classify("https://cdn.example/b.jpg").await.expect("classify");

        assert_eq!(first, vec![Concept::new("pothole", 0.88)]);
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_credentials_fail_the_handshake() {
        let fake = FakeClarifai { reject_token: true, ..FakeClarifai::default() };
        let client = ClarifaiClient::new(&config(serve(fake).await)).expect("client");

        let error = client.handshake().await.expect_err("handshake should fail");
        assert!(matches!(error, ClassificationError::Handshake(ref detail) if detail.contains("401")));
    }
}
