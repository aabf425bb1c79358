//! HTTP collaborator backend.
//!
//! Talks to model-serving and notes services over JSON:
//!
//! | Call | Request | Response |
//! |---|---|---|
//! | predict | `POST {base}/predict {patientId}` | `{riskScore}` |
//! | explain | `POST {base}/explain {patientId, riskScore}` | `{factors: [{feature, contribution}]}` |
//! | notes | `GET {base}/patients/{id}/notes` | `{notes: [text]}` |
//!
//! Patient ids are percent-encoded as a single path segment.
//! 404 maps to not-found, 408/429/5xx and connection errors to
//! unavailable (retryable), anything else to a permanent failure.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use vertexcare_core::RiskFactor;

use crate::collaborator::{CollaboratorError, Explainer, NotesStore, RiskModel};

pub struct RemoteCollaborators {
    base_url: String,
    base: Url,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl RemoteCollaborators {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Failed(format!("HTTP client: {e}")))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .map_err(|e| CollaboratorError::Failed(format!("Invalid base URL {base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(CollaboratorError::Failed(format!(
                "Invalid base URL {base_url}: cannot hold a path"
            )));
        }

        Ok(Self {
            base_url,
            base,
            api_key: None,
            client,
        })
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/{segments...}`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        patient_id: &str,
    ) -> Result<T, CollaboratorError> {
        let request = match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                CollaboratorError::Unavailable(e.to_string())
            } else {
                CollaboratorError::Failed(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            warn!(status, patient_id, body = %body, "Collaborator returned error");
            return Err(classify_status(status, patient_id, body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| CollaboratorError::Failed(format!("Failed to parse response: {e}")))
    }
}

/// Error for a non-2xx status.
fn classify_status(status: u16, patient_id: &str, body: String) -> CollaboratorError {
    match status {
        404 => CollaboratorError::NotFound(patient_id.to_string()),
        408 | 429 | 500..=599 => CollaboratorError::Unavailable(format!("HTTP {status}: {body}")),
        _ => CollaboratorError::Failed(format!("HTTP {status}: {body}")),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictResponse {
    risk_score: f64,
}

#[derive(Deserialize)]
struct ExplainResponse {
    factors: Vec<RiskFactor>,
}

#[derive(Deserialize)]
struct NotesResponse {
    #[serde(default)]
    notes: Vec<String>,
}

#[async_trait]
impl RiskModel for RemoteCollaborators {
    async fn predict(&self, patient_id: &str) -> Result<f64, CollaboratorError> {
        let url = self.endpoint(&["predict"]);
        debug!(%url, patient_id, "Requesting risk prediction");
        let request = self
            .client
            .post(url)
            .json(&serde_json::json!({ "patientId": patient_id }));
        let response: PredictResponse = self.send(request, patient_id).await?;
        Ok(response.risk_score)
    }
}

#[async_trait]
impl Explainer for RemoteCollaborators {
    async fn attributions(
        &self,
        patient_id: &str,
        risk_score: f64,
    ) -> Result<Vec<RiskFactor>, CollaboratorError> {
        let url = self.endpoint(&["explain"]);
        debug!(%url, patient_id, "Requesting explanation");
        let request = self.client.post(url).json(&serde_json::json!({
            "patientId": patient_id,
            "riskScore": risk_score,
        }));
        let response: ExplainResponse = self.send(request, patient_id).await?;
        Ok(response.factors)
    }
}

#[async_trait]
impl NotesStore for RemoteCollaborators {
    async fn notes(&self, patient_id: &str) -> Result<Vec<String>, CollaboratorError> {
        // Dot segments would be dropped from the path rather than encoded.
        if matches!(patient_id, "" | "." | "..") {
            return Err(CollaboratorError::NotFound(patient_id.to_string()));
        }
        let url = self.endpoint(&["patients", patient_id, "notes"]);
        debug!(%url, patient_id, "Requesting notes");
        let response: NotesResponse = self.send(self.client.get(url), patient_id).await?;
        Ok(response.notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    async fn spawn_backend() -> String {
        let app = Router::new()
            .route(
                "/predict",
                post(|Json(body): Json<serde_json::Value>| async move {
                    match body["patientId"].as_str() {
                        Some("P-100") => Ok(Json(serde_json::json!({ "riskScore": 0.82 }))),
                        Some("busy") => Err(StatusCode::SERVICE_UNAVAILABLE),
                        _ => Err(StatusCode::NOT_FOUND),
                    }
                }),
            )
            .route(
                "/explain",
                post(|| async {
                    Json(serde_json::json!({
                        "factors": [{ "feature": "transport_access", "contribution": 0.3 }]
                    }))
                }),
            )
            .route(
                "/patients/{id}/notes",
                get(|Path(id): Path<String>| async move {
                    Json(serde_json::json!({ "notes": [format!("note for {id}")] }))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn calls_each_endpoint() {
        let base = spawn_backend().await;
        let remote = RemoteCollaborators::new(base, Duration::from_secs(5)).unwrap();
        assert!(!remote.base_url().ends_with('/'));

        assert_eq!(remote.predict("P-100").await.unwrap(), 0.82);
        let factors = remote.attributions("P-100", 0.82).await.unwrap();
        assert_eq!(factors[0].feature, "transport_access");
        assert_eq!(remote.notes("P-100").await.unwrap(), vec!["note for P-100"]);
    }

    #[tokio::test]
    async fn maps_http_status_to_error_kind() {
        let base = spawn_backend().await;
        let remote = RemoteCollaborators::new(base, Duration::from_secs(5)).unwrap();

        assert_eq!(
            remote.predict("nobody").await.unwrap_err(),
            CollaboratorError::NotFound("nobody".into())
        );
        assert!(matches!(
            remote.predict("busy").await.unwrap_err(),
            CollaboratorError::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn patient_ids_cannot_escape_their_path_segment() {
        let base = spawn_backend().await;
        let remote = RemoteCollaborators::new(base, Duration::from_secs(5)).unwrap();

        for id in ["../admin", "x?y=1", "a/b#c", "50%"] {
            assert_eq!(remote.notes(id).await.unwrap(), vec![format!("note for {id}")]);
        }

        let url = remote.endpoint(&["patients", "../admin?all=1", "notes"]);
        assert_eq!(url.path_segments().unwrap().count(), 3);
        assert!(url.query().is_none());

        for id in [".", ".."] {
            assert!(matches!(
                remote.notes(id).await.unwrap_err(),
                CollaboratorError::NotFound(_)
            ));
        }
    }

    #[test]
    fn base_url_path_prefix_is_kept() {
        let remote =
            RemoteCollaborators::new("http://models.local/api/v2/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            remote.endpoint(&["patients", "P-100", "notes"]).as_str(),
            "http://models.local/api/v2/patients/P-100/notes"
        );
        assert!(RemoteCollaborators::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let remote =
            RemoteCollaborators::new(format!("http://{addr}"), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            remote.predict("P-100").await.unwrap_err(),
            CollaboratorError::Unavailable(_)
        ));
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(429, "p", String::new()),
            CollaboratorError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(400, "p", String::new()),
            CollaboratorError::Failed(_)
        ));
    }
}
