use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

use crate::domain::models::{EntryId, SpanId, TimeSpan};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::span_mapper::{
    decode_span, AdjustSpanPayload, SpanWritePayload, StartSessionPayload, TimeSpanPayload,
};

/// Remote record store for sessions and time spans. The store is the single
/// authority: every mutation goes through it and the response is what the
/// cache ultimately reflects.
#[async_trait]
pub trait WorklogClient: Send + Sync {
    async fn start_session(&self, entry_id: EntryId) -> Result<TimeSpan, InfraError>;

    async fn pause_session(&self, span_id: SpanId) -> Result<TimeSpan, InfraError>;

    async fn active_session(&self) -> Result<Option<TimeSpan>, InfraError>;

    async fn list_spans(&self, entry_id: EntryId) -> Result<Vec<TimeSpan>, InfraError>;

    async fn create_span(
        &self,
        entry_id: EntryId,
        bounds: SpanWritePayload,
    ) -> Result<TimeSpan, InfraError>;

    async fn update_span(
        &self,
        span_id: SpanId,
        bounds: SpanWritePayload,
    ) -> Result<TimeSpan, InfraError>;

    async fn adjust_span(&self, span_id: SpanId, delta_hours: f64) -> Result<TimeSpan, InfraError>;

    async fn delete_span(&self, span_id: SpanId) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestWorklogClient {
    client: Client,
    base_url: Url,
}

impl ReqwestWorklogClient {
    pub fn new(base_url: &str) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid api base url: {error}")))?;
        Ok(Self {
            client: Client::new(),
            base_url,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| InfraError::InvalidConfig("api base URL cannot be a base".to_string()))?;
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn api_error(status: reqwest::StatusCode, body: &str, context: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("{context}: http {}", status.as_u16())
        } else {
            format!("{context}: http {}; body={body}", status.as_u16())
        };
        match status {
            reqwest::StatusCode::NOT_FOUND => InfraError::NotFound(message),
            reqwest::StatusCode::CONFLICT => InfraError::SessionConflict(message),
            _ => InfraError::Api(message),
        }
    }

    async fn read_body(
        response: reqwest::Response,
        context: &str,
    ) -> Result<(reqwest::StatusCode, String), InfraError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Api(format!("failed reading {context} response: {error}")))?;
        Ok((status, body))
    }

    fn parse_body<T: DeserializeOwned>(body: &str, context: &str) -> Result<T, InfraError> {
        serde_json::from_str(body)
            .map_err(|error| InfraError::Api(format!("invalid {context} payload: {error}; body={body}")))
    }
}

#[async_trait]
impl WorklogClient for ReqwestWorklogClient {
    async fn start_session(&self, entry_id: EntryId) -> Result<TimeSpan, InfraError> {
        let endpoint = self.endpoint(&["sessions", "start"])?;
        let response = self
            .client
            .post(endpoint)
            .json(&StartSessionPayload { entry_id })
            .send()
            .await
            .map_err(|error| InfraError::Api(format!("network error while starting session: {error}")))?;

        let (status, body) = Self::read_body(response, "session start").await?;
        if !status.is_success() {
            return Err(Self::api_error(status, &body, "session start failed"));
        }

        let parsed: TimeSpanPayload = Self::parse_body(&body, "session start")?;
        decode_span(&parsed)
    }

    async fn pause_session(&self, span_id: SpanId) -> Result<TimeSpan, InfraError> {
        let endpoint = self.endpoint(&["sessions", &span_id.to_string(), "pause"])?;
        let response = self
            .client
            .post(endpoint)
            .send()
            .await
            .map_err(|error| InfraError::Api(format!("network error while pausing session: {error}")))?;

        let (status, body) = Self::read_body(response, "session pause").await?;
        if !status.is_success() {
            return Err(Self::api_error(status, &body, "session pause failed"));
        }

        let parsed: TimeSpanPayload = Self::parse_body(&body, "session pause")?;
        decode_span(&parsed)
    }

    async fn active_session(&self) -> Result<Option<TimeSpan>, InfraError> {
        let endpoint = self.endpoint(&["sessions", "active"])?;
        let response = self
            .client
            .get(endpoint)
            .send()
            .await
            .map_err(|error| InfraError::Api(format!("network error while polling session: {error}")))?;

        let (status, body) = Self::read_body(response, "active session").await?;
        if !status.is_success() {
            return Err(Self::api_error(status, &body, "active session poll failed"));
        }

        let parsed: Option<TimeSpanPayload> = Self::parse_body(&body, "active session")?;
        parsed.as_ref().map(decode_span).transpose()
    }

    async fn list_spans(&self, entry_id: EntryId) -> Result<Vec<TimeSpan>, InfraError> {
        let endpoint = self.endpoint(&["entries", &entry_id.to_string(), "intervals"])?;
        let response = self
            .client
            .get(endpoint)
            .send()
            .await
            .map_err(|error| InfraError::Api(format!("network error while listing spans: {error}")))?;

        let (status, body) = Self::read_body(response, "span list").await?;
        if !status.is_success() {
            return Err(Self::api_error(status, &body, "span list failed"));
        }

        let parsed: Vec<TimeSpanPayload> = Self::parse_body(&body, "span list")?;
        parsed.iter().map(decode_span).collect()
    }

    async fn create_span(
        &self,
        entry_id: EntryId,
        bounds: SpanWritePayload,
    ) -> Result<TimeSpan, InfraError> {
        let endpoint = self.endpoint(&["entries", &entry_id.to_string(), "intervals"])?;
        let response = self
            .client
            .post(endpoint)
            .json(&bounds)
            .send()
            .await
            .map_err(|error| InfraError::Api(format!("network error while creating span: {error}")))?;

        let (status, body) = Self::read_body(response, "span create").await?;
        if !status.is_success() {
            return Err(Self::api_error(status, &body, "span create failed"));
        }

        let parsed: TimeSpanPayload = Self::parse_body(&body, "span create")?;
        decode_span(&parsed)
    }

    async fn update_span(
        &self,
        span_id: SpanId,
        bounds: SpanWritePayload,
    ) -> Result<TimeSpan, InfraError> {
        let endpoint = self.endpoint(&["intervals", &span_id.to_string()])?;
        let response = self
            .client
            .put(endpoint)
            .json(&bounds)
            .send()
            .await
            .map_err(|error| InfraError::Api(format!("network error while updating span: {error}")))?;

        let (status, body) = Self::read_body(response, "span update").await?;
        if !status.is_success() {
            return Err(Self::api_error(status, &body, "span update failed"));
        }

        let parsed: TimeSpanPayload = Self::parse_body(&body, "span update")?;
        decode_span(&parsed)
    }

    async fn adjust_span(&self, span_id: SpanId, delta_hours: f64) -> Result<TimeSpan, InfraError> {
        let endpoint = self.endpoint(&["intervals", &span_id.to_string(), "adjust"])?;
        let response = self
            .client
            .post(endpoint)
            .json(&AdjustSpanPayload { delta_hours })
            .send()
            .await
            .map_err(|error| InfraError::Api(format!("network error while adjusting span: {error}")))?;

        let (status, body) = Self::read_body(response, "span adjust").await?;
        if !status.is_success() {
            return Err(Self::api_error(status, &body, "span adjust failed"));
        }

        let parsed: TimeSpanPayload = Self::parse_body(&body, "span adjust")?;
        decode_span(&parsed)
    }

    async fn delete_span(&self, span_id: SpanId) -> Result<(), InfraError> {
        let endpoint = self.endpoint(&["intervals", &span_id.to_string()])?;
        let response = self
            .client
            .delete(endpoint)
            .send()
            .await
            .map_err(|error| InfraError::Api(format!("network error while deleting span: {error}")))?;

        let (status, body) = Self::read_body(response, "span delete").await?;
        if !status.is_success() {
            return Err(Self::api_error(status, &body, "span delete failed"));
        }
        Ok(())
    }
}
