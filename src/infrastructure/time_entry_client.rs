use crate::domain::models::{Pagination, StartTimeEntryRequest, StatsPeriod, TimeEntry, TimeStats};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

const TIME_ENTRIES_SEGMENT: &str = "time-entries";

/// Server contract for time entries. Every call is a single request; retries
/// and failure policy belong to the caller.
#[async_trait]
pub trait TimeEntryClient: Send + Sync {
    async fn start_time_entry(
        &self,
        request: &StartTimeEntryRequest,
    ) -> Result<TimeEntry, InfraError>;

    async fn pause_time_entry(&self, time_entry_id: &str) -> Result<TimeEntry, InfraError>;

    async fn resume_time_entry(&self, time_entry_id: &str) -> Result<TimeEntry, InfraError>;

    async fn stop_time_entry(&self, time_entry_id: &str) -> Result<TimeEntry, InfraError>;

    async fn get_active_time_entry(&self) -> Result<Option<TimeEntry>, InfraError>;

    async fn get_task_time_entries(&self, task_id: &str) -> Result<Vec<TimeEntry>, InfraError>;

    async fn get_user_time_entries(
        &self,
        pagination: Pagination,
    ) -> Result<Vec<TimeEntry>, InfraError>;

    async fn get_time_stats(&self, period: StatsPeriod) -> Result<TimeStats, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTimeEntryClient {
    client: Client,
    base_url: Url,
    access_token: Option<String>,
}

impl ReqwestTimeEntryClient {
    pub fn new(base_url: &str, access_token: Option<String>) -> Result<Self, InfraError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid api base url: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(
                "api base url cannot be a base".to_string(),
            ));
        }
        // Without the trailing slash `Url::join` would drop the last path segment.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            access_token: access_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
        })
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::InvalidInput(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| {
                    InfraError::InvalidConfig("api base url cannot be a base".to_string())
                })?;
            path.pop_if_empty();
            path.push(TIME_ENTRIES_SEGMENT);
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.access_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send_for_body(
        &self,
        request: RequestBuilder,
        action: &str,
    ) -> Result<(StatusCode, String), InfraError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|error| InfraError::Remote(format!("network error while {action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| {
                InfraError::Remote(format!("failed reading response while {action}: {error}"))
            })?;
        Ok((status, body))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        action: &str,
    ) -> Result<T, InfraError> {
        let (status, body) = self.send_for_body(request, action).await?;
        if !status.is_success() {
            return Err(http_error(status, &body));
        }
        decode_payload(&body, action)
    }
}

fn http_error(status: StatusCode, body: &str) -> InfraError {
    if status == StatusCode::UNAUTHORIZED {
        return InfraError::Unauthorized;
    }
    InfraError::Http {
        status: status.as_u16(),
        body: body.trim().to_string(),
    }
}

fn decode_payload<T: DeserializeOwned>(body: &str, action: &str) -> Result<T, InfraError> {
    serde_json::from_str(body).map_err(|error| {
        InfraError::Remote(format!("invalid payload while {action}: {error}; body={body}"))
    })
}

/// An empty body, `null`, or a 404 all mean "nothing in progress".
fn decode_active_entry(status: StatusCode, body: &str) -> Result<Option<TimeEntry>, InfraError> {
    if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(http_error(status, body));
    }
    if body.trim().is_empty() {
        return Ok(None);
    }
    decode_payload::<Option<TimeEntry>>(body, "loading active time entry")
}

#[async_trait]
impl TimeEntryClient for ReqwestTimeEntryClient {
    async fn start_time_entry(
        &self,
        request: &StartTimeEntryRequest,
    ) -> Result<TimeEntry, InfraError> {
        Self::ensure_non_empty(&request.task_id, "task id")?;
        let endpoint = self.endpoint(&["start"])?;
        self.send_json(self.client.post(endpoint).json(request), "starting time entry")
            .await
    }

    async fn pause_time_entry(&self, time_entry_id: &str) -> Result<TimeEntry, InfraError> {
        Self::ensure_non_empty(time_entry_id, "time entry id")?;
        let endpoint = self.endpoint(&[time_entry_id, "pause"])?;
        self.send_json(self.client.put(endpoint), "pausing time entry").await
    }

    async fn resume_time_entry(&self, time_entry_id: &str) -> Result<TimeEntry, InfraError> {
        Self::ensure_non_empty(time_entry_id, "time entry id")?;
        let endpoint = self.endpoint(&[time_entry_id, "resume"])?;
        self.send_json(self.client.put(endpoint), "resuming time entry").await
    }

    async fn stop_time_entry(&self, time_entry_id: &str) -> Result<TimeEntry, InfraError> {
        Self::ensure_non_empty(time_entry_id, "time entry id")?;
        let endpoint = self.endpoint(&[time_entry_id, "stop"])?;
        self.send_json(self.client.put(endpoint), "stopping time entry").await
    }

    async fn get_active_time_entry(&self) -> Result<Option<TimeEntry>, InfraError> {
        let endpoint = self.endpoint(&["active"])?;
        let (status, body) = self
            .send_for_body(self.client.get(endpoint), "loading active time entry")
            .await?;
        decode_active_entry(status, &body)
    }

    async fn get_task_time_entries(&self, task_id: &str) -> Result<Vec<TimeEntry>, InfraError> {
        Self::ensure_non_empty(task_id, "task id")?;
        let endpoint = self.endpoint(&["task", task_id])?;
        self.send_json(self.client.get(endpoint), "listing task time entries")
            .await
    }

    async fn get_user_time_entries(
        &self,
        pagination: Pagination,
    ) -> Result<Vec<TimeEntry>, InfraError> {
        let endpoint = self.endpoint(&[])?;
        let request = self
            .client
            .get(endpoint)
            .query(&[("limit", pagination.limit), ("offset", pagination.offset)]);
        self.send_json(request, "listing user time entries").await
    }

    async fn get_time_stats(&self, period: StatsPeriod) -> Result<TimeStats, InfraError> {
        let endpoint = self.endpoint(&["stats"])?;
        let request = self.client.get(endpoint).query(&[("period", period.as_str())]);
        self.send_json(request, "loading time stats").await
    }
}
