use crate::config::DashboardConfig;
use crate::model::{
    AssignmentRequest, Detection, NewDetection, Note, NoteRequest, Stats, Status, StatusUpdate,
    TimelineEntry,
};
use crate::prelude::{CoreError, CoreResult, DetectionSource, MutationApi};
use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;

pub const DEFAULT_ACTOR: &str = "operator";

/// reqwest client for the detection service.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    list_limit: usize,
    actor: String,
    report_url: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            list_limit: DashboardConfig::default().list_limit,
            actor: DEFAULT_ACTOR.into(),
            report_url: None,
        }
    }

    pub fn from_config(config: &DashboardConfig) -> Self {
        let backend = Self::new(config.backend_url.clone()).with_list_limit(config.list_limit);
        match &config.report_service_url {
            Some(url) => backend.with_report_service(url.clone()),
            None => backend,
        }
    }

    /// Base URL of the external service that renders `GET reports/{id}`.
    /// The detection service itself serves no reports.
    pub fn with_report_service(mut self, url: impl Into<String>) -> Self {
        self.report_url = Some(url.into());
        self
    }

    pub fn reports_enabled(&self) -> bool {
        self.report_url.is_some()
    }

    pub fn with_list_limit(mut self, list_limit: usize) -> Self {
        self.list_limit = list_limit;
        self
    }

    /// Name recorded on the timeline for mutations issued by this client.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn endpoint(&self, segments: &[&str]) -> CoreResult<Url> {
        join_url(&self.base_url, segments)
    }

    pub fn report_endpoint(&self, id: &str) -> CoreResult<Url> {
        let base = self
            .report_url
            .as_deref()
            .ok_or_else(|| CoreError::Config("no report service configured".into()))?;
        join_url(base, &["reports", id])
    }

    pub async fn timeline(&self, id: &str) -> CoreResult<Vec<TimelineEntry>> {
        let url = self.endpoint(&["detections", id, "timeline"])?;
        expect_json(self.http.get(url).send().await?).await
    }

    pub async fn notes(&self, id: &str) -> CoreResult<Vec<Note>> {
        let url = self.endpoint(&["detections", id, "notes"])?;
        expect_json(self.http.get(url).send().await?).await
    }

    pub async fn ingest(&self, detection: &NewDetection) -> CoreResult<Detection> {
        let url = self.endpoint(&["detections"])?;
        expect_json(self.http.post(url).json(detection).send().await?).await
    }

    /// Downloads the rendered report for `id`. The bytes are not inspected
    /// beyond the content type.
    pub async fn fetch_report(&self, id: &str) -> CoreResult<Vec<u8>> {
        let url = self.report_endpoint(id)?;
        let response = expect_success(self.http.get(url).send().await?).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        if !content_type.starts_with("application/pdf") {
            return Err(CoreError::UnexpectedContentType(content_type));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

fn join_url(base: &str, segments: &[&str]) -> CoreResult<Url> {
    let mut url =
        Url::parse(base).map_err(|err| CoreError::Config(format!("backend url {}: {}", base, err)))?;
    url.path_segments_mut()
        .map_err(|_| CoreError::Config(format!("backend url {} cannot be a base", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn expect_success(response: Response) -> CoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CoreError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn expect_json<T: DeserializeOwned>(response: Response) -> CoreResult<T> {
    let response = expect_success(response).await?;
    Ok(response.json::<T>().await?)
}

impl DetectionSource for HttpBackend {
    async fn fetch_detections(&self) -> CoreResult<Vec<Detection>> {
        let url = self.endpoint(&["detections"])?;
        let response = self
            .http
            .get(url)
            .query(&[("limit", self.list_limit)])
            .send()
            .await?;
        let detections: Vec<Detection> = expect_json(response).await?;
        debug!("fetched {} detections", detections.len());
        Ok(detections)
    }

    async fn fetch_stats(&self) -> CoreResult<Stats> {
        let url = self.endpoint(&["detection_stats"])?;
        expect_json(self.http.get(url).send().await?).await
    }
}

impl MutationApi for HttpBackend {
    async fn update_status(&self, id: &str, status: Status) -> CoreResult<Detection> {
        let url = self.endpoint(&["detections", id, "status"])?;
        let body = StatusUpdate {
            status,
            actor: Some(self.actor.clone()),
        };
        expect_json(self.http.put(url).json(&body).send().await?).await
    }

    async fn add_note(&self, id: &str, content: &str) -> CoreResult<Note> {
        let url = self.endpoint(&["detections", id, "notes"])?;
        let body = NoteRequest {
            content: content.to_owned(),
            author: Some(self.actor.clone()),
        };
        expect_json(self.http.post(url).json(&body).send().await?).await
    }

    async fn assign(&self, id: &str, user_id: &str) -> CoreResult<Detection> {
        let url = self.endpoint(&["detections", id, "assignment"])?;
        let body = AssignmentRequest {
            user_id: user_id.to_owned(),
            actor: Some(self.actor.clone()),
        };
        expect_json(self.http.post(url).json(&body).send().await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_escaped_segments() {
        let backend = HttpBackend::new("http://127.0.0.1:9000/");
        let url = backend.endpoint(&["detections", "a b/c", "status"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/detections/a%20b%2Fc/status");
    }

    #[test]
    fn endpoint_keeps_base_path_prefix() {
        let backend = HttpBackend::new("http://monitor.local/api");
        let url = backend.endpoint(&["detection_stats"]).unwrap();
        assert_eq!(url.as_str(), "http://monitor.local/api/detection_stats");
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let backend = HttpBackend::new("not a url");
        assert!(matches!(
            backend.endpoint(&["detections"]),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn from_config_carries_list_limit() {
        let config = DashboardConfig {
            list_limit: 25,
            ..Default::default()
        };
        let backend = HttpBackend::from_config(&config).with_actor("analyst-7");
        assert_eq!(backend.list_limit, 25);
        assert_eq!(backend.actor(), "analyst-7");
    }

    #[tokio::test]
    async fn reports_need_a_configured_report_service() {
        let backend = HttpBackend::from_config(&DashboardConfig::default());
        assert!(!backend.reports_enabled());
        assert!(matches!(
            backend.fetch_report("det-000001").await,
            Err(CoreError::Config(_))
        ));

        let config = DashboardConfig {
            report_service_url: Some("http://reports.local/render/".into()),
            ..Default::default()
        };
        let backend = HttpBackend::from_config(&config);
        assert!(backend.reports_enabled());
        assert_eq!(
            backend.report_endpoint("det-000001").unwrap().as_str(),
            "http://reports.local/render/reports/det-000001"
        );
    }
}
