//! Change-feed subscription over Server-Sent Events.
//!
//! Disconnects are never reported to subscribers. The client reconnects with
//! capped exponential backoff and the store's poll loop bounds staleness in
//! the meantime.

use crate::config::DashboardConfig;
use crate::model::ChangeEvent;
use crate::prelude::{CoreError, CoreResult};
use log::{debug, info, warn};
use reqwest::header::ACCEPT;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

pub const CHANGES_PATH: &str = "detections/changes";

/// One dispatched SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser. Bytes may arrive split anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            "id" => self.id = Some(value.to_owned()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(SseFrame { event, id, data })
    }
}

pub fn decode_change(frame: &SseFrame) -> CoreResult<ChangeEvent> {
    Ok(serde_json::from_str(&frame.data)?)
}

/// Live subscription; dropping it or calling [`unsubscribe`](Self::unsubscribe)
/// stops the stream.
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone)]
pub struct ChangeFeedClient {
    http: reqwest::Client,
    url: String,
    reconnect_delay: Duration,
    max_reconnect_delay: Duration,
}

impl ChangeFeedClient {
    pub fn new(base_url: &str) -> Self {
        Self::from_config(&DashboardConfig {
            backend_url: base_url.to_owned(),
            ..Default::default()
        })
    }

    pub fn from_config(config: &DashboardConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!("{}/{}", config.backend_url.trim_end_matches('/'), CHANGES_PATH),
            reconnect_delay: config.reconnect_delay(),
            max_reconnect_delay: config.max_reconnect_delay(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Streams events to `on_event` until the handle is dropped. Must be
    /// called inside a tokio runtime.
    pub fn subscribe<F>(&self, on_event: F) -> SubscriptionHandle
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let client = self.clone();
        let task = tokio::spawn(async move { client.run(on_event).await });
        SubscriptionHandle { task }
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        handle.unsubscribe();
    }

    async fn run<F>(self, on_event: F)
    where
        F: Fn(ChangeEvent) + Send + Sync,
    {
        let mut delay = self.reconnect_delay;
        loop {
            let mut connected = false;
            match self.stream_once(&on_event, &mut connected).await {
                Ok(()) => debug!("change feed closed by server"),
                Err(err) => warn!("change feed disconnected: {}", err),
            }
            if connected {
                delay = self.reconnect_delay;
            }
            time::sleep(delay).await;
            delay = (delay * 2).min(self.max_reconnect_delay);
        }
    }

    async fn stream_once<F>(&self, on_event: &F, connected: &mut bool) -> CoreResult<()>
    where
        F: Fn(ChangeEvent) + Send + Sync,
    {
        let mut response = self
            .http
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        *connected = true;
        info!("change feed connected to {}", self.url);

        let mut decoder = SseDecoder::new();
        while let Some(chunk) = response.chunk().await? {
            for frame in decoder.push(&chunk) {
                match decode_change(&frame) {
                    Ok(event) => on_event(event),
                    Err(err) => warn!("skipping malformed change frame: {}", err),
                }
            }
        }
        Ok(())
    }
}
