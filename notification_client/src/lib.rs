use async_trait::async_trait;
use chrono::Utc;
use config_manager::NotificationConfig;
use persistence_layer::{FrameNotificationDetails, PersistenceError, RedisClient};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Subscriber lookup failed: {0}")]
    Lookup(#[from] PersistenceError),

    #[error("Notification service error {status}: {message}")]
    Api { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, NotificationError>;

/// What happened to one "analysis ready" notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Delivered,
    /// The subscriber never registered a notification token
    NoToken,
    RateLimited,
}

/// Receives "your analysis is ready" events for a subscriber id
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_ready(&self, fid: u64) -> Result<NotificationOutcome>;
}

/// Where registered subscribers' notification endpoints are kept
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    async fn notification_details(&self, fid: u64) -> Result<Option<FrameNotificationDetails>>;
}

#[async_trait]
impl SubscriberDirectory for RedisClient {
    async fn notification_details(&self, fid: u64) -> Result<Option<FrameNotificationDetails>> {
        Ok(self.get_notification_details(fid).await?)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    pub notification_id: String,
    pub title: String,
    pub body: String,
    pub target_url: String,
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendNotificationResponse {
    pub result: SendNotificationResult,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationResult {
    #[serde(default)]
    pub successful_tokens: Vec<String>,
    #[serde(default)]
    pub invalid_tokens: Vec<String>,
    #[serde(default)]
    pub rate_limited_tokens: Vec<String>,
}

impl SendNotificationResult {
    fn outcome(&self) -> NotificationOutcome {
        if self.rate_limited_tokens.is_empty() {
            NotificationOutcome::Delivered
        } else {
            NotificationOutcome::RateLimited
        }
    }
}

/// Farcaster frame notifier
pub struct FrameNotifier {
    client: Client,
    directory: Arc<dyn SubscriberDirectory>,
    title: String,
    body: String,
    target_url: String,
}

impl FrameNotifier {
    pub fn new(config: &NotificationConfig, directory: Arc<dyn SubscriberDirectory>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            directory,
            title: config.title.clone(),
            body: config.body.clone(),
            target_url: config.target_url.clone(),
        })
    }

    fn request_for(&self, fid: u64, token: String) -> SendNotificationRequest {
        SendNotificationRequest {
            notification_id: format!("{}-{}", fid, Utc::now().timestamp_millis()),
            title: self.title.clone(),
            body: self.body.clone(),
            target_url: self.target_url.clone(),
            tokens: vec![token],
        }
    }
}

#[async_trait]
impl NotificationSink for FrameNotifier {
    async fn notify_ready(&self, fid: u64) -> Result<NotificationOutcome> {
        let Some(details) = self.directory.notification_details(fid).await? else {
            debug!("No notification token registered for fid {}", fid);
            return Ok(NotificationOutcome::NoToken);
        };

        let request = self.request_for(fid, details.token);
        let response = self.client.post(&details.url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(NotificationError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let parsed: SendNotificationResponse = response.json().await?;
        let outcome = parsed.result.outcome();
        match outcome {
            NotificationOutcome::RateLimited => warn!("Notification for fid {} was rate limited", fid),
            _ => info!("📣 Sent analysis-ready notification to fid {}", fid),
        }
        Ok(outcome)
    }
}
