use async_trait::async_trait;
use config_manager::OpenAiConfig;
use reqwest::{header::HeaderMap, Client, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::types::{MessageList, RunObject, ThreadObject};
use crate::{AssistantError, AssistantProvider, Result};

/// OpenAI Assistants v2 client bound to one assistant
#[derive(Clone)]
pub struct OpenAiAssistantClient {
    client: Client,
    base_url: String,
    assistant_id: String,
}

impl OpenAiAssistantClient {
    pub fn new(
        base_url: String,
        api_key: &str,
        assistant_id: String,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            format!("Bearer {}", api_key)
                .parse()
                .map_err(|e| AssistantError::Config(format!("Invalid auth header: {}", e)))?,
        );
        headers.insert(
            "OpenAI-Beta",
            "assistants=v2"
                .parse()
                .map_err(|e| AssistantError::Config(format!("Invalid beta header: {}", e)))?,
        );

        let client = Client::builder()
            .timeout(request_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            assistant_id,
        })
    }

    pub fn from_config(config: &OpenAiConfig) -> Result<Self> {
        Self::new(
            config.api_base_url.clone(),
            &config.api_key,
            config.assistant_id.clone(),
            Duration::from_secs(config.request_timeout_seconds),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        let response = Self::check(response).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Err(AssistantError::Api {
            status: status.as_u16(),
            message: text,
        })
    }
}

#[async_trait]
impl AssistantProvider for OpenAiAssistantClient {
    async fn create_thread(&self) -> Result<String> {
        let response = self
            .client
            .post(self.url("threads"))
            .json(&json!({}))
            .send()
            .await?;
        let thread: ThreadObject = Self::parse(response).await?;
        debug!("Created thread {}", thread.id);
        Ok(thread.id)
    }

    async fn add_message(&self, thread_id: &str, content: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("threads/{}/messages", thread_id)))
            .json(&json!({ "role": "user", "content": content }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn create_run(&self, thread_id: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url(&format!("threads/{}/runs", thread_id)))
            .json(&json!({ "assistant_id": self.assistant_id }))
            .send()
            .await?;
        let run: RunObject = Self::parse(response).await?;
        debug!("Started run {} on thread {}", run.id, thread_id);
        Ok(run.id)
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunObject> {
        let response = self
            .client
            .get(self.url(&format!("threads/{}/runs/{}", thread_id, run_id)))
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn latest_reply(&self, thread_id: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.url(&format!("threads/{}/messages", thread_id)))
            .query(&[("order", "desc"), ("limit", "20")])
            .send()
            .await?;
        let messages: MessageList = Self::parse(response).await?;
        Ok(messages.latest_assistant_text())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("threads/{}", thread_id)))
            .send()
            .await?;
        Self::check(response).await?;
        debug!("Deleted thread {}", thread_id);
        Ok(())
    }
}
