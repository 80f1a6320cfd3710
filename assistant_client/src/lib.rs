use async_trait::async_trait;

pub mod client;
pub mod error;
pub mod session;
pub mod types;

pub use client::OpenAiAssistantClient;
pub use error::AssistantError;
pub use session::run_prompt;
pub use types::{RunObject, RunStatus};

pub type Result<T> = std::result::Result<T, AssistantError>;

/// The thread/message/run protocol of an assistant-style AI provider.
///
/// Callers normally go through [`run_prompt`], which sequences these calls
/// and always removes the thread afterwards.
#[async_trait]
pub trait AssistantProvider: Send + Sync {
    /// Returns the new thread id
    async fn create_thread(&self) -> Result<String>;

    async fn add_message(&self, thread_id: &str, content: &str) -> Result<()>;

    /// Returns the new run id
    async fn create_run(&self, thread_id: &str) -> Result<String>;

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunObject>;

    /// Text of the newest assistant message, if any
    async fn latest_reply(&self, thread_id: &str) -> Result<Option<String>>;

    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}
