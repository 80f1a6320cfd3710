use retry_utils::{poll_until, PollConfig, PollError, PollState};
use tracing::{debug, warn};

use crate::{AssistantError, AssistantProvider, Result};

/// Run one prompt through a fresh thread and return the assistant's reply.
///
/// The thread is deleted on every exit path once it exists; a failed delete
/// is logged and never masks the outcome of the prompt.
pub async fn run_prompt(
    provider: &dyn AssistantProvider,
    prompt: &str,
    poll: &PollConfig,
) -> Result<String> {
    let thread_id = provider.create_thread().await?;

    let outcome = converse(provider, &thread_id, prompt, poll).await;

    if let Err(e) = provider.delete_thread(&thread_id).await {
        warn!("Failed to delete thread {}: {}", thread_id, e);
    }

    outcome
}

async fn converse(
    provider: &dyn AssistantProvider,
    thread_id: &str,
    prompt: &str,
    poll: &PollConfig,
) -> Result<String> {
    provider.add_message(thread_id, prompt).await?;
    let run_id = provider.create_run(thread_id).await?;

    let run_ref: &str = &run_id;
    let waited = poll_until(
        move || async move {
            let run = provider.get_run(thread_id, run_ref).await?;
            if run.status.is_completed() {
                Ok(PollState::Ready(()))
            } else if run.status.is_failure() {
                Err(AssistantError::RunFailed {
                    run_id: run.id.clone(),
                    status: run.status.as_str().to_string(),
                    message: run.failure_message(),
                })
            } else {
                Ok(PollState::Pending)
            }
        },
        poll,
    )
    .await;

    match waited {
        Ok(()) => {}
        Err(PollError::Check(e)) => return Err(e),
        Err(PollError::TimedOut { waited }) => {
            return Err(AssistantError::PollTimeout { run_id, waited })
        }
    }

    debug!("Run {} completed on thread {}", run_id, thread_id);

    provider
        .latest_reply(thread_id)
        .await?
        .ok_or_else(|| AssistantError::NoReply {
            thread_id: thread_id.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RunError, RunObject, RunStatus};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted provider: run statuses are served in order, the last one repeats
    struct ScriptedProvider {
        statuses: Mutex<VecDeque<RunStatus>>,
        reply: Option<String>,
        fail_message: bool,
        created: Mutex<u32>,
        deleted: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(statuses: &[RunStatus], reply: Option<&str>) -> Self {
            Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                reply: reply.map(str::to_string),
                fail_message: false,
                created: Mutex::new(0),
                deleted: Mutex::new(Vec::new()),
            }
        }

        fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AssistantProvider for ScriptedProvider {
        async fn create_thread(&self) -> Result<String> {
            let mut created = self.created.lock().unwrap();
            *created += 1;
            Ok(format!("thread_{}", created))
        }

        async fn add_message(&self, _thread_id: &str, _content: &str) -> Result<()> {
            if self.fail_message {
                return Err(AssistantError::Api {
                    status: 400,
                    message: "bad request".into(),
                });
            }
            Ok(())
        }

        async fn create_run(&self, _thread_id: &str) -> Result<String> {
            Ok("run_1".to_string())
        }

        async fn get_run(&self, _thread_id: &str, run_id: &str) -> Result<RunObject> {
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.pop_front().unwrap_or(RunStatus::Unknown)
            } else {
                statuses.front().copied().unwrap_or(RunStatus::Unknown)
            };
            Ok(RunObject {
                id: run_id.to_string(),
                status,
                last_error: Some(RunError {
                    code: Some("server_error".into()),
                    message: None,
                }),
            })
        }

        async fn latest_reply(&self, _thread_id: &str) -> Result<Option<String>> {
            Ok(self.reply.clone())
        }

        async fn delete_thread(&self, thread_id: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(thread_id.to_string());
            Ok(())
        }
    }

    fn fast_poll() -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_run_returns_reply() {
        let provider = ScriptedProvider::new(
            &[RunStatus::Queued, RunStatus::InProgress, RunStatus::Completed],
            Some("{\"popularTokens\":[]}"),
        );

        let reply = run_prompt(&provider, "analyze", &fast_poll()).await.unwrap();
        assert_eq!(reply, "{\"popularTokens\":[]}");
        assert_eq!(provider.deleted(), vec!["thread_1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_still_deletes_thread() {
        let provider = ScriptedProvider::new(&[RunStatus::InProgress, RunStatus::Failed], None);

        let err = run_prompt(&provider, "analyze", &fast_poll()).await.unwrap_err();
        assert!(matches!(err, AssistantError::RunFailed { .. }));
        assert_eq!(provider.deleted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_run_times_out_and_deletes_thread() {
        let provider = ScriptedProvider::new(&[RunStatus::InProgress], Some("late"));

        let err = run_prompt(&provider, "analyze", &fast_poll()).await.unwrap_err();
        assert!(matches!(err, AssistantError::PollTimeout { .. }));
        assert_eq!(provider.deleted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_error_still_deletes_thread() {
        let mut provider = ScriptedProvider::new(&[RunStatus::Completed], Some("{}"));
        provider.fail_message = true;

        let err = run_prompt(&provider, "analyze", &fast_poll()).await.unwrap_err();
        assert!(matches!(err, AssistantError::Api { status: 400, .. }));
        assert_eq!(provider.deleted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_reply_is_an_error() {
        let provider = ScriptedProvider::new(&[RunStatus::Completed], None);

        let err = run_prompt(&provider, "analyze", &fast_poll()).await.unwrap_err();
        assert!(matches!(err, AssistantError::NoReply { .. }));
    }
}
