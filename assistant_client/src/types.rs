use serde::{Deserialize, Serialize};

/// Lifecycle state of an Assistants run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }

    /// Terminal states that did not produce a usable reply
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RunStatus::Failed | RunStatus::Cancelled | RunStatus::Expired | RunStatus::Incomplete
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
            RunStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadObject {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunObject {
    pub id: String,
    pub status: RunStatus,
    pub last_error: Option<RunError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunError {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl RunObject {
    pub fn failure_message(&self) -> String {
        self.last_error
            .as_ref()
            .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
            .unwrap_or_else(|| "no error detail".to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageList {
    pub data: Vec<ThreadMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadMessage {
    pub role: String,
    #[serde(default)]
    pub content: Vec<MessageContent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: Option<MessageText>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageText {
    pub value: String,
}

impl MessageList {
    /// Text of the newest assistant message. The list must be newest-first.
    pub fn latest_assistant_text(&self) -> Option<String> {
        let message = self.data.iter().find(|m| m.role == "assistant")?;
        let text: Vec<&str> = message
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text.as_ref().map(|t| t.value.as_str()))
            .collect();

        if text.is_empty() {
            None
        } else {
            Some(text.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_parsing() {
        let run: RunObject = serde_json::from_str(
            r#"{"id":"run_abc","status":"in_progress","last_error":null}"#,
        )
        .unwrap();
        assert_eq!(run.status, RunStatus::InProgress);
        assert!(!run.status.is_completed());
        assert!(!run.status.is_failure());

        let odd: RunObject =
            serde_json::from_str(r#"{"id":"run_abc","status":"paused_for_reasons"}"#).unwrap();
        assert_eq!(odd.status, RunStatus::Unknown);
    }

    #[test]
    fn test_failed_run_message() {
        let run: RunObject = serde_json::from_str(
            r#"{"id":"run_abc","status":"failed","last_error":{"code":"rate_limit_exceeded","message":null}}"#,
        )
        .unwrap();
        assert!(run.status.is_failure());
        assert_eq!(run.failure_message(), "rate_limit_exceeded");
    }

    #[test]
    fn test_latest_assistant_text_skips_user_messages() {
        let list: MessageList = serde_json::from_str(
            r#"{"data":[
                {"role":"assistant","content":[
                    {"type":"text","text":{"value":"{\"popularTokens\":[]}"}},
                    {"type":"image_file"}
                ]},
                {"role":"user","content":[{"type":"text","text":{"value":"Please analyze"}}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            list.latest_assistant_text().as_deref(),
            Some("{\"popularTokens\":[]}")
        );
    }

    #[test]
    fn test_no_assistant_message() {
        let list: MessageList = serde_json::from_str(
            r#"{"data":[{"role":"user","content":[{"type":"text","text":{"value":"hi"}}]}]}"#,
        )
        .unwrap();
        assert!(list.latest_assistant_text().is_none());
    }
}
