use serde::{Deserialize, Serialize};

/// One normalized on-chain event, the unit of analysis input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Half-open analysis window `[start_ms, end_ms)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start_ms && timestamp_ms < self.end_ms
    }
}

// =====================================
// accountsTimeline response shapes
// =====================================

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlResponse {
    pub data: Option<TimelineData>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineData {
    pub accounts_timeline: AccountsTimeline,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountsTimeline {
    pub edges: Vec<TimelineEdge>,
    pub page_info: PageInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelineEdge {
    pub node: TimelineNode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelineNode {
    pub key: String,
    pub timestamp: i64,
    pub transaction: Option<NodeTransaction>,
    pub app: Option<NodeApp>,
    pub interpretation: Option<NodeInterpretation>,
    pub interpreter: Option<NodeInterpreter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTransaction {
    pub hash: Option<String>,
    pub from_user: Option<DisplayUser>,
    pub to_user: Option<DisplayUser>,
    /// Zapper has sent both strings and numbers here
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayUser {
    pub display_name: Option<DisplayName>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayName {
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeApp {
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInterpretation {
    pub processed_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeInterpreter {
    pub category: Option<String>,
}

impl DisplayUser {
    fn name(&self) -> Option<String> {
        self.display_name
            .as_ref()
            .and_then(|d| d.value.clone())
            .filter(|v| !v.is_empty())
    }
}

impl From<TimelineNode> for Transaction {
    fn from(node: TimelineNode) -> Self {
        let tx = node.transaction.as_ref();

        let hash = tx
            .and_then(|t| t.hash.clone())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| node.key.clone());

        let value = tx.and_then(|t| t.value.as_ref()).and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        Transaction {
            hash,
            timestamp: node.timestamp,
            description: node
                .interpretation
                .and_then(|i| i.processed_description)
                .unwrap_or_default(),
            category: node
                .interpreter
                .and_then(|i| i.category)
                .unwrap_or_default(),
            tags: node.app.and_then(|a| a.tags).unwrap_or_default(),
            from_user: tx.and_then(|t| t.from_user.as_ref()).and_then(DisplayUser::name),
            to_user: tx.and_then(|t| t.to_user.as_ref()).and_then(DisplayUser::name),
            value,
        }
    }
}
