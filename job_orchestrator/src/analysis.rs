use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use zapper_client::Transaction;

/// The four wrapped categories. Items are free-form objects produced by the
/// assistant (`name`, `stat`, `description`, `category` and friends).
///
/// Both per-batch results and the consolidated report use this shape; a
/// missing category deserializes as an empty list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisReport {
    pub popular_tokens: Vec<Value>,
    pub popular_actions: Vec<Value>,
    pub popular_users: Vec<Value>,
    pub other_stories: Vec<Value>,
}

pub type BatchAnalysis = AnalysisReport;
pub type ConsolidatedAnalysis = AnalysisReport;

impl AnalysisReport {
    pub fn item_count(&self) -> usize {
        self.popular_tokens.len()
            + self.popular_actions.len()
            + self.popular_users.len()
            + self.other_stories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    /// Append another report's items, category by category
    pub fn extend(&mut self, other: AnalysisReport) {
        self.popular_tokens.extend(other.popular_tokens);
        self.popular_actions.extend(other.popular_actions);
        self.popular_users.extend(other.popular_users);
        self.other_stories.extend(other.other_stories);
    }

    /// Concatenate reports in the order given
    pub fn merge<I: IntoIterator<Item = AnalysisReport>>(reports: I) -> AnalysisReport {
        let mut merged = AnalysisReport::default();
        for report in reports {
            merged.extend(report);
        }
        merged
    }

    /// Report for an address with no activity in the window
    pub fn no_activity() -> AnalysisReport {
        AnalysisReport {
            other_stories: vec![json!({
                "name": "No Activity Found",
                "stat": "0 transactions",
                "description": "We couldn't find any transactions for this address on Base in 2024. This could mean you haven't made any transactions yet, or you might be using a different address.",
                "category": "info"
            })],
            ..AnalysisReport::default()
        }
    }
}

/// Parse an assistant reply into a report. Replies are often wrapped in a
/// markdown code fence, which is removed first.
pub fn parse_reply(reply: &str) -> serde_json::Result<AnalysisReport> {
    serde_json::from_str(strip_code_fence(reply))
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string ("json") on the opening fence line
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

pub fn batch_prompt(batch: &[Transaction]) -> serde_json::Result<String> {
    Ok(format!(
        "Please analyze this batch of transactions and provide insights: {}",
        serde_json::to_string(batch)?
    ))
}

pub fn consolidation_prompt(merged: &AnalysisReport) -> serde_json::Result<String> {
    Ok(format!(
        "Please provide a final consolidated analysis, removing any duplicates and keeping only the most significant items in each category. Here's all the data: {}",
        serde_json::to_string(merged)?
    ))
}
