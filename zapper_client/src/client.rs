use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use config_manager::ZapperConfig;
use reqwest::{header::HeaderMap, Client};
use retry_utils::{retry_with_backoff, RetryConfig};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::types::{AccountsTimeline, GraphQlResponse, TimeWindow, Transaction};
use crate::{Result, TransactionSource, ZapperError};

const ACCOUNTS_TIMELINE_QUERY: &str = r#"
query ($addresses: [Address!], $realtimeInterpretation: Boolean, $isSigner: Boolean, $network: Network, $first: Int, $after: String) {
  accountsTimeline(addresses: $addresses, realtimeInterpretation: $realtimeInterpretation, isSigner: $isSigner, network: $network, first: $first, after: $after) {
    edges {
      node {
        key
        timestamp
        transaction {
          hash
          fromUser { displayName { value } }
          toUser { displayName { value } }
          value
        }
        app { tags }
        interpretation { processedDescription }
        interpreter { category }
      }
    }
    pageInfo {
      hasNextPage
      endCursor
    }
  }
}
"#;

/// Client for the Zapper `accountsTimeline` GraphQL endpoint
#[derive(Clone)]
pub struct ZapperClient {
    client: Client,
    graphql_url: String,
    network: String,
    page_size: u32,
    max_pages: u32,
    window: TimeWindow,
    retry: RetryConfig,
}

impl ZapperClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graphql_url: String,
        api_key: &str,
        network: String,
        page_size: u32,
        max_pages: u32,
        window: TimeWindow,
        request_timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();

        // Zapper expects the bare key encoded, without the user:password colon
        let encoded = general_purpose::STANDARD.encode(api_key.as_bytes());
        headers.insert(
            "Authorization",
            format!("Basic {}", encoded)
                .parse()
                .map_err(|e| ZapperError::Config(format!("Invalid auth header: {}", e)))?,
        );

        let client = Client::builder()
            .timeout(request_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            graphql_url,
            network,
            page_size,
            max_pages,
            window,
            retry,
        })
    }

    pub fn from_config(config: &ZapperConfig, retry: RetryConfig) -> Result<Self> {
        let (start_ms, end_ms) = config
            .window_bounds_ms()
            .map_err(|e| ZapperError::Config(e.to_string()))?;

        Self::new(
            config.graphql_url.clone(),
            &config.api_key,
            config.network.clone(),
            config.page_size,
            config.max_pages,
            TimeWindow { start_ms, end_ms },
            Duration::from_secs(config.request_timeout_seconds),
            retry,
        )
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    async fn fetch_page(&self, address: &str, cursor: Option<&str>) -> Result<AccountsTimeline> {
        let body = json!({
            "query": ACCOUNTS_TIMELINE_QUERY,
            "variables": {
                "addresses": [address],
                "realtimeInterpretation": true,
                "isSigner": true,
                "network": self.network,
                "first": self.page_size,
                "after": cursor,
            }
        });

        let response = self.client.post(&self.graphql_url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ZapperError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let response_text = response.text().await?;
        let parsed: GraphQlResponse = match serde_json::from_str(&response_text) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("❌ Zapper response parsing failed: {}", e);
                debug!(
                    "🔍 Response snippet: {}",
                    &response_text.chars().take(500).collect::<String>()
                );
                return Err(ZapperError::Json(e));
            }
        };

        if let Some(first) = parsed.errors.first() {
            return Err(ZapperError::GraphQl {
                message: first.message.clone(),
            });
        }

        parsed
            .data
            .map(|d| d.accounts_timeline)
            .ok_or_else(|| ZapperError::GraphQl {
                message: "response carried neither data nor errors".to_string(),
            })
    }
}

#[async_trait]
impl TransactionSource for ZapperClient {
    async fn fetch_transactions(&self, address: &str) -> Result<Vec<Transaction>> {
        let start_time = Instant::now();
        let mut collected: Vec<Transaction> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut page_num = 1u32;

        info!(
            "🔄 Fetching Zapper timeline for {} (window {}..{})",
            address, self.window.start_ms, self.window.end_ms
        );

        loop {
            let page = retry_with_backoff(
                || self.fetch_page(address, cursor.as_deref()),
                &self.retry,
                |e: &ZapperError| e.retry_class(),
            )
            .await?;

            let transactions: Vec<Transaction> = page
                .edges
                .into_iter()
                .map(|edge| Transaction::from(edge.node))
                .collect();
            let crossed = crosses_window_start(&transactions, &self.window);

            debug!(
                "📄 Page {}: {} transactions, has_next: {}, crossed window start: {}",
                page_num,
                transactions.len(),
                page.page_info.has_next_page,
                crossed
            );
            collected.extend(transactions);

            if crossed || !page.page_info.has_next_page {
                break;
            }

            match page.page_info.end_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    warn!("Zapper reported a next page without a cursor; stopping");
                    break;
                }
            }

            if page_num >= self.max_pages {
                warn!(
                    "⚠️ Stopping after {} pages for {}; older activity is not included",
                    page_num, address
                );
                break;
            }
            page_num += 1;
        }

        let fetched = collected.len();
        let in_window = truncate_to_window(collected, &self.window);

        info!(
            "📊 Zapper fetch for {}: {} pages, {} fetched, {} in window, {}ms",
            address,
            page_num,
            fetched,
            in_window.len(),
            start_time.elapsed().as_millis()
        );

        Ok(in_window)
    }
}

/// Whether a page reaches back past the window start. The timeline is
/// newest-first, so nothing after such a page can be in the window.
pub fn crosses_window_start(page: &[Transaction], window: &TimeWindow) -> bool {
    page.iter()
        .map(|tx| tx.timestamp)
        .min()
        .is_some_and(|oldest| oldest < window.start_ms)
}

/// Keep only transactions inside `[start, end)`, preserving order
pub fn truncate_to_window(transactions: Vec<Transaction>, window: &TimeWindow) -> Vec<Transaction> {
    transactions
        .into_iter()
        .filter(|tx| window.contains(tx.timestamp))
        .collect()
}
