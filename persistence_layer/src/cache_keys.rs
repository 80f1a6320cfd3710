/// Logical blob paths for every pipeline stage.
///
/// Addresses are expected to be normalized already; keys are never built from
/// raw user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    raw_transactions: String,
    analysis_chunks: String,
    final_analysis: String,
}

impl CacheKeys {
    pub fn new(
        raw_transactions: impl Into<String>,
        analysis_chunks: impl Into<String>,
        final_analysis: impl Into<String>,
    ) -> Self {
        Self {
            raw_transactions: raw_transactions.into(),
            analysis_chunks: analysis_chunks.into(),
            final_analysis: final_analysis.into(),
        }
    }

    /// `{rawTransactions}/{address}.json`
    pub fn raw_transactions(&self, address: &str) -> String {
        format!("{}/{}.json", self.raw_transactions, address)
    }

    /// `{analysisChunks}/{address}-{index}.json`
    pub fn chunk(&self, address: &str, index: usize) -> String {
        format!("{}/{}-{}.json", self.analysis_chunks, address, index)
    }

    /// `{analysisChunks}/{address}-final.json`
    pub fn chunk_manifest(&self, address: &str) -> String {
        format!("{}/{}-final.json", self.analysis_chunks, address)
    }

    /// `{finalAnalysis}/{address}.json`
    pub fn final_analysis(&self, address: &str) -> String {
        format!("{}/{}.json", self.final_analysis, address)
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new(
            "wrapped-2024-raw",
            "wrapped-2024-analysis-chunks",
            "wrapped-2024-analysis",
        )
    }
}
