use std::sync::{Arc, Mutex};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    config_db::SearchDefaults,
    corpus_db::{self, CorpusDb},
    data_dir::DataDir,
    document::DocumentFilter,
    error,
    highlight::{self, HighlightOptions, PageLayout},
    providers::MatchPolicy,
    search::{self, SearchContext, SearchMode, SearchRequest, SearchResponse},
    window::Granularity,
};

struct DocspanState {
    defaults: SearchDefaults,
    corpus_name: String,
    corpus_db: Option<CorpusDb>,
    ctx: Mutex<SearchContext>,
}

#[derive(Clone)]
pub struct DocspanMcpServer {
    state: Arc<DocspanState>,
    tool_router: ToolRouter<Self>,
}

impl DocspanMcpServer {
    fn new(state: DocspanState) -> Self {
        Self {
            state: Arc::new(state),
            tool_router: Self::tool_router(),
        }
    }

    fn search_request(
        &self,
        params: SearchParams,
    ) -> error::Result<SearchRequest> {
        let defaults = &self.state.defaults;
        let mut request = SearchRequest::with_defaults(params.query, defaults);
        request.mode = params.mode.unwrap_or_default();
        if let Some(limit) = params.limit {
            request.max_results = limit;
        }
        request.keywords = params.keywords;
        request.vector_weight =
            params.vector_weight.unwrap_or(defaults.vector_weight);
        request.granularity =
            params.granularity.unwrap_or(defaults.granularity);
        request.radius = params.radius.unwrap_or(defaults.radius);
        request.min_similarity = params.min_similarity.unwrap_or(0.0);
        request.filter = match params.filter.as_deref() {
            Some(filter) => DocumentFilter::parse_optional(filter)?,
            None => None,
        };
        if params.match_all.unwrap_or(false) {
            request.match_policy = MatchPolicy::All;
        }
        Ok(request)
    }
}

#[tool_router(router = tool_router)]
impl DocspanMcpServer {
    /// Hybrid vector + keyword search with keyword-focused excerpts.
    #[tool(
        name = "docspan_search",
        description = "Search the corpus in vector, keyword or hybrid mode. Each result carries a keyword-focused excerpt and its keyword coverage."
    )]
    pub async fn docspan_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let request = self
            .search_request(params.0)
            .map_err(|e| invalid_params("invalid search parameters", e))?;

        let mut ctx = self.state.ctx.lock().map_err(|_| poisoned())?;

        let response = match search::execute_search(&mut ctx, &request) {
            Ok(response) => response,
            Err(e) if e.is_unready() => return Ok(not_ready(&e)),
            Err(
                e @ (error::Error::EmptyInput
                | error::Error::OutOfRange { .. }
                | error::Error::Config(_)),
            ) => return Err(invalid_params("invalid search request", e)),
            Err(e) => return Err(mcp_error("search failed", e)),
        };

        if request.mode != SearchMode::Keyword
            && let Some(db) = &self.state.corpus_db
            && let Err(e) = db.save_stats(ctx.search_stats())
        {
            tracing::warn!(error = %e, "failed to persist search stats");
        }

        let summary = format_search_summary(&response);
        let structured = serde_json::to_value(&response)
            .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Corpus size, index shape and search telemetry.
    #[tool(
        name = "docspan_stats",
        description = "Report document count, embedding dimension, index kind and search counters for the loaded corpus."
    )]
    pub async fn docspan_stats(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let ctx = self.state.ctx.lock().map_err(|_| poisoned())?;

        let stats = match ctx.stats() {
            Ok(stats) => stats,
            Err(e) if e.is_unready() => return Ok(not_ready(&e)),
            Err(e) => return Err(mcp_error("stats failed", e)),
        };

        let summary = format!(
            "corpus {}: {} documents, dimension {}, {} index, {} searches",
            self.state.corpus_name,
            stats.total_documents,
            stats.dimension,
            stats.index_kind,
            stats.total_searches
        );
        let structured = serde_json::to_value(&stats)
            .map_err(|e| mcp_error("failed to serialize stats", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Deduplicated keyword highlight boxes for one page layout.
    #[tool(
        name = "docspan_highlight",
        description = "Locate keywords on a page layout (words with bounding boxes in points), merge near-duplicate boxes and return them in image pixels, optionally with a crop region."
    )]
    pub async fn docspan_highlight(
        &self,
        params: Parameters<HighlightParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let options = HighlightOptions {
            tolerance: params.tolerance.unwrap_or(highlight::DEFAULT_TOLERANCE),
            dpi: params.dpi.unwrap_or(highlight::DEFAULT_DPI),
            crop_padding: params.crop.unwrap_or(false).then(|| {
                params
                    .crop_padding
                    .unwrap_or(highlight::DEFAULT_CROP_PADDING)
            }),
        };
        options
            .validate()
            .map_err(|e| invalid_params("invalid highlight parameters", e))?;

        let report =
            highlight::highlight_page(&params.page, &params.keywords, options);
        let summary = format!(
            "{} highlight(s) for {}",
            report.highlights.len(),
            params.keywords.join(", ")
        );
        let structured = serde_json::to_value(&report)
            .map_err(|e| mcp_error("failed to serialize highlights", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocspanMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("docspan", env!("CARGO_PKG_VERSION"))
                    .with_title("docspan MCP"),
            )
            .with_instructions(
                "Use docspan_search to find passages; prefer hybrid mode and pass explicit keywords for precise excerpts. Use docspan_highlight to get highlight boxes for a page.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// vector, keyword or hybrid (default: hybrid).
    pub mode: Option<SearchMode>,
    /// Maximum number of results, 1 to 100 (default: 10).
    pub limit: Option<usize>,
    /// Keywords to match and excerpt around (default: words of the query, at most 5).
    pub keywords: Option<Vec<String>>,
    /// Weight of vector similarity in hybrid mode, 0 to 1.
    pub vector_weight: Option<f32>,
    /// sentence or char excerpts.
    pub granularity: Option<Granularity>,
    /// Context radius in sentences or characters.
    pub radius: Option<usize>,
    /// Metadata filter: key=value, a bare category, or "all".
    pub filter: Option<String>,
    /// Minimum vector similarity, 0 to 1.
    pub min_similarity: Option<f32>,
    /// Require every keyword to match (default: any keyword).
    pub match_all: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HighlightParams {
    /// Page size and positioned words, in points.
    pub page: PageLayout,
    /// Keywords or phrases to highlight.
    pub keywords: Vec<String>,
    /// Corner distance under which boxes merge (default: 5).
    pub tolerance: Option<f32>,
    /// Render resolution (default: 150).
    pub dpi: Option<f32>,
    /// Also return a crop region around the highlights.
    pub crop: Option<bool>,
    /// Crop padding in pixels (default: 50).
    pub crop_padding: Option<f32>,
}

fn format_search_summary(response: &SearchResponse) -> String {
    if response.results.is_empty() {
        return format!("No results found for \"{}\"", response.query);
    }

    let mut lines = Vec::with_capacity(response.results.len() + 1);
    let suffix = if response.total_results == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{}\" ({} requested):",
        response.total_results,
        suffix,
        response.query,
        response.requested_results
    ));

    for r in &response.results {
        lines.push(format!(
            "#{} {:.3} {}",
            r.hit.vector_id(),
            r.score,
            r.excerpt
        ));
    }

    lines.join("\n")
}

fn not_ready(error: &error::Error) -> CallToolResult {
    let mut result = CallToolResult::error(vec![Content::text(error.to_string())]);
    result.structured_content = Some(json!({
        "error": "not_ready",
        "message": error.to_string(),
    }));
    result
}

fn poisoned() -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error("search context lock poisoned", None)
}

fn invalid_params(
    message: &str,
    error: impl std::fmt::Display,
) -> rmcp::ErrorData {
    rmcp::ErrorData::invalid_params(
        format!("{message}: {error}"),
        Some(json!({ "error": error.to_string() })),
    )
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(
    data_dir: DataDir,
    defaults: SearchDefaults,
    corpus: Option<String>,
) -> error::Result<()> {
    let corpus_name = corpus.unwrap_or_else(|| defaults.corpus.clone());
    let (ctx, corpus_db) = corpus_db::open_context(&data_dir, &corpus_name)?;

    let server = DocspanMcpServer::new(DocspanState {
        defaults,
        corpus_name,
        corpus_db,
        ctx: Mutex::new(ctx),
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        corpus::{Corpus, SearchStats},
        document::Metadata,
        embedding::{Embedder, HashingEmbedder},
        highlight::{BoundingBox, Word},
        index::IndexKind,
    };

    fn server_with(ctx: SearchContext) -> DocspanMcpServer {
        DocspanMcpServer::new(DocspanState {
            defaults: SearchDefaults::default(),
            corpus_name: "test".to_string(),
            corpus_db: None,
            ctx: Mutex::new(ctx),
        })
    }

    fn sample_context() -> SearchContext {
        let embedder = HashingEmbedder::new(32).unwrap();
        let texts = vec![
            "도로의 설계속도는 안전성을 고려한다. 차로폭은 3.0m 이상이다.".to_string(),
            "배수시설은 강우강도를 고려하여 설계한다.".to_string(),
        ];
        let embeddings = embedder.encode_batch(&texts).unwrap();
        let mut corpus = Corpus::new(32, IndexKind::Cosine).unwrap();
        corpus
            .add_documents(&embeddings, vec![Metadata::new(); 2], texts)
            .unwrap();
        SearchContext::with_corpus(corpus, SearchStats::default())
            .with_embedder(Box::new(embedder))
    }

    fn search_params(query: &str) -> SearchParams {
        SearchParams {
            query: query.to_string(),
            mode: Some(SearchMode::Keyword),
            limit: Some(5),
            keywords: None,
            vector_weight: None,
            granularity: Some(Granularity::Sentence),
            radius: Some(0),
            filter: Some("all".to_string()),
            min_similarity: None,
            match_all: None,
        }
    }

    fn summary_text(result: &CallToolResult) -> String {
        result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn search_tool_returns_structured_results() {
        let server = server_with(sample_context());

        let result = server
            .docspan_search(Parameters(search_params("설계속도")))
            .await
            .unwrap();

        let structured = result.structured_content.clone().expect("structured");
        let results = structured
            .get("results")
            .and_then(|v| v.as_array())
            .expect("results array");

        assert_eq!(results.len(), 1);
        let first = &results[0];
        assert_eq!(first.get("vector_id").and_then(|v| v.as_u64()), Some(0));
        assert_eq!(
            first.get("excerpt").and_then(|v| v.as_str()),
            Some("도로의 설계속도는 안전성을 고려한다.")
        );
        assert_eq!(
            first.get("keyword_coverage").and_then(|v| v.as_f64()),
            Some(100.0)
        );
        assert!(summary_text(&result).contains("Found 1 result"));
    }

    #[tokio::test]
    async fn search_tool_rejects_out_of_range_parameters() {
        let server = server_with(sample_context());
        let mut params = search_params("설계속도");
        params.limit = Some(0);

        assert!(server.docspan_search(Parameters(params)).await.is_err());
    }

    #[tokio::test]
    async fn tools_report_not_ready_without_corpus() {
        let server = server_with(SearchContext::new());

        let result = server
            .docspan_search(Parameters(search_params("설계속도")))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert!(summary_text(&result).contains("not ready"));

        let result = server.docspan_stats().await.unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn stats_tool_reports_corpus_shape() {
        let server = server_with(sample_context());
        let result = server.docspan_stats().await.unwrap();
        let structured = result.structured_content.expect("structured");
        assert_eq!(structured["total_documents"], 2);
        assert_eq!(structured["dimension"], 32);
        assert_eq!(structured["index_kind"], "cosine");
    }

    fn highlight_params() -> HighlightParams {
        let word = |text: &str, x0: f32| Word {
            text: text.to_string(),
            bbox: BoundingBox::new(x0, 100.0, x0 + 30.0, 112.0),
        };
        HighlightParams {
            page: PageLayout {
                width: 595.0,
                height: 842.0,
                words: vec![word("설계", 50.0), word("속도", 85.0)],
            },
            keywords: vec!["설계 속도".to_string()],
            tolerance: None,
            dpi: Some(72.0),
            crop: Some(true),
            crop_padding: None,
        }
    }

    #[tokio::test]
    async fn highlight_tool_dedupes_boxes() {
        let server = server_with(SearchContext::new());
        let params = highlight_params();

        let result =
            server.docspan_highlight(Parameters(params)).await.unwrap();
        let structured = result.structured_content.expect("structured");
        let highlights =
            structured["highlights"].as_array().expect("highlights");
        // Exact phrase at x=50, then the "속도" token at x=85; "설계" merges.
        assert_eq!(highlights.len(), 2);
        assert_eq!(highlights[0]["keyword"], "설계 속도");
        assert_eq!(highlights[1]["keyword"], "속도");
        assert!(structured["crop"].is_object());
    }

    #[tokio::test]
    async fn highlight_tool_rejects_negative_tolerance() {
        let server = server_with(SearchContext::new());
        let mut params = highlight_params();
        params.tolerance = Some(-1.0);

        assert!(server.docspan_highlight(Parameters(params)).await.is_err());
    }
}
