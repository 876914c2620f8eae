use std::{collections::HashSet, fmt, str::FromStr, time::Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    config_db::SearchDefaults,
    corpus::{Corpus, CorpusStats, SearchStats},
    coverage::score_extraction,
    document::{
        ADDED_AT_KEY,
        DocumentFilter,
        IndexedDocument,
        Metadata,
        VECTOR_ID_KEY,
    },
    embedding::Embedder,
    error::{Error, Result},
    fusion::{self, Hit, HybridMatch},
    providers::{self, KeywordMatch, MatchPolicy, VectorMatch},
    text_util::{Matching, fallback_excerpt, fold_str},
    window::{self, Granularity},
};

/// Keywords beyond this many are ignored.
pub const MAX_KEYWORDS: usize = 5;
pub const MAX_RESULTS: usize = 100;
pub const MAX_RADIUS: usize = 100;
pub const DEFAULT_MAX_RESULTS: usize = 10;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Keyword,
    #[default]
    Hybrid,
}

impl SearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Keyword => "keyword",
            Self::Hybrid => "hybrid",
        }
    }

    /// Candidates fetched before filtering so `n` results survive it.
    pub fn candidate_count(self, n: usize) -> usize {
        match self {
            Self::Keyword => (10 * n).max(200),
            Self::Vector | Self::Hybrid => (3 * n).max(50),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vector" => Ok(Self::Vector),
            "keyword" => Ok(Self::Keyword),
            "hybrid" => Ok(Self::Hybrid),
            other => {
                Err(Error::Config(format!("unknown search mode '{other}'")))
            }
        }
    }
}

/// Everything a caller can ask of one search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub mode: SearchMode,
    pub max_results: usize,
    /// Explicit keywords; the whitespace-split query is used when absent.
    pub keywords: Option<Vec<String>>,
    pub vector_weight: f32,
    pub granularity: Granularity,
    /// Sentences or characters, depending on `granularity`. Taken as given.
    pub radius: usize,
    pub filter: Option<DocumentFilter>,
    pub min_similarity: f32,
    pub match_policy: MatchPolicy,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self::with_defaults(query, &SearchDefaults::default())
    }

    pub fn with_defaults(
        query: impl Into<String>,
        defaults: &SearchDefaults,
    ) -> Self {
        Self {
            query: query.into(),
            mode: SearchMode::default(),
            max_results: DEFAULT_MAX_RESULTS,
            keywords: None,
            vector_weight: defaults.vector_weight,
            granularity: defaults.granularity,
            radius: defaults.radius,
            filter: None,
            min_similarity: 0.0,
            match_policy: MatchPolicy::default(),
        }
    }

    /// Reject out-of-range parameters before any work is done.
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::EmptyInput);
        }
        if !(1..=MAX_RESULTS).contains(&self.max_results) {
            return Err(Error::out_of_range(
                "max_results",
                self.max_results,
                "1..=100",
            ));
        }
        if !(0.0..=1.0).contains(&self.vector_weight) {
            return Err(Error::out_of_range(
                "vector_weight",
                self.vector_weight,
                "0.0..=1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(Error::out_of_range(
                "min_similarity",
                self.min_similarity,
                "0.0..=1.0",
            ));
        }
        if self.radius > MAX_RADIUS {
            return Err(Error::out_of_range("radius", self.radius, "0..=100"));
        }
        Ok(())
    }

    /// Keywords used for matching and windowing.
    ///
    /// Explicit keywords win over the split query. Blank entries are
    /// dropped, case-insensitive duplicates keep their first spelling, and
    /// at most [`MAX_KEYWORDS`] are kept.
    pub fn effective_keywords(&self) -> Vec<String> {
        let supplied: Vec<&str> = self
            .keywords
            .iter()
            .flatten()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();
        let candidates: Vec<&str> = if supplied.is_empty() {
            self.query.split_whitespace().collect()
        } else {
            supplied
        };

        let mut seen = HashSet::new();
        let mut keywords: Vec<String> = candidates
            .into_iter()
            .filter(|k| seen.insert(fold_str(k, Matching::CaseInsensitive)))
            .map(str::to_string)
            .collect();

        if keywords.len() > MAX_KEYWORDS {
            tracing::info!(
                supplied = keywords.len(),
                kept = MAX_KEYWORDS,
                "keyword list capped"
            );
            keywords.truncate(MAX_KEYWORDS);
        }
        keywords
    }
}

/// The serving layer's handle on the corpus, the embedder and telemetry.
///
/// Either collaborator may be missing; operations that need one fail with
/// [`Error::IndexUnready`].
#[derive(Default)]
pub struct SearchContext {
    corpus: Option<Corpus>,
    embedder: Option<Box<dyn Embedder>>,
    stats: SearchStats,
}

impl SearchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_corpus(corpus: Corpus, stats: SearchStats) -> Self {
        Self {
            corpus: Some(corpus),
            embedder: None,
            stats,
        }
    }

    pub fn with_embedder(mut self, embedder: Box<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn corpus(&self) -> Result<&Corpus> {
        self.corpus.as_ref().ok_or(Error::IndexUnready("corpus"))
    }

    pub fn embedder(&self) -> Result<&dyn Embedder> {
        self.embedder
            .as_deref()
            .ok_or(Error::IndexUnready("embedder"))
    }

    pub fn search_stats(&self) -> &SearchStats {
        &self.stats
    }

    pub fn stats(&self) -> Result<CorpusStats> {
        Ok(self.corpus()?.stats(&self.stats))
    }

    /// Encode `text`, checking the result fits the corpus index.
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let corpus = self.corpus()?;
        let embedding = self.embedder()?.encode(text)?;
        if embedding.len() != corpus.dimension() {
            return Err(Error::DimensionMismatch {
                expected: corpus.dimension(),
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }

    pub fn vector_search(
        &mut self,
        query: &str,
        k: usize,
        min_similarity: f32,
    ) -> Result<Vec<VectorMatch>> {
        let embedding = self.encode(query)?;
        let corpus = self.corpus()?;
        let matches =
            providers::vector_search(corpus, &embedding, k, min_similarity)?;
        self.stats.record();
        Ok(matches)
    }

    pub fn keyword_search(
        &self,
        keywords: &[String],
        policy: MatchPolicy,
        k: usize,
    ) -> Result<Vec<KeywordMatch>> {
        let corpus = self.corpus()?;
        Ok(providers::keyword_search(corpus.documents(), keywords, policy, k))
    }

    /// Fuse `2k` vector candidates with every keyword candidate.
    pub fn hybrid_search(
        &mut self,
        query: &str,
        keywords: &[String],
        k: usize,
        vector_weight: f32,
        min_similarity: f32,
        policy: MatchPolicy,
    ) -> Result<Vec<HybridMatch>> {
        let fetch = k.saturating_mul(2);
        let vector = self.vector_search(query, fetch, min_similarity)?;
        let all = self.corpus()?.len();
        let keyword = self.keyword_search(keywords, policy, all)?;
        tracing::debug!(
            vector = vector.len(),
            keyword = keyword.len(),
            "fusing candidates"
        );

        let mut fused = fusion::fuse(vector, keyword, vector_weight);
        fused.truncate(k);
        Ok(fused)
    }

    pub fn get_document(&self, vector_id: u64) -> Result<&IndexedDocument> {
        self.corpus()?.get(vector_id).ok_or_else(|| Error::NotFound {
            kind: "document",
            name: vector_id.to_string(),
        })
    }

    /// Passages nearest to passage `vector_id`, excluding itself.
    ///
    /// Uses the stored index row, so no embedder is needed.
    pub fn similar_documents(
        &mut self,
        vector_id: u64,
        k: usize,
    ) -> Result<Vec<VectorMatch>> {
        if !(1..=MAX_RESULTS).contains(&k) {
            return Err(Error::out_of_range("count", k, "1..=100"));
        }
        self.get_document(vector_id)?;
        let corpus = self.corpus()?;
        let row = corpus
            .index()
            .vector(vector_id)
            .map(<[f32]>::to_vec)
            .ok_or_else(|| Error::NotFound {
                kind: "index row",
                name: vector_id.to_string(),
            })?;

        let fetch = k.saturating_add(1);
        let mut matches =
            providers::vector_search(corpus, &row, fetch, f32::MIN)?;
        matches.retain(|m| m.vector_id != vector_id);
        matches.truncate(k);
        self.stats.record();
        Ok(matches)
    }
}

/// One ranked, excerpted result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub rank: usize,
    pub score: f32,
    #[serde(flatten)]
    pub hit: Hit,
    /// Keyword-focused excerpt; a plain prefix in vector mode.
    pub excerpt: String,
    /// Percentage of keywords present in the excerpt. Absent in vector mode.
    pub keyword_coverage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub mode: SearchMode,
    pub keywords: Vec<String>,
    pub requested_results: usize,
    pub total_results: usize,
    /// Candidates dropped by the document filter.
    pub filtered_out: usize,
    pub results: Vec<SearchResult>,
    pub search_time_ms: f64,
}

/// Execute the full search pipeline.
///
/// 1. Validate the request
/// 2. Fetch over-sized candidate sets for the mode (fusing in hybrid mode)
/// 3. Apply the document filter
/// 4. Limit to `max_results`
/// 5. Build a keyword window and coverage score per result
pub fn execute_search(
    ctx: &mut SearchContext,
    request: &SearchRequest,
) -> Result<SearchResponse> {
    request.validate()?;
    let started = Instant::now();
    let keywords = request.effective_keywords();
    let fetch = request.mode.candidate_count(request.max_results);

    tracing::info!(
        mode = %request.mode,
        filter = ?request.filter,
        granularity = %request.granularity,
        radius = request.radius,
        "search"
    );

    let hits: Vec<Hit> = match request.mode {
        SearchMode::Vector => ctx
            .vector_search(&request.query, fetch, request.min_similarity)?
            .into_iter()
            .map(Hit::Vector)
            .collect(),
        SearchMode::Keyword => ctx
            .keyword_search(&keywords, request.match_policy, fetch)?
            .into_iter()
            .map(Hit::Keyword)
            .collect(),
        SearchMode::Hybrid => ctx
            .hybrid_search(
                &request.query,
                &keywords,
                fetch,
                request.vector_weight,
                request.min_similarity,
                request.match_policy,
            )?
            .into_iter()
            .map(Hit::Hybrid)
            .collect(),
    };

    let candidates = hits.len();
    let mut hits: Vec<Hit> = match &request.filter {
        Some(filter) => hits
            .into_iter()
            .filter(|h| filter.matches(h.metadata()))
            .collect(),
        None => hits,
    };
    let filtered_out = candidates - hits.len();
    if request.filter.is_some() {
        tracing::info!(
            before = candidates,
            after = hits.len(),
            "applied filter"
        );
    }
    hits.truncate(request.max_results);

    let results: Vec<SearchResult> = hits
        .into_par_iter()
        .enumerate()
        .map(|(i, hit)| excerpt_result(i + 1, hit, request, &keywords))
        .collect();

    for r in &results {
        tracing::debug!(
            rank = r.rank,
            vector_id = r.hit.vector_id(),
            coverage = r.keyword_coverage,
            "result"
        );
    }

    if results.len() < request.max_results {
        tracing::debug!(
            requested = request.max_results,
            returned = results.len(),
            "fewer results than requested"
        );
    }

    Ok(SearchResponse {
        query: request.query.clone(),
        mode: request.mode,
        keywords,
        requested_results: request.max_results,
        total_results: results.len(),
        filtered_out,
        results,
        search_time_ms: started.elapsed().as_secs_f64() * 1000.0,
    })
}

fn excerpt_result(
    rank: usize,
    hit: Hit,
    request: &SearchRequest,
    keywords: &[String],
) -> SearchResult {
    let (excerpt, keyword_coverage) = match request.mode {
        SearchMode::Vector => (fallback_excerpt(hit.text()), None),
        SearchMode::Keyword | SearchMode::Hybrid => {
            let extracted = window::extract(
                hit.text(),
                keywords,
                request.granularity,
                request.radius,
            );
            let scored = score_extraction(hit.text(), &extracted, keywords);
            (scored.excerpt, Some(scored.coverage))
        }
    };

    SearchResult {
        rank,
        score: hit.score(),
        hit,
        excerpt,
        keyword_coverage,
    }
}

/// `key=value` pairs of user metadata, without bookkeeping keys.
pub fn metadata_summary(metadata: &Metadata) -> String {
    metadata
        .iter()
        .filter(|(k, _)| ![VECTOR_ID_KEY, ADDED_AT_KEY].contains(&k.as_str()))
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => format!("{k}={s}"),
            other => format!("{k}={other}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Format results for human-readable terminal output.
pub fn format_human(response: &SearchResponse) {
    if response.results.is_empty() {
        println!("No results found.");
        return;
    }

    for r in &response.results {
        let coverage = r
            .keyword_coverage
            .map(|c| format!(" coverage {c:.1}%"))
            .unwrap_or_default();
        println!(
            "{:>3}. [{:.3}] #{}{}",
            r.rank,
            r.score,
            r.hit.vector_id(),
            coverage
        );
        let summary = metadata_summary(r.hit.metadata());
        if !summary.is_empty() {
            println!("     {summary}");
        }
        if !r.hit.matched_keywords().is_empty() {
            println!("     matched: {}", r.hit.matched_keywords().join(", "));
        }
        println!("     {}", r.excerpt);
    }
    println!(
        "\n{} of {} requested result(s) in {:.1} ms",
        response.total_results,
        response.requested_results,
        response.search_time_ms
    );
}

/// Format results as JSON output.
pub fn format_json(response: &SearchResponse) -> Result<()> {
    println!("{}", serde_json::to_string(response)?);
    Ok(())
}
