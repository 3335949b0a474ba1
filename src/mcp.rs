use std::sync::Arc;

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
    catalog::CatalogEntry,
    error,
    knowledge::{
        DEFAULT_LIST_LIMIT,
        KnowledgeBase,
        LinkInput,
        ListQuery,
        SourceInput,
        SummaryOutcome,
        UpsertRequest,
    },
    search::{self, DEFAULT_SEARCH_LIMIT, Filters, SearchHit, SearchQuery},
};

#[derive(Clone)]
pub struct KnowledgeMcpServer {
    kb: Arc<KnowledgeBase>,
    tool_router: ToolRouter<Self>,
}

impl KnowledgeMcpServer {
    pub fn new(kb: KnowledgeBase) -> Self {
        Self {
            kb: Arc::new(kb),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl KnowledgeMcpServer {
    #[tool(
        name = "search",
        description = "Search knowledge atoms by title and tags, optionally also by summary and details. Results are ranked by relevance, status and confidence."
    )]
    pub async fn search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let filters = parse_filters(&params.filters)?;

        let query = SearchQuery {
            tokens: search::tokenize(&params.query),
            filters,
            limit: params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
            include_content: params.include_content.unwrap_or(false),
        };
        let results = self
            .kb
            .search(&query)
            .map_err(|e| mcp_error("search failed", e))?;

        let summary = format_search_summary(&results, &params.query);
        let structured = serde_json::to_value(SearchResponse {
            query: params.query,
            result_count: results.len(),
            results,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        Ok(tool_result(summary, structured))
    }

    #[tool(
        name = "upsert",
        description = "Create or update a knowledge atom. Pass an existing id to update it; omit id to create a new atom with the next free ID."
    )]
    pub async fn upsert(
        &self,
        params: Parameters<UpsertParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let atom = self
            .kb
            .upsert(params.into())
            .map_err(|e| tool_error("upsert failed", e))?;

        let text = format!("Saved {}: {}", atom.id, atom.title);
        Ok(tool_result(text, to_json(&atom)?))
    }

    #[tool(
        name = "list_atoms",
        description = "List knowledge atoms in catalog order, filtered by type, tag, status or language."
    )]
    pub async fn list_atoms(
        &self,
        params: Parameters<ListParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let query = ListQuery {
            filters: parse_filters(&params.filters)?,
            limit: params.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        };
        let atoms = self
            .kb
            .list(&query)
            .map_err(|e| mcp_error("list failed", e))?;

        let text = format_entry_list(&atoms);
        let structured = json!({ "count": atoms.len(), "atoms": atoms });
        Ok(tool_result(text, structured))
    }

    #[tool(name = "get_atom", description = "Get the full content of one atom by ID (e.g. K-000001).")]
    pub async fn get_atom(
        &self,
        params: Parameters<IdParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let id = params.0.id;
        let atom = self
            .kb
            .get(&id)
            .map_err(|e| mcp_error("failed to load atom", e))?;

        match atom {
            Some(atom) => {
                let text = format!("{}: {}\n{}", atom.id, atom.title, atom.content.summary);
                Ok(tool_result(text, to_json(&atom)?))
            }
            None => Ok(CallToolResult::success(vec![Content::text(format!(
                "Atom {id} not found"
            ))])),
        }
    }

    #[tool(
        name = "delete_atom",
        description = "Deprecate an atom. It stays stored and searchable with status deprecated."
    )]
    pub async fn delete_atom(
        &self,
        params: Parameters<IdParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let outcome = self
            .kb
            .deprecate(&params.0.id)
            .map_err(|e| mcp_error("deprecate failed", e))?;
        let text = outcome
            .message
            .clone()
            .or_else(|| outcome.error.clone())
            .unwrap_or_default();
        Ok(tool_result(text, to_json(&outcome)?))
    }

    #[tool(
        name = "purge_atom",
        description = "Permanently delete an atom and its catalog entry. This cannot be undone; prefer delete_atom."
    )]
    pub async fn purge_atom(
        &self,
        params: Parameters<IdParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let outcome = self
            .kb
            .purge(&params.0.id)
            .map_err(|e| mcp_error("purge failed", e))?;
        let text = outcome
            .message
            .clone()
            .or_else(|| outcome.error.clone())
            .unwrap_or_default();
        Ok(tool_result(text, to_json(&outcome)?))
    }

    #[tool(name = "list_all_ids", description = "List the IDs of every stored atom.")]
    pub async fn list_all_ids(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let ids = self
            .kb
            .list_ids()
            .map_err(|e| mcp_error("failed to list ids", e))?;
        let text = format!("{} atom(s): {}", ids.count, ids.ids.join(", "));
        Ok(tool_result(text, to_json(&ids)?))
    }

    #[tool(
        name = "export_all",
        description = "Export every catalogued atom as one JSON document."
    )]
    pub async fn export_all(
        &self,
        params: Parameters<ExportParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        if let Some(format) = params.0.format
            && format != "json"
        {
            return Err(rmcp::ErrorData::invalid_params(
                format!("unsupported export format: {format}"),
                None,
            ));
        }
        let report = self
            .kb
            .export_all()
            .map_err(|e| mcp_error("export failed", e))?;
        let text = format!("Exported {} atom(s)", report.result.count);
        Ok(tool_result(text, to_json(&report)?))
    }

    #[tool(
        name = "rebuild_index",
        description = "Rebuild the catalog from the atom files. Use this when the catalog is out of sync."
    )]
    pub async fn rebuild_index(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let report = self
            .kb
            .rebuild()
            .map_err(|e| mcp_error("rebuild failed", e))?;
        Ok(tool_result(report.result.message.clone(), to_json(&report)?))
    }

    #[tool(
        name = "get_summary",
        description = "Summarize the catalog grouped by \"type\", \"tag\" or \"language\"."
    )]
    pub async fn get_summary(
        &self,
        params: Parameters<SummaryParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let group_by = params.0.group_by.unwrap_or_else(|| "type".to_string());
        let outcome = self
            .kb
            .get_summary(&group_by)
            .map_err(|e| mcp_error("summary failed", e))?;

        let text = match &outcome {
            SummaryOutcome::Summary(summary) => {
                let mut lines = vec![format!(
                    "{} atom(s) by {}:",
                    summary.total_atoms, summary.group_by
                )];
                lines.extend(
                    summary
                        .groups
                        .iter()
                        .map(|(key, group)| format!("{key}: {}", group.count)),
                );
                lines.join("\n")
            }
            SummaryOutcome::Invalid { error } => error.clone(),
        };
        Ok(tool_result(text, to_json(&outcome)?))
    }

    #[tool(name = "get_next_id", description = "Get the ID the next new atom would receive.")]
    pub async fn get_next_id(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let next_id = self
            .kb
            .next_id()
            .map_err(|e| mcp_error("failed to compute next id", e))?;
        Ok(tool_result(next_id.clone(), json!({ "next_id": next_id })))
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for KnowledgeMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("knowledge-mcp", env!("CARGO_PKG_VERSION"))
                    .with_title("Knowledge catalog MCP"),
            )
            .with_instructions(
                "Project-specific knowledge atoms. Use search to find existing knowledge before adding more, upsert to create or update atoms, and get_atom for full details.",
            )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct FilterParams {
    /// Atom types: fact, decision, procedure, pattern, gotcha, glossary, snippet.
    pub types: Option<Vec<String>>,
    /// Match atoms carrying any of these tags.
    pub tags: Option<Vec<String>>,
    /// Status: active, draft or deprecated.
    pub status: Option<String>,
    /// Programming language.
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// Search query. Empty browses atoms by trust.
    #[serde(default)]
    pub query: String,
    #[serde(flatten)]
    pub filters: FilterParams,
    /// Maximum number of results (default: 10).
    pub limit: Option<usize>,
    /// Also search summaries and details. Slower but more thorough.
    pub include_content: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListParams {
    #[serde(flatten)]
    pub filters: FilterParams,
    /// Maximum number of results (default: 50).
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IdParams {
    /// Atom ID, e.g. K-000001.
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ContentParams {
    /// One or two sentence summary.
    pub summary: String,
    pub details: Option<String>,
    pub pitfalls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SourceParams {
    /// repo_path, ticket, url or conversation.
    pub kind: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LinkParams {
    /// depends_on, see_also or contradicts.
    pub rel: String,
    /// Target atom ID.
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpsertParams {
    /// Existing ID to update. Omit to create a new atom.
    pub id: Option<String>,
    /// Short descriptive title.
    pub title: String,
    /// fact, decision, procedure, pattern, gotcha, glossary or snippet.
    #[serde(rename = "type")]
    pub kind: String,
    /// active, draft or deprecated.
    pub status: String,
    /// high, medium or low.
    pub confidence: String,
    pub content: ContentParams,
    pub language: Option<String>,
    /// Keywords used by search.
    pub tags: Option<Vec<String>>,
    pub sources: Option<Vec<SourceParams>>,
    /// Related atoms.
    pub links: Option<Vec<LinkParams>>,
}

impl From<UpsertParams> for UpsertRequest {
    fn from(params: UpsertParams) -> Self {
        Self {
            id: params.id,
            title: params.title,
            kind: params.kind,
            status: params.status,
            confidence: params.confidence,
            summary: params.content.summary,
            details: params.content.details,
            pitfalls: params.content.pitfalls,
            language: params.language,
            tags: params.tags,
            sources: params.sources.map(|sources| {
                sources
                    .into_iter()
                    .map(|s| SourceInput {
                        kind: s.kind,
                        reference: s.reference,
                    })
                    .collect()
            }),
            links: params.links.map(|links| {
                links
                    .into_iter()
                    .map(|l| LinkInput { rel: l.rel, id: l.id })
                    .collect()
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExportParams {
    /// Export format. Only "json" is supported.
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SummaryParams {
    /// "type" (default), "tag" or "language".
    pub group_by: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    query: String,
    result_count: usize,
    results: Vec<SearchHit>,
}

fn parse_filters(params: &FilterParams) -> Result<Filters, rmcp::ErrorData> {
    Filters::parse(
        params.types.as_deref().unwrap_or_default(),
        params.tags.as_deref().unwrap_or_default(),
        params.status.as_deref(),
        params.language.as_deref(),
    )
    .map_err(|e| tool_error("invalid filter", e))
}

fn format_search_summary(results: &[SearchHit], query: &str) -> String {
    if results.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        results.len(),
        suffix
    ));

    for hit in results {
        lines.push(format!("{} {} [{}] {}", hit.id, hit.score, hit.kind, hit.title));
    }

    lines.join("\n")
}

fn format_entry_list(entries: &[CatalogEntry]) -> String {
    if entries.is_empty() {
        return "No atoms found".to_string();
    }
    entries
        .iter()
        .map(|e| format!("{} [{}] [{}] {}", e.id, e.kind, e.status, e.title))
        .collect::<Vec<_>>()
        .join("\n")
}

fn tool_result(text: String, structured: serde_json::Value) -> CallToolResult {
    let mut result = CallToolResult::success(vec![Content::text(text)]);
    result.structured_content = Some(structured);
    result
}

fn to_json(value: &impl Serialize) -> Result<serde_json::Value, rmcp::ErrorData> {
    serde_json::to_value(value).map_err(|e| mcp_error("failed to serialize result", e))
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

/// Map a library error, reporting bad input as `invalid_params`.
fn tool_error(message: &str, error: error::Error) -> rmcp::ErrorData {
    match error {
        error::Error::Validation(ref detail) => rmcp::ErrorData::invalid_params(
            detail.clone(),
            Some(json!({ "error": error.to_string() })),
        ),
        other => mcp_error(message, other),
    }
}

pub fn run_mcp(kb: KnowledgeBase) -> error::Result<()> {
    let server = KnowledgeMcpServer::new(kb);

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
