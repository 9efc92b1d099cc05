//! Tools exposed to the reasoning loop.
//!
//! Every tool implements [`Tool`] and is reached through a [`ToolRegistry`].
//! Built-ins:
//!
//! | Tool | Params | Content |
//! |------|--------|---------|
//! | `retrieve` | `query`, `tag` | rendered matches; artifact = documents |
//! | `sql_db_query` | `query` | result table or block message |
//! | `sql_db_list_tables` | (none) | comma-separated table names |
//! | `sql_db_schema` | `table_names` | DDL and sample rows |
//!
//! [`ToolRegistry::call`] never fails: unknown tools, bad parameters, and
//! execution errors all come back as `"Error: …"` content, so the loop can
//! read them and try again.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::index::SearchIndex;
use crate::models::SourceType;
use crate::retrieve::{retrieve, DEFAULT_TOP_K};
use crate::sql::{GuardedSql, SqlEngine};

/// What a tool hands back to the loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub content: String,
    /// Structured payload alongside the text, if the tool has one.
    pub artifact: Option<Value>,
}

impl ToolOutput {
    /// Plain text output with no artifact.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            artifact: None,
        }
    }

    /// In-band error: the content is prefixed with `"Error: "`.
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::text(format!("Error: {}", message))
    }

    pub fn is_error(&self) -> bool {
        self.content.starts_with("Error: ")
    }
}

/// Tool description served by `GET /tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier, also the route path (`POST /tools/{name}`).
    fn name(&self) -> &str;

    /// One-line description for tool selection.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute with parameters already checked against the schema.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput>;

    /// Name, description, and schema bundled for listing.
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// What tools can reach while executing. Either half may be absent, e.g.
/// before ingestion or when the data directory has no tabular files.
#[derive(Clone)]
pub struct ToolContext {
    index: Option<Arc<dyn SearchIndex>>,
    sql: Option<Arc<dyn SqlEngine>>,
    top_k: usize,
}

impl ToolContext {
    pub fn new() -> Self {
        Self {
            index: None,
            sql: None,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Attach the search index used by `retrieve`.
    pub fn with_index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Attach a database. Queries always go through [`GuardedSql`].
    pub fn with_sql<E: SqlEngine + 'static>(mut self, engine: E) -> Self {
        self.sql = Some(Arc::new(GuardedSql::new(engine)));
        self
    }

    /// Result count for `retrieve`; clamped to at least 1.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// The attached index, or an error telling the caller to ingest first.
    pub fn index(&self) -> Result<&dyn SearchIndex> {
        match &self.index {
            Some(index) => Ok(index.as_ref()),
            None => bail!("the index is not ready; run ingestion first"),
        }
    }

    /// The guarded database, or an error when no tables were loaded.
    pub fn sql(&self) -> Result<&dyn SqlEngine> {
        match &self.sql {
            Some(sql) => Ok(sql.as_ref()),
            None => bail!("no tables have been loaded"),
        }
    }

    pub fn has_sql(&self) -> bool {
        self.sql.is_some()
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in Tools
// ═══════════════════════════════════════════════════════════════════════

/// Similarity search restricted to one [`SourceType`].
///
/// The content is the rendered `Source: …\nContent: …` blocks and the
/// artifact is the matching documents as JSON objects.
pub struct RetrieveTool;

#[async_trait]
impl Tool for RetrieveTool {
    fn name(&self) -> &str {
        "retrieve"
    }

    fn description(&self) -> &str {
        "Semantic search over indexed documents of one type: text_chunk for document text, \
         image_text for text read from images, table_summary for table descriptions"
    }

    fn parameters_schema(&self) -> Value {
        let tags: Vec<&str> = SourceType::ALL.iter().map(|t| t.as_str()).collect();
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural-language search query" },
                "tag": { "type": "string", "enum": tags, "description": "Document type to search" }
            },
            "required": ["query", "tag"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let query = params["query"].as_str().unwrap_or("");
        let tag: SourceType = params["tag"].as_str().unwrap_or("").parse()?;

        let result = retrieve(ctx.index()?, query, tag, ctx.top_k()).await?;
        let documents: Vec<Value> = result.documents.iter().map(|d| d.to_json()).collect();

        Ok(ToolOutput {
            content: result.summary,
            artifact: Some(Value::Array(documents)),
        })
    }
}

/// Read-only query against the materialized tables. Unsafe statements come
/// back as the block message rather than an error.
pub struct SqlQueryTool;

#[async_trait]
impl Tool for SqlQueryTool {
    fn name(&self) -> &str {
        "sql_db_query"
    }

    fn description(&self) -> &str {
        "Run a read-only SQL query (SELECT or PRAGMA) against the loaded tables and return the result"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "SQL query" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let query = params["query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            bail!("query must not be empty");
        }
        Ok(ToolOutput::text(ctx.sql()?.run(query).await?))
    }
}

/// Comma-separated table names; empty when no tables were loaded.
pub struct SqlListTablesTool;

#[async_trait]
impl Tool for SqlListTablesTool {
    fn name(&self) -> &str {
        "sql_db_list_tables"
    }

    fn description(&self) -> &str {
        "List the tables available to sql_db_query"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        if !ctx.has_sql() {
            return Ok(ToolOutput::text(""));
        }
        Ok(ToolOutput::text(ctx.sql()?.list_tables().await?.join(", ")))
    }
}

/// DDL and sample rows for each requested table. An unknown table fails the
/// whole call.
pub struct SqlSchemaTool;

#[async_trait]
impl Tool for SqlSchemaTool {
    fn name(&self) -> &str {
        "sql_db_schema"
    }

    fn description(&self) -> &str {
        "Show the schema and sample rows of the given tables"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "table_names": {
                    "type": "string",
                    "description": "Comma-separated table names, e.g. 'sales, customers'"
                }
            },
            "required": ["table_names"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let names: Vec<&str> = params["table_names"]
            .as_str()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if names.is_empty() {
            bail!("table_names must name at least one table");
        }

        let sql = ctx.sql()?;
        let mut sections = Vec::with_capacity(names.len());
        for name in names {
            sections.push(sql.describe(name).await?);
        }
        Ok(ToolOutput::text(sections.join("\n\n")))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Ordered set of tools, looked up by name.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// `retrieve`, `sql_db_query`, `sql_db_list_tables`, `sql_db_schema`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(RetrieveTool));
        registry.register(Box::new(SqlQueryTool));
        registry.register(Box::new(SqlListTablesTool));
        registry.register(Box::new(SqlSchemaTool));
        registry
    }

    /// Register a tool. A tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Descriptions of every tool, in registration order.
    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools.iter().map(|t| t.info()).collect()
    }

    /// Validate and run a tool. Failures become `"Error: …"` content.
    pub async fn call(&self, name: &str, params: Value, ctx: &ToolContext) -> ToolOutput {
        let Some(tool) = self.find(name) else {
            return ToolOutput::error(format!("unknown tool '{}'", name));
        };

        let params = match validate_params(&tool.parameters_schema(), &params) {
            Ok(p) => p,
            Err(e) => return ToolOutput::error(format!("invalid parameters for {}: {}", name, e)),
        };

        match tool.execute(params, ctx).await {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(tool = name, error = %format!("{:#}", e), "tool call failed");
                ToolOutput::error(format!("{:#}", e))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check `params` against a tool's JSON Schema: required fields, JSON
/// types, and enums. Unknown fields pass through untouched.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => bail!("parameters must be a JSON object, got {}", json_type_name(other)),
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<String> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    for req_field in &required {
        if !params_obj.contains_key(req_field) {
            bail!("missing required parameter: {}", req_field);
        }
    }

    for (prop_name, prop_schema) in &properties {
        if let Some(value) = params_obj.get(prop_name) {
            if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
                let type_ok = match expected_type {
                    "string" => value.is_string(),
                    "integer" => value.is_i64() || value.is_u64(),
                    "number" => value.is_number(),
                    "boolean" => value.is_boolean(),
                    "array" => value.is_array(),
                    "object" => value.is_object(),
                    _ => true,
                };
                if !type_ok {
                    bail!(
                        "parameter '{}' must be of type '{}', got {}",
                        prop_name,
                        expected_type,
                        json_type_name(value)
                    );
                }
            }

            if let Some(enum_values) = prop_schema.get("enum").and_then(|e| e.as_array()) {
                if !enum_values.contains(value) {
                    let allowed: Vec<String> = enum_values.iter().map(|v| v.to_string()).collect();
                    bail!(
                        "parameter '{}' must be one of [{}], got {}",
                        prop_name,
                        allowed.join(", "),
                        value
                    );
                }
            }
        }
    }

    Ok(Value::Object(params_obj))
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_checks_required_types_and_enums() {
        let schema = RetrieveTool.parameters_schema();

        let ok = validate_params(&schema, &json!({ "query": "q", "tag": "image_text" })).unwrap();
        assert_eq!(ok["tag"], "image_text");

        let err = validate_params(&schema, &json!({ "query": "q" })).unwrap_err();
        assert!(err.to_string().contains("missing required parameter: tag"));

        let err = validate_params(&schema, &json!({ "query": 5, "tag": "text_chunk" })).unwrap_err();
        assert!(err.to_string().contains("must be of type 'string'"));

        let err = validate_params(&schema, &json!({ "query": "q", "tag": "pdf" })).unwrap_err();
        assert!(err.to_string().contains("must be one of"));

        assert!(validate_params(&schema, &json!("q")).is_err());
    }

    #[test]
    fn validate_accepts_null_for_parameterless_tools() {
        let schema = SqlListTablesTool.parameters_schema();
        assert_eq!(validate_params(&schema, &Value::Null).unwrap(), json!({}));
    }

    #[tokio::test]
    async fn registry_call_never_fails() {
        let registry = ToolRegistry::with_builtins();
        let ctx = ToolContext::new();

        let out = registry.call("nope", json!({}), &ctx).await;
        assert_eq!(out.content, "Error: unknown tool 'nope'");

        let out = registry.call("retrieve", json!({ "query": "x" }), &ctx).await;
        assert!(out.is_error());
        assert!(out.content.contains("tag"));

        let out = registry
            .call("retrieve", json!({ "query": "x", "tag": "text_chunk" }), &ctx)
            .await;
        assert!(out.content.contains("index is not ready"));

        let out = registry.call("sql_db_query", json!({ "query": "SELECT 1" }), &ctx).await;
        assert_eq!(out.content, "Error: no tables have been loaded");

        let out = registry.call("sql_db_list_tables", json!({}), &ctx).await;
        assert_eq!(out, ToolOutput::text(""));
    }

    #[test]
    fn builtin_names() {
        let names: Vec<String> = ToolRegistry::with_builtins()
            .list()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(
            names,
            vec!["retrieve", "sql_db_query", "sql_db_list_tables", "sql_db_schema"]
        );
    }
}
