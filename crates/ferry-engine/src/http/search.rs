//! Elasticsearch/OpenSearch-compatible search client.

use serde::Deserialize;
use serde_json::{json, Value};

use ferry_types::error::MigrationError;
use ferry_types::event::BulkAction;

use super::{agent, classify, read_json, trim_base};
use crate::service::{BulkFailure, BulkResponse, SearchClient, SearchHit, SearchPage};

#[derive(Debug, Deserialize)]
struct ScrollResponse {
    #[serde(rename = "_scroll_id", default)]
    scroll_id: Option<String>,
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct BulkBody {
    #[serde(default)]
    items: Vec<serde_json::Map<String, Value>>,
}

impl From<ScrollResponse> for SearchPage {
    fn from(r: ScrollResponse) -> Self {
        Self {
            scroll_id: r.scroll_id,
            hits: r.hits.hits,
        }
    }
}

/// Search cluster reached over its REST API.
pub struct HttpSearchClient {
    base: String,
    agent: ureq::Agent,
}

impl HttpSearchClient {
    #[must_use]
    pub fn new(url: &str, timeout_secs: u64) -> Self {
        Self {
            base: trim_base(url),
            agent: agent(timeout_secs),
        }
    }

    fn post_json(&self, operation: &str, path: &str, body: &Value) -> Result<ureq::Response, MigrationError> {
        self.agent
            .post(&format!("{}{path}", self.base))
            .send_json(body)
            .map_err(|e| classify(operation, e))
    }
}

/// Newline-delimited bulk body: an action line then a source line per
/// action, with a trailing newline.
pub(crate) fn bulk_body(actions: &[BulkAction]) -> Result<String, MigrationError> {
    let mut body = String::new();
    for action in actions {
        let meta = json!({ action.op_type.as_str(): { "_index": action.index, "_id": action.id } });
        for line in [&meta, &action.source] {
            let encoded = serde_json::to_string(line)
                .map_err(|e| MigrationError::internal("BULK_ENCODE", e.to_string()))?;
            body.push_str(&encoded);
            body.push('\n');
        }
    }
    Ok(body)
}

/// Tally per-item bulk results. A 409 on a create is a conflict, not a
/// failure.
fn tally(items: &[serde_json::Map<String, Value>]) -> BulkResponse {
    let mut response = BulkResponse::default();
    for item in items {
        let Some(result) = item.values().next() else {
            continue;
        };
        let status = result
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(0);
        match status {
            200 | 201 => response.created += 1,
            409 => response.conflicts += 1,
            _ => response.failed.push(BulkFailure {
                id: result
                    .get("_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                status,
                reason: result
                    .pointer("/error/reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            }),
        }
    }
    response
}

impl SearchClient for HttpSearchClient {
    fn search(
        &self,
        index: &str,
        query: &Value,
        page_size: u32,
        keep_alive: &str,
    ) -> Result<SearchPage, MigrationError> {
        let response = self
            .agent
            .post(&format!("{}/{index}/_search", self.base))
            .query("scroll", keep_alive)
            .send_json(json!({ "size": page_size, "query": query }))
            .map_err(|e| classify("search", e))?;
        let page: ScrollResponse = read_json("search", response)?;
        Ok(page.into())
    }

    fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<SearchPage, MigrationError> {
        let response = self.post_json(
            "scroll",
            "/_search/scroll",
            &json!({ "scroll": keep_alive, "scroll_id": scroll_id }),
        )?;
        let page: ScrollResponse = read_json("scroll", response)?;
        Ok(page.into())
    }

    fn clear_scroll(&self, scroll_id: &str) -> Result<(), MigrationError> {
        self.agent
            .delete(&format!("{}/_search/scroll", self.base))
            .send_json(json!({ "scroll_id": scroll_id }))
            .map_err(|e| classify("clear_scroll", e))?;
        Ok(())
    }

    fn count(&self, index: &str, query: &Value) -> Result<u64, MigrationError> {
        let response = self.post_json("count", &format!("/{index}/_count"), &json!({ "query": query }))?;
        let count: CountResponse = read_json("count", response)?;
        Ok(count.count)
    }

    fn bulk(&self, actions: &[BulkAction]) -> Result<BulkResponse, MigrationError> {
        if actions.is_empty() {
            return Ok(BulkResponse::default());
        }
        let body = bulk_body(actions)?;
        let response = self
            .agent
            .post(&format!("{}/_bulk", self.base))
            .set("Content-Type", "application/x-ndjson")
            .send_string(&body)
            .map_err(|e| classify("bulk", e))?;
        let parsed: BulkBody = read_json("bulk", response)?;
        let tallied = tally(&parsed.items);
        if !tallied.failed.is_empty() {
            tracing::warn!(failed = tallied.failed.len(), "Bulk request had rejected items");
        }
        Ok(tallied)
    }
}
