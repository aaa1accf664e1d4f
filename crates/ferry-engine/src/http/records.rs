//! REST client for the record-management service.

use serde_json::{json, Map, Value};

use ferry_types::entry::LegacyId;
use ferry_types::error::MigrationError;

use super::{agent, classify, read_json, trim_base};
use crate::service::{
    CreatedRecord, EntityVersions, NewRecord, OwnerHint, PlaceholderIdentity, RecordService,
    VersionInfo,
};

const VERSIONS_PAGE_SIZE: &str = "100";

/// Record-management service reached over its REST API with a bearer token.
pub struct HttpRecordService {
    base: String,
    token: Option<String>,
    legacy_id_field: String,
    agent: ureq::Agent,
}

impl HttpRecordService {
    #[must_use]
    pub fn new(url: &str, token: Option<String>, legacy_id_field: &str, timeout_secs: u64) -> Self {
        Self {
            base: trim_base(url),
            token,
            legacy_id_field: legacy_id_field.to_string(),
            agent: agent(timeout_secs),
        }
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let mut request = self
            .agent
            .request(method, &format!("{}{path}", self.base))
            .set("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        request
    }

    fn search_hits(&self, operation: &str, path: &str, q: &str) -> Result<Vec<Value>, MigrationError> {
        let response = self
            .request("GET", path)
            .query("q", q)
            .call()
            .map_err(|e| classify(operation, e))?;
        let body: Value = read_json(operation, response)?;
        Ok(hits(&body))
    }
}

fn hits(body: &Value) -> Vec<Value> {
    body.pointer("/hits/hits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// Parent id and version id of a record document.
fn created_record(operation: &str, doc: &Value) -> Result<CreatedRecord, MigrationError> {
    let version = str_at(doc, "/id").ok_or_else(|| {
        MigrationError::data("BAD_RESPONSE", format!("{operation}: record without id"))
    })?;
    Ok(CreatedRecord {
        id: str_at(doc, "/parent/id").unwrap_or(version).to_string(),
        version: version.to_string(),
    })
}

/// User ids come back as strings or integers depending on the deployment.
fn user_id(user: &Value) -> Option<String> {
    match user.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Lucene-quoted term.
fn quoted(term: &str) -> String {
    format!("\"{}\"", term.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Request body for a new draft.
fn draft_body(record: &NewRecord, legacy_id_field: &str) -> Value {
    let mut custom_fields = Map::new();
    custom_fields.insert(legacy_id_field.to_string(), json!(record.legacy_id.as_str()));
    if let Some(parent) = &record.parent_legacy_id {
        custom_fields.insert("legacy_parent_id".into(), json!(parent.as_str()));
    }
    let mut body = json!({
        "metadata": record.metadata,
        "custom_fields": custom_fields,
        "access": { "record": "public", "files": "public" },
        "files": { "enabled": false },
    });
    if let Some(owner) = &record.owner_id {
        body["parent"] = json!({ "access": { "owned_by": { "user": owner } } });
    }
    if let Some(reply_to) = &record.reply_to_id {
        body["reply_to"] = json!(reply_to);
    }
    body
}

/// Versions listing to [`EntityVersions`]. The version index stands in for
/// the legacy file version, since versions are created in legacy order.
fn entity_versions(parent_id: &str, body: &Value) -> Result<EntityVersions, MigrationError> {
    let mut latest = None;
    let mut versions = Vec::new();
    for hit in hits(body) {
        let Some(version_id) = str_at(&hit, "/id") else {
            continue;
        };
        if hit.pointer("/versions/is_latest").and_then(Value::as_bool) == Some(true) {
            latest = Some(version_id.to_string());
        }
        let files = hit
            .pointer("/files/entries")
            .and_then(Value::as_object)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        versions.push(VersionInfo {
            version_id: version_id.to_string(),
            legacy_version: hit
                .pointer("/versions/index")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok()),
            files,
        });
    }
    let latest = latest.or_else(|| versions.last().map(|v| v.version_id.clone())).ok_or_else(|| {
        MigrationError::data("NOT_FOUND", format!("record '{parent_id}' has no published versions"))
    })?;
    Ok(EntityVersions {
        parent_id: parent_id.to_string(),
        latest,
        versions,
    })
}

impl RecordService for HttpRecordService {
    fn find_by_legacy_id(
        &self,
        collection: &str,
        legacy_id: &LegacyId,
    ) -> Result<Option<CreatedRecord>, MigrationError> {
        let q = format!(
            "custom_fields.{}:{}",
            self.legacy_id_field,
            quoted(legacy_id.as_str())
        );
        let found = self.search_hits("find_by_legacy_id", "/api/records", &q)?;
        if found.len() > 1 {
            tracing::warn!(
                collection,
                legacy_id = legacy_id.as_str(),
                matches = found.len(),
                "Legacy id bound to several records, using the first"
            );
        }
        found
            .first()
            .map(|doc| created_record("find_by_legacy_id", doc))
            .transpose()
    }

    fn resolve_owner(&self, hint: &OwnerHint) -> Result<Option<String>, MigrationError> {
        let mut queries = Vec::new();
        if let Some(email) = &hint.email {
            queries.push(format!("email:{}", quoted(&email.to_lowercase())));
        }
        if let Some(id) = &hint.legacy_id {
            queries.push(format!("username:{}", quoted(&format!("legacy-user-{id}"))));
        }
        for q in queries {
            let users = self.search_hits("resolve_owner", "/api/users", &q)?;
            if let Some(id) = users.first().and_then(user_id) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    fn create_owner(&self, placeholder: &PlaceholderIdentity) -> Result<String, MigrationError> {
        let response = self
            .request("POST", "/api/users")
            .send_json(placeholder)
            .map_err(|e| match classify("create_owner", e) {
                err if err.retryable => err,
                err => MigrationError::identity(err.code, err.message),
            })?;
        let body: Value = read_json("create_owner", response)?;
        user_id(&body).ok_or_else(|| {
            MigrationError::identity(
                "BAD_RESPONSE",
                format!("user '{}' created without id", placeholder.username),
            )
        })
    }

    fn create_and_publish(&self, record: &NewRecord) -> Result<CreatedRecord, MigrationError> {
        let draft_response = self
            .request("POST", "/api/records")
            .send_json(draft_body(record, &self.legacy_id_field))
            .map_err(|e| classify("create_draft", e))?;
        let draft: Value = read_json("create_draft", draft_response)?;
        let draft_id = created_record("create_draft", &draft)?.version;

        let published = self
            .request("POST", &format!("/api/records/{draft_id}/draft/actions/publish"))
            .call()
            .map_err(|e| classify("publish", e))?;
        let published: Value = read_json("publish", published)?;
        created_record("publish", &published)
    }

    fn versions(&self, parent_id: &str) -> Result<EntityVersions, MigrationError> {
        let response = self
            .request("GET", &format!("/api/records/{parent_id}/versions"))
            .query("size", VERSIONS_PAGE_SIZE)
            .call()
            .map_err(|e| classify("versions", e))?;
        let body: Value = read_json("versions", response)?;
        entity_versions(parent_id, &body)
    }
}
