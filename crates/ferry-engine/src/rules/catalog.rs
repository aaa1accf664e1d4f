//! Built-in transform models for the legacy document collections.

use serde_json::{json, Map, Value};

use crate::rules::handlers::{
    fragment, non_empty_text, partial_date, push_language, push_object, push_text, set_date,
    set_nested, set_text, HandlerResult,
};
use crate::rules::model::{HandlerError, TransformModel};
use crate::rules::predicate::Predicate;
use crate::rules::registry::{ModelRegistry, RegistryError};

/// Output key holding owner identity hints for the loader.
pub const OWNER_KEY: &str = "owner";
/// Output key flagging content that needs manual import.
pub const MANUAL_IMPORT_KEY: &str = "_manual_import";
/// Output key holding the legacy id of the comment being replied to.
pub const REPLY_TO_KEY: &str = "reply_to";

/// Fields every legacy document carries that have no target counterpart.
const ADMIN_FIELDS: &[&str] = &[
    "001", "003", "005", "008", "035__9", "595__*", "916__*", "960__*", "961__*", "963__*",
    "970__*", "980__*", "999*",
];

/// Abstract base shared by all document models.
#[must_use]
pub fn document_base() -> TransformModel {
    TransformModel::builder("document")
        .handle("245__a", set_text("title"))
        .handle("246__a", push_object("additional_titles", "title", json!({"type": "alternative-title"})))
        .handle("100__a", push_object("creators", "name", json!({"role": "author"})))
        .handle("700__a", push_object("contributors", "name", json!({"role": "other"})))
        .handle("041__a", push_language)
        .handle("520__a", set_text("description"))
        .handle("650__a", push_object("subjects", "subject", json!({})))
        .handle("6531_a", push_object("subjects", "subject", json!({"scheme": "keyword"})))
        .handle("037__a", push_object("identifiers", "identifier", json!({"scheme": "report_number"})))
        .handle("260__c", set_date("publication_date"))
        .handle("269__c", set_date("publication_date"))
        .handle("260__b", set_text("publisher"))
        .handle("8564_u", push_file)
        .handle("8560_f", set_nested(OWNER_KEY, "email"))
        .handle("859__f", set_nested(OWNER_KEY, "email"))
        .ignore(ADMIN_FIELDS)
        .default_field("resource_type", json!("publication"))
        .default_field("access", json!({"record": "public", "files": "public"}))
        .default_field("creators", json!([]))
        .build()
}

/// Append a file reference, keyed by the last path segment.
fn push_file(value: &Value, _: &Map<String, Value>) -> HandlerResult {
    let uri = non_empty_text(value)?;
    let key = uri
        .rsplit('/')
        .next()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| HandlerError::new(format!("file url '{uri}' has no file name")))?;
    Ok(fragment("files", json!([{ "key": key, "uri": uri }])))
}

/// Video media on tape or other non-web storage cannot be fetched.
fn video_media(value: &Value, _: &Map<String, Value>) -> HandlerResult {
    let uri = non_empty_text(value)?;
    let lower = uri.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return push_file(value, &Map::new());
    }
    Ok(fragment(
        MANUAL_IMPORT_KEY,
        json!({
            "code": "OFFLINE_MEDIA",
            "reason": format!("video master '{uri}' is not reachable over http"),
            "priority": "high",
        }),
    ))
}

/// Thesis defence details: `502__a` degree, `502__b` university, `502__c` year.
fn thesis_info(field: &'static str) -> impl Fn(&Value, &Map<String, Value>) -> HandlerResult {
    move |value, _| {
        let text = non_empty_text(value)?;
        let text = if field == "date" {
            partial_date(&text)?
        } else {
            text
        };
        Ok(fragment("thesis", Value::Object(fragment(field, Value::String(text)))))
    }
}

/// Legacy comment author id becomes an owner hint.
fn comment_owner(value: &Value, _: &Map<String, Value>) -> HandlerResult {
    let id = non_empty_text(value)?;
    if id == "0" {
        return Err(HandlerError::new("anonymous comment author"));
    }
    Ok(fragment(OWNER_KEY, json!({ "legacy_id": id })))
}

fn reply_to(value: &Value, _: &Map<String, Value>) -> HandlerResult {
    let id = non_empty_text(value)?;
    if id == "0" {
        // top-level comment
        return Ok(Map::new());
    }
    Ok(fragment(REPLY_TO_KEY, Value::String(id)))
}

/// Registry with every built-in model, in selection priority order.
///
/// # Errors
///
/// Returns [`RegistryError`] if a built-in model is malformed.
pub fn builtin_registry() -> Result<ModelRegistry, RegistryError> {
    let base = document_base();
    let mut registry = ModelRegistry::new();

    registry.register(
        TransformModel::builder("thesis")
            .extends(&base)
            .when(Predicate::parse("THESIS")?)
            .handle("502__a", thesis_info("type"))
            .handle("502__b", thesis_info("university"))
            .handle("502__c", thesis_info("date"))
            .handle("701__a", push_object("contributors", "name", json!({"role": "supervisor"})))
            .default_field("resource_type", json!("publication-thesis"))
            .build(),
    )?;

    registry.register(
        TransformModel::builder("book")
            .extends(&base)
            .when(Predicate::parse("BOOK OR PROCEEDINGS")?)
            .handle("020__a", push_object("identifiers", "identifier", json!({"scheme": "isbn"})))
            .handle("250__a", set_text("edition"))
            .handle("490__a", push_text("series"))
            .default_field("resource_type", json!("publication-book"))
            .build(),
    )?;

    registry.register(
        TransformModel::builder("video")
            .extends(&base)
            .when(Predicate::parse("VIDEO OR (MOVIE AND NOT PHOTO)")?)
            .handle("8567_u", video_media)
            .handle("300__a", set_text("duration"))
            .default_field("resource_type", json!("video"))
            .build(),
    )?;

    registry.register(
        TransformModel::builder("comment")
            .when(Predicate::parse("COMMENT")?)
            .handle("body", set_text("content"))
            .handle("title", set_text("title"))
            .handle("date_creation", set_text("created"))
            .handle("id_user", comment_owner)
            .handle("in_reply_to_id_cmtRECORDCOMMENT", reply_to)
            .ignore(&["id", "id_bibrec", "star_score", "nb_votes_*", "status", "round_name", "restriction"])
            .default_field("type", json!("comment"))
            .build(),
    )?;

    Ok(registry)
}
