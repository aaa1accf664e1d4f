//! Owner resolution with deterministic placeholder fallback.

use sha2::{Digest, Sha256};

use ferry_types::entry::LegacyId;
use ferry_types::error::{ErrorScope, MigrationError};

use crate::retry::RetryPolicy;
use crate::service::{OwnerHint, PlaceholderIdentity, RecordService, ResolutionSource};

/// Derive a placeholder identity from the strongest available hint:
/// email, then legacy user id, then name.
#[must_use]
pub fn derive_placeholder(hint: &OwnerHint) -> Option<PlaceholderIdentity> {
    let email = hint.email.as_deref().map(str::trim).and_then(|email| {
        let (local, domain) = email.split_once('@')?;
        (!local.is_empty() && !domain.is_empty()).then_some((email, local))
    });
    if let Some((email, local)) = email {
        return Some(PlaceholderIdentity {
            username: sanitize_username(local),
            email: Some(email.to_ascii_lowercase()),
            full_name: hint.name.clone(),
            source: Some(ResolutionSource::Email),
        });
    }
    if let Some(id) = hint.legacy_id.as_deref().map(str::trim).filter(|i| !i.is_empty()) {
        return Some(PlaceholderIdentity {
            username: format!("legacy-user-{}", sanitize_username(id)),
            email: None,
            full_name: hint.name.clone(),
            source: Some(ResolutionSource::LegacyId),
        });
    }
    if let Some(name) = hint.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        let digest = Sha256::digest(name.to_lowercase().as_bytes());
        let short: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
        return Some(PlaceholderIdentity {
            username: format!("legacy-{short}"),
            email: None,
            full_name: Some(name.to_string()),
            source: Some(ResolutionSource::Name),
        });
    }
    None
}

fn sanitize_username(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Resolve `hint` to a destination user id, creating a placeholder user when
/// no existing one matches.
///
/// # Errors
///
/// Returns an entry-scoped identity error when no placeholder can be derived
/// or the service refuses to create it. Exhausted retries stay
/// collection-scoped.
pub fn resolve_owner(
    records: &dyn RecordService,
    retry: &RetryPolicy,
    hint: &OwnerHint,
    legacy_id: &LegacyId,
) -> Result<String, MigrationError> {
    if let Some(id) = retry.run("resolve_owner", || records.resolve_owner(hint))? {
        tracing::debug!(legacy_id = legacy_id.as_str(), owner = id.as_str(), "Owner resolved");
        return Ok(id);
    }

    let placeholder = derive_placeholder(hint).ok_or_else(|| {
        MigrationError::identity("NO_OWNER_HINT", "owner hint carries no usable identity")
            .with_legacy_id(legacy_id.as_str())
    })?;
    let source = placeholder.source.map_or("unknown", ResolutionSource::as_str);

    match retry.run("create_owner", || records.create_owner(&placeholder)) {
        Ok(id) => {
            tracing::info!(
                legacy_id = legacy_id.as_str(),
                owner = id.as_str(),
                username = placeholder.username.as_str(),
                resolution_source = source,
                "Created placeholder owner"
            );
            Ok(id)
        }
        Err(err) if err.retryable || err.scope == ErrorScope::Collection => Err(err),
        Err(err) => Err(MigrationError::identity(
            "PLACEHOLDER_FAILED",
            format!(
                "could not create placeholder '{}' from {source}: {}",
                placeholder.username, err.message
            ),
        )
        .with_legacy_id(legacy_id.as_str())),
    }
}
