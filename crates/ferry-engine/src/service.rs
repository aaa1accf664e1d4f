//! External collaborator contracts: the search clusters and the
//! record-management service.
//!
//! Implementations must be `Send + Sync` for use behind `Arc<dyn ..>` from
//! statistics workers. Every method is a single blocking call; retries are
//! applied by callers through [`RetryPolicy`](crate::retry::RetryPolicy).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ferry_types::entry::LegacyId;
use ferry_types::error::MigrationError;
use ferry_types::event::BulkAction;

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: Value,
}

/// One page of a scrolled search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    /// Cursor for the next page, when the cluster opened one.
    pub scroll_id: Option<String>,
    pub hits: Vec<SearchHit>,
}

/// An item a bulk request did not write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub id: String,
    pub status: u16,
    pub reason: String,
}

/// Outcome of one bulk request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub created: u64,
    /// Create-only actions rejected because the id already exists.
    pub conflicts: u64,
    pub failed: Vec<BulkFailure>,
}

/// Search cluster operations.
pub trait SearchClient: Send + Sync {
    /// Open a scroll over `index`, returning the first page.
    ///
    /// # Errors
    ///
    /// Transport failures are transient; query rejections are not.
    fn search(
        &self,
        index: &str,
        query: &Value,
        page_size: u32,
        keep_alive: &str,
    ) -> Result<SearchPage, MigrationError>;

    /// Fetch the next page of an open scroll.
    ///
    /// # Errors
    ///
    /// Transport failures are transient; an expired cursor is not.
    fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<SearchPage, MigrationError>;

    /// Release a scroll cursor.
    ///
    /// # Errors
    ///
    /// Returns the transport or cluster error.
    fn clear_scroll(&self, scroll_id: &str) -> Result<(), MigrationError>;

    /// Count documents matching `query` in `index` (may be a pattern).
    ///
    /// # Errors
    ///
    /// Returns the transport or cluster error.
    fn count(&self, index: &str, query: &Value) -> Result<u64, MigrationError>;

    /// Execute bulk actions. Per-item rejections are reported in the
    /// response, not as an error.
    ///
    /// # Errors
    ///
    /// Returns the transport or cluster error for the request as a whole.
    fn bulk(&self, actions: &[BulkAction]) -> Result<BulkResponse, MigrationError>;
}

/// Identity hints a record carries for its owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_id: Option<String>,
}

impl OwnerHint {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.name.is_none() && self.legacy_id.is_none()
    }
}

/// Where a placeholder identity was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Email,
    LegacyId,
    Name,
}

impl ResolutionSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::LegacyId => "legacy_id",
            Self::Name => "name",
        }
    }
}

/// Minimal identity created when an owner cannot be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderIdentity {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip)]
    pub source: Option<ResolutionSource>,
}

/// Record ready to be created in the destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRecord {
    pub collection: String,
    pub legacy_id: LegacyId,
    pub model: String,
    pub metadata: Map<String, Value>,
    pub owner_id: Option<String>,
    /// Legacy id of the entity this sub-record belongs to.
    pub parent_legacy_id: Option<LegacyId>,
    /// Destination id of the record this one replies to.
    pub reply_to_id: Option<String>,
}

/// Identity of a created or existing destination record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRecord {
    pub id: String,
    pub version: String,
}

/// One published version of a destination entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version_id: String,
    /// Legacy file version the destination version was created from.
    #[serde(default)]
    pub legacy_version: Option<u32>,
    /// File keys attached to the version.
    #[serde(default)]
    pub files: Vec<String>,
}

/// All versions of a destination entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityVersions {
    pub parent_id: String,
    pub latest: String,
    pub versions: Vec<VersionInfo>,
}

impl EntityVersions {
    #[must_use]
    pub fn by_legacy_version(&self, legacy_version: u32) -> Option<&VersionInfo> {
        self.versions
            .iter()
            .find(|v| v.legacy_version == Some(legacy_version))
    }

    #[must_use]
    pub fn latest_version(&self) -> Option<&VersionInfo> {
        self.versions.iter().find(|v| v.version_id == self.latest)
    }
}

/// Record-management service operations.
pub trait RecordService: Send + Sync {
    /// Destination record already bound to `legacy_id`, if any.
    ///
    /// # Errors
    ///
    /// Transport failures are transient.
    fn find_by_legacy_id(
        &self,
        collection: &str,
        legacy_id: &LegacyId,
    ) -> Result<Option<CreatedRecord>, MigrationError>;

    /// Existing destination user matching the hint.
    ///
    /// # Errors
    ///
    /// Transport failures are transient.
    fn resolve_owner(&self, hint: &OwnerHint) -> Result<Option<String>, MigrationError>;

    /// Create a placeholder user, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an identity error when the service rejects the user.
    fn create_owner(&self, placeholder: &PlaceholderIdentity) -> Result<String, MigrationError>;

    /// Create and publish a record.
    ///
    /// # Errors
    ///
    /// Returns a data error when the service rejects the metadata.
    fn create_and_publish(&self, record: &NewRecord) -> Result<CreatedRecord, MigrationError>;

    /// Published versions of the record with destination id `parent_id`.
    ///
    /// # Errors
    ///
    /// Transport failures are transient.
    fn versions(&self, parent_id: &str) -> Result<EntityVersions, MigrationError>;
}
