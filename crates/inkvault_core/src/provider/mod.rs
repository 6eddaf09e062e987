//! Remote provider abstraction.
//!
//! A provider is one cloud object store (a file-hosting API, an in-memory
//! double in tests). The sync core talks to it through [`RemoteProvider`],
//! an object-safe async trait: all methods return boxed futures so the
//! provider can live behind `dyn RemoteProvider`.
//!
//! The only contract a provider must satisfy beyond the method signatures:
//! metadata on create/upload always carries `{localId, hash}`, and matching
//! a remote object back to a local record goes through that metadata pair,
//! never through names.

pub mod memory;

pub use memory::MemoryRemote;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A boxed future for object-safe async methods.
///
/// On native targets, futures are `Send` for compatibility with
/// multi-threaded runtimes.
#[cfg(not(target_arch = "wasm32"))]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A boxed future for object-safe async methods.
///
/// WASM version without the `Send` requirement - JavaScript is
/// single-threaded.
#[cfg(target_arch = "wasm32")]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Metadata key carrying the local drawing id on a remote object.
pub const METADATA_LOCAL_ID: &str = "localId";

/// Metadata key carrying the content hash on a remote object.
pub const METADATA_HASH: &str = "hash";

/// A remote object's identity as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObjectRef {
    /// Opaque provider-assigned object id
    pub id: String,
    /// Display name on the provider side
    pub name: String,
    /// Last-modified timestamp on the provider side
    pub modified_at: DateTime<Utc>,
    /// Provider-side metadata; contains at least `localId` and `hash` for
    /// objects written by this core
    pub metadata: IndexMap<String, String>,
}

impl RemoteObjectRef {
    /// The local drawing id recorded in metadata, if present.
    pub fn local_id(&self) -> Option<&str> {
        self.metadata.get(METADATA_LOCAL_ID).map(String::as_str)
    }

    /// The content hash recorded in metadata, if present.
    pub fn content_hash(&self) -> Option<&str> {
        self.metadata.get(METADATA_HASH).map(String::as_str)
    }
}

/// One page of a remote object listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Objects in this page
    pub objects: Vec<RemoteObjectRef>,
    /// Continuation token; `None` when this is the last page
    pub next_page_token: Option<String>,
}

/// The authenticated account behind the provider connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderIdentity {
    /// Stable account identifier
    pub id: String,
    /// Account email, when the provider exposes one
    pub email: Option<String>,
    /// Display name, when the provider exposes one
    pub display_name: Option<String>,
    /// Avatar URL, when the provider exposes one
    pub avatar_url: Option<String>,
}

/// Trait for remote object-store providers.
///
/// Implementations map these operations onto their API. Errors are reported
/// as [`crate::error::InkvaultError::ProviderAuth`] for credential failures
/// (401/403-class) and [`crate::error::InkvaultError::ProviderRequest`] for
/// everything network-shaped, so the coordinator can tell the two apart.
/// Implementations apply their own request timeouts and surface a timeout
/// as a `ProviderRequest` failure (retryable); no call blocks indefinitely.
pub trait RemoteProvider: Send + Sync {
    /// Human-readable name for this provider
    fn name(&self) -> &str;

    /// Look up or create the container all synced drawings live in.
    /// Idempotent: returns the existing container when one with this name
    /// already exists.
    fn ensure_container<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<String>>;

    /// List objects in a container, one page at a time. Pass the previous
    /// page's continuation token to fetch the next page.
    fn list_objects<'a>(
        &'a self,
        container_id: &'a str,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<ObjectPage>>;

    /// Find objects whose metadata carries the given local drawing id.
    fn find_by_local_id<'a>(
        &'a self,
        local_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<RemoteObjectRef>>>;

    /// Create an empty object with the given name and metadata.
    fn create_object<'a>(
        &'a self,
        name: &'a str,
        parent_id: &'a str,
        metadata: &'a IndexMap<String, String>,
    ) -> BoxFuture<'a, Result<RemoteObjectRef>>;

    /// Replace an object's content and metadata. Returns the updated
    /// reference, including the new modified timestamp.
    fn upload_content<'a>(
        &'a self,
        object_id: &'a str,
        bytes: &'a [u8],
        metadata: &'a IndexMap<String, String>,
    ) -> BoxFuture<'a, Result<RemoteObjectRef>>;

    /// Download an object's content.
    fn download_content<'a>(&'a self, object_id: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;

    /// Rename an object. A metadata-only operation, independent of content
    /// uploads.
    fn rename_object<'a>(
        &'a self,
        object_id: &'a str,
        new_name: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Move an object to the provider's trash (soft delete).
    fn trash_object<'a>(&'a self, object_id: &'a str) -> BoxFuture<'a, Result<()>>;

    /// The account the provider is currently authenticated as.
    fn get_authenticated_identity(&self) -> BoxFuture<'_, Result<ProviderIdentity>>;
}
