//! In-memory remote provider.
//!
//! Behaves like a real object store - container lookup, pagination,
//! metadata queries, soft deletes, a monotonic modified clock - while
//! holding everything in process memory. Used as the test double for the
//! sync coordinator, with switches to simulate auth and network failures.

use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use super::{BoxFuture, ObjectPage, ProviderIdentity, RemoteObjectRef, RemoteProvider};
use crate::error::{InkvaultError, Result};

// Seconds between ticks of the logical modified clock.
const TICK_SECONDS: i64 = 60;

#[derive(Debug, Default)]
struct RemoteState {
    /// container id -> container name
    containers: IndexMap<String, String>,
    objects: IndexMap<String, StoredObject>,
    counter: u64,
    tick: i64,
}

#[derive(Debug, Clone)]
struct StoredObject {
    reference: RemoteObjectRef,
    container_id: String,
    content: Vec<u8>,
    trashed: bool,
}

impl RemoteState {
    fn next_time(&mut self) -> DateTime<Utc> {
        self.tick += 1;
        DateTime::from_timestamp(1_700_000_000 + self.tick * TICK_SECONDS, 0).unwrap_or_default()
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{}-{}", prefix, self.counter)
    }
}

/// In-memory [`RemoteProvider`] implementation.
///
/// State lives behind `Arc`, so clones share the same remote: two
/// coordinators holding clones see each other's objects, like two devices
/// signed into one account.
#[derive(Debug, Default, Clone)]
pub struct MemoryRemote {
    state: Arc<RwLock<RemoteState>>,
    page_size: usize,
    auth_failing: Arc<AtomicBool>,
    requests_failing: Arc<AtomicBool>,
    download_calls: Arc<AtomicUsize>,
}

impl MemoryRemote {
    /// Create an empty provider with the default page size.
    pub fn new() -> Self {
        Self {
            page_size: 100,
            ..Self::default()
        }
    }

    /// Set the listing page size, to exercise pagination in tests.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make every call fail with an authentication error.
    pub fn fail_auth(&self, failing: bool) {
        self.auth_failing.store(failing, Ordering::SeqCst);
    }

    /// Make every call fail with a request error.
    pub fn fail_requests(&self, failing: bool) {
        self.requests_failing.store(failing, Ordering::SeqCst);
    }

    /// Number of content downloads served so far.
    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    /// Number of live (non-trashed) objects.
    pub fn object_count(&self) -> usize {
        let state = self.state.read().unwrap();
        state.objects.values().filter(|o| !o.trashed).count()
    }

    /// Number of trashed objects.
    pub fn trashed_count(&self) -> usize {
        let state = self.state.read().unwrap();
        state.objects.values().filter(|o| o.trashed).count()
    }

    /// Names of all live objects, in creation order.
    pub fn object_names(&self) -> Vec<String> {
        let state = self.state.read().unwrap();
        state
            .objects
            .values()
            .filter(|o| !o.trashed)
            .map(|o| o.reference.name.clone())
            .collect()
    }

    /// Seed an object directly, bypassing the trait surface. Returns the
    /// object id.
    pub fn seed_object(
        &self,
        container_id: &str,
        name: &str,
        metadata: IndexMap<String, String>,
        content: &[u8],
    ) -> String {
        let mut state = self.state.write().unwrap();
        let id = state.next_id("object");
        let modified_at = state.next_time();
        state.objects.insert(
            id.clone(),
            StoredObject {
                reference: RemoteObjectRef {
                    id: id.clone(),
                    name: name.to_string(),
                    modified_at,
                    metadata,
                },
                container_id: container_id.to_string(),
                content: content.to_vec(),
                trashed: false,
            },
        );
        id
    }

    fn guard(&self) -> Result<()> {
        if self.auth_failing.load(Ordering::SeqCst) {
            return Err(InkvaultError::ProviderAuth("token expired".to_string()));
        }
        if self.requests_failing.load(Ordering::SeqCst) {
            return Err(InkvaultError::ProviderRequest(
                "network unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

impl RemoteProvider for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    fn ensure_container<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.guard()?;
            let mut state = self.state.write().unwrap();
            if let Some((id, _)) = state.containers.iter().find(|(_, n)| n.as_str() == name) {
                return Ok(id.clone());
            }
            let id = state.next_id("container");
            state.containers.insert(id.clone(), name.to_string());
            Ok(id)
        })
    }

    fn list_objects<'a>(
        &'a self,
        container_id: &'a str,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<ObjectPage>> {
        Box::pin(async move {
            self.guard()?;
            let state = self.state.read().unwrap();
            let matching: Vec<RemoteObjectRef> = state
                .objects
                .values()
                .filter(|o| o.container_id == container_id && !o.trashed)
                .map(|o| o.reference.clone())
                .collect();

            let start = page_token
                .and_then(|token| token.parse::<usize>().ok())
                .unwrap_or(0);
            let end = (start + self.page_size).min(matching.len());
            let next_page_token = if end < matching.len() {
                Some(end.to_string())
            } else {
                None
            };

            Ok(ObjectPage {
                objects: matching[start.min(end)..end].to_vec(),
                next_page_token,
            })
        })
    }

    fn find_by_local_id<'a>(
        &'a self,
        local_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<RemoteObjectRef>>> {
        Box::pin(async move {
            self.guard()?;
            let state = self.state.read().unwrap();
            Ok(state
                .objects
                .values()
                .filter(|o| !o.trashed && o.reference.local_id() == Some(local_id))
                .map(|o| o.reference.clone())
                .collect())
        })
    }

    fn create_object<'a>(
        &'a self,
        name: &'a str,
        parent_id: &'a str,
        metadata: &'a IndexMap<String, String>,
    ) -> BoxFuture<'a, Result<RemoteObjectRef>> {
        Box::pin(async move {
            self.guard()?;
            let mut state = self.state.write().unwrap();
            let id = state.next_id("object");
            let modified_at = state.next_time();
            let reference = RemoteObjectRef {
                id: id.clone(),
                name: name.to_string(),
                modified_at,
                metadata: metadata.clone(),
            };
            state.objects.insert(
                id,
                StoredObject {
                    reference: reference.clone(),
                    container_id: parent_id.to_string(),
                    content: Vec::new(),
                    trashed: false,
                },
            );
            Ok(reference)
        })
    }

    fn upload_content<'a>(
        &'a self,
        object_id: &'a str,
        bytes: &'a [u8],
        metadata: &'a IndexMap<String, String>,
    ) -> BoxFuture<'a, Result<RemoteObjectRef>> {
        Box::pin(async move {
            self.guard()?;
            let mut state = self.state.write().unwrap();
            let modified_at = state.next_time();
            let object = state
                .objects
                .get_mut(object_id)
                .ok_or_else(|| InkvaultError::NotFound(object_id.to_string()))?;
            object.content = bytes.to_vec();
            object.reference.modified_at = modified_at;
            for (key, value) in metadata {
                object
                    .reference
                    .metadata
                    .insert(key.clone(), value.clone());
            }
            Ok(object.reference.clone())
        })
    }

    fn download_content<'a>(&'a self, object_id: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            self.guard()?;
            self.download_calls.fetch_add(1, Ordering::SeqCst);
            let state = self.state.read().unwrap();
            state
                .objects
                .get(object_id)
                .map(|o| o.content.clone())
                .ok_or_else(|| InkvaultError::NotFound(object_id.to_string()))
        })
    }

    fn rename_object<'a>(
        &'a self,
        object_id: &'a str,
        new_name: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.guard()?;
            let mut state = self.state.write().unwrap();
            let object = state
                .objects
                .get_mut(object_id)
                .ok_or_else(|| InkvaultError::NotFound(object_id.to_string()))?;
            object.reference.name = new_name.to_string();
            Ok(())
        })
    }

    fn trash_object<'a>(&'a self, object_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.guard()?;
            let mut state = self.state.write().unwrap();
            let object = state
                .objects
                .get_mut(object_id)
                .ok_or_else(|| InkvaultError::NotFound(object_id.to_string()))?;
            object.trashed = true;
            Ok(())
        })
    }

    fn get_authenticated_identity(&self) -> BoxFuture<'_, Result<ProviderIdentity>> {
        Box::pin(async move {
            self.guard()?;
            Ok(ProviderIdentity {
                id: "memory-user".to_string(),
                email: Some("user@example.com".to_string()),
                display_name: Some("Memory User".to_string()),
                avatar_url: None,
            })
        })
    }
}
