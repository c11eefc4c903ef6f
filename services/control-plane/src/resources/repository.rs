//! Resource repository.
//!
//! The authoritative in-memory map of resources, persisted to the durable
//! store. Every change goes through a mutator that bumps `updated`, persists
//! the resource, and records a change event. Recorded events are drained by
//! the event bus (see [`ResourceRepository::take_events`]).

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use testlib_events::ChangeKind;
use testlib_id::ResourceId;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::model::{
    Health, Resource, ResourceKind, ResourceParams, ResourceState, ResourceStatus, ResourceType,
};
use crate::db::{namespaces, Store, StoreError};

/// Resource repository errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("resource not found: {0}")]
    NotFound(ResourceId),

    #[error("resource already exists: {0}")]
    DuplicateId(ResourceId),

    #[error("resource {id} is not a {expected}")]
    KindMismatch {
        id: ResourceId,
        expected: ResourceType,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepositoryError {
    /// Returns true if the underlying store lost durability.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RepositoryError::Store(e) if e.is_fatal())
    }
}

/// A recorded change to a resource, carrying the resource as it is after the
/// change.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvent {
    pub kind: ChangeKind,
    pub resource: Resource,
}

/// In-memory map of resources backed by the durable store.
pub struct ResourceRepository {
    resources: BTreeMap<ResourceId, Resource>,
    store: Arc<Store>,
    rng: StdRng,
    events: Vec<ResourceEvent>,
}

impl ResourceRepository {
    /// Creates an empty repository.
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_rng(store, StdRng::from_os_rng())
    }

    /// Creates an empty repository drawing ids from `rng`.
    pub fn with_rng(store: Arc<Store>, rng: StdRng) -> Self {
        Self {
            resources: BTreeMap::new(),
            store,
            rng,
            events: Vec::new(),
        }
    }

    /// Loads every resource held by the store.
    ///
    /// Undecodable entries are skipped. Locks found on disk belong to jobs
    /// that did not survive the restart, so they are released.
    pub fn load(store: Arc<Store>) -> Result<Self, RepositoryError> {
        let entries = store.fetch_all(namespaces::RESOURCES)?;
        let mut repo = Self::new(store);

        for (key, value) in entries {
            match serde_json::from_str::<Resource>(&value) {
                Ok(resource) if resource.id.as_str() == key => {
                    repo.resources.insert(resource.id.clone(), resource);
                }
                Ok(resource) => {
                    warn!(key = %key, resource_id = %resource.id, "Skipping stored resource with mismatched key");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping undecodable stored resource");
                }
            }
        }

        let stale: Vec<ResourceId> = repo
            .resources
            .values()
            .filter(|r| r.locked)
            .map(|r| r.id.clone())
            .collect();
        if !stale.is_empty() {
            warn!(count = stale.len(), "Releasing locks left over from a previous run");
            repo.unlock_all(&stale)?;
        }

        info!(count = repo.resources.len(), "Loaded resources");
        Ok(repo)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn find(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Generates an id not used by any resource in the repository.
    pub fn make_id(&mut self) -> ResourceId {
        loop {
            let id = ResourceId::generate(&mut self.rng);
            if !self.resources.contains_key(&id) {
                return id;
            }
            debug!(resource_id = %id, "Generated resource id collides; drawing again");
        }
    }

    /// True if a resource of `resource_type` is already called `name`.
    pub fn check_duplicate_name(&self, name: &str, resource_type: ResourceType) -> bool {
        self.resources
            .values()
            .any(|r| r.name == name && r.resource_type() == resource_type)
    }

    /// True if some export publishes the resource `id`.
    pub fn has_related_export(&self, id: &ResourceId) -> bool {
        self.resources.values().any(|r| {
            r.as_export()
                .is_some_and(|export| export.params.relation_id.as_ref() == Some(id))
        })
    }

    // -------------------------------------------------------------------------
    // Mutators
    // -------------------------------------------------------------------------

    /// Inserts and persists a new resource.
    pub fn add(&mut self, resource: Resource) -> Result<(), RepositoryError> {
        if self.resources.contains_key(&resource.id) {
            return Err(RepositoryError::DuplicateId(resource.id));
        }

        self.persist(&resource)?;
        info!(
            resource_id = %resource.id,
            resource_type = %resource.resource_type(),
            name = %resource.name,
            "Resource created"
        );
        self.record(ChangeKind::Created, &resource);
        self.resources.insert(resource.id.clone(), resource);
        Ok(())
    }

    /// Deletes a resource from memory and store.
    pub fn remove(&mut self, id: &ResourceId) -> Result<Resource, RepositoryError> {
        if !self.resources.contains_key(id) {
            return Err(RepositoryError::NotFound(id.clone()));
        }

        self.store.remove(namespaces::RESOURCES, id.as_str())?;
        let resource = self
            .resources
            .remove(id)
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))?;
        info!(resource_id = %id, "Resource deleted");
        self.record(ChangeKind::Deleted, &resource);
        Ok(resource)
    }

    /// Replaces the state. A no-op when the new state equals the current one.
    /// Returns whether anything changed.
    pub fn set_state(
        &mut self,
        id: &ResourceId,
        state: ResourceState,
    ) -> Result<bool, RepositoryError> {
        self.update(id, |resource| match (&mut resource.kind, state) {
            (ResourceKind::Export(export), ResourceState::Export(state)) => {
                Ok(replace_if_changed(&mut export.state, state))
            }
            (ResourceKind::Network(network), ResourceState::Network(state)) => {
                Ok(replace_if_changed(&mut network.state, state))
            }
            (_, state) => Err(RepositoryError::KindMismatch {
                id: resource.id.clone(),
                expected: match state {
                    ResourceState::Export(_) => ResourceType::Export,
                    ResourceState::Network(_) => ResourceType::Network,
                },
            }),
        })
    }

    /// Replaces the params. A no-op when unchanged.
    pub fn set_params(
        &mut self,
        id: &ResourceId,
        params: ResourceParams,
    ) -> Result<bool, RepositoryError> {
        self.update(id, |resource| match (&mut resource.kind, params) {
            (ResourceKind::Export(export), ResourceParams::Export(params)) => {
                Ok(replace_if_changed(&mut export.params, params))
            }
            (ResourceKind::Network(network), ResourceParams::Network(params)) => {
                Ok(replace_if_changed(&mut network.params, params))
            }
            (_, params) => Err(RepositoryError::KindMismatch {
                id: resource.id.clone(),
                expected: match params {
                    ResourceParams::Export(_) => ResourceType::Export,
                    ResourceParams::Network(_) => ResourceType::Network,
                },
            }),
        })
    }

    /// Sets the administrative status. A no-op when unchanged.
    pub fn set_status(
        &mut self,
        id: &ResourceId,
        status: ResourceStatus,
    ) -> Result<bool, RepositoryError> {
        self.update(id, |resource| {
            Ok(replace_if_changed(&mut resource.status, status))
        })
    }

    /// Marks a resource as held by an in-flight job.
    pub fn lock(&mut self, id: &ResourceId) -> Result<bool, RepositoryError> {
        self.update(id, |resource| Ok(replace_if_changed(&mut resource.locked, true)))
    }

    /// Releases a resource held by a job.
    pub fn unlock(&mut self, id: &ResourceId) -> Result<bool, RepositoryError> {
        self.update(id, |resource| Ok(replace_if_changed(&mut resource.locked, false)))
    }

    /// Locks every known id; unknown ids are logged and skipped.
    /// Returns how many resources changed.
    pub fn lock_all(&mut self, ids: &[ResourceId]) -> Result<usize, RepositoryError> {
        self.for_each_known(ids, "lock", Self::lock)
    }

    /// Unlocks every known id; unknown ids are logged and skipped.
    /// Returns how many resources changed.
    pub fn unlock_all(&mut self, ids: &[ResourceId]) -> Result<usize, RepositoryError> {
        self.for_each_known(ids, "unlock", Self::unlock)
    }

    /// Sets health to LOST unless the resource is locked or already lost.
    /// Returns whether anything changed.
    pub fn mark_as_lost(&mut self, id: &ResourceId) -> Result<bool, RepositoryError> {
        self.update(id, |resource| {
            if resource.locked {
                debug!(resource_id = %resource.id, "Resource is locked; not marking as lost");
                return Ok(false);
            }
            let changed = replace_if_changed(resource.health_mut(), Health::Lost);
            if changed {
                info!(resource_id = %resource.id, name = %resource.name, "Resource lost");
            }
            Ok(changed)
        })
    }

    /// Removes and returns the recorded change events, oldest first.
    pub fn take_events(&mut self) -> Vec<ResourceEvent> {
        std::mem::take(&mut self.events)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn for_each_known(
        &mut self,
        ids: &[ResourceId],
        action: &'static str,
        apply: fn(&mut Self, &ResourceId) -> Result<bool, RepositoryError>,
    ) -> Result<usize, RepositoryError> {
        let mut changed = 0;
        for id in ids {
            if !self.resources.contains_key(id) {
                warn!(resource_id = %id, action, "Unknown resource id; skipping");
                continue;
            }
            if apply(self, id)? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Applies `mutate` to a copy of the resource. When it reports a change,
    /// the copy gets a fresh `updated`, is persisted, replaces the original,
    /// and a change event is recorded. On error nothing is modified.
    fn update<F>(&mut self, id: &ResourceId, mutate: F) -> Result<bool, RepositoryError>
    where
        F: FnOnce(&mut Resource) -> Result<bool, RepositoryError>,
    {
        let current = self
            .resources
            .get(id)
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))?;

        let mut next = current.clone();
        if !mutate(&mut next)? {
            return Ok(false);
        }
        next.updated = now_ms().max(current.updated);

        self.persist(&next)?;
        self.record(ChangeKind::Updated, &next);
        self.resources.insert(id.clone(), next);
        Ok(true)
    }

    fn persist(&self, resource: &Resource) -> Result<(), RepositoryError> {
        let value = serde_json::to_string(resource)?;
        self.store
            .save(namespaces::RESOURCES, resource.id.as_str(), value)?;
        Ok(())
    }

    fn record(&mut self, kind: ChangeKind, resource: &Resource) {
        self.events.push(ResourceEvent {
            kind,
            resource: resource.clone(),
        });
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

/// Current time in epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
