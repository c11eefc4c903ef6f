//! Creation-time checks for resource-touching requests.
//!
//! These never mutate the repository and never fail the process; callers
//! map them to client errors.

use testlib_id::ResourceId;
use thiserror::Error;

use super::model::{Resource, ResourceType};
use super::repository::ResourceRepository;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{kind} named '{name}' already exists")]
    NameTaken { name: String, kind: ResourceType },

    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),

    #[error("resource is busy: {0}")]
    ResourceBusy(ResourceId),

    #[error("resource {id} is not a {expected}")]
    WrongType {
        id: ResourceId,
        expected: ResourceType,
    },
}

/// Rejects a (name, type) pair already in use.
pub fn ensure_name_available(
    repo: &ResourceRepository,
    name: &str,
    kind: ResourceType,
) -> Result<(), ValidationError> {
    if repo.check_duplicate_name(name, kind) {
        return Err(ValidationError::NameTaken {
            name: name.to_string(),
            kind,
        });
    }
    Ok(())
}

/// Looks up `id` and checks its type.
pub fn ensure_type<'a>(
    repo: &'a ResourceRepository,
    id: &ResourceId,
    expected: ResourceType,
) -> Result<&'a Resource, ValidationError> {
    let resource = ensure_exists(repo, id)?;
    if resource.resource_type() != expected {
        return Err(ValidationError::WrongType {
            id: id.clone(),
            expected,
        });
    }
    Ok(resource)
}

/// Checks that `id` is not held by a job and not published by an export.
pub fn ensure_ready(repo: &ResourceRepository, id: &ResourceId) -> Result<(), ValidationError> {
    let resource = ensure_exists(repo, id)?;
    if resource.locked || repo.has_related_export(id) {
        return Err(ValidationError::ResourceBusy(id.clone()));
    }
    Ok(())
}

/// Checks that every target exists and none is locked.
pub fn ensure_available(
    repo: &ResourceRepository,
    ids: &[ResourceId],
) -> Result<(), ValidationError> {
    for id in ids {
        if ensure_exists(repo, id)?.locked {
            return Err(ValidationError::ResourceBusy(id.clone()));
        }
    }
    Ok(())
}

fn ensure_exists<'a>(
    repo: &'a ResourceRepository,
    id: &ResourceId,
) -> Result<&'a Resource, ValidationError> {
    repo.find(id)
        .ok_or_else(|| ValidationError::ResourceNotFound(id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::resources::model::{
        Export, ExportParams, ExportProto, ExportState, Network, NetworkParams, NetworkState,
        ProtoParams, ResourceKind,
    };
    use std::sync::Arc;

    fn setup() -> (ResourceRepository, ResourceId) {
        let mut repo = ResourceRepository::new(Arc::new(Store::in_memory()));
        let id = repo.make_id();
        repo.add(Resource::new(
            id.clone(),
            "lab-01",
            "ens1f0",
            ResourceKind::Network(Network {
                params: NetworkParams {
                    mac: "aa:bb:cc:dd:ee:ff".into(),
                    ..Default::default()
                },
                state: NetworkState::default(),
            }),
            1,
        ))
        .unwrap();
        (repo, id)
    }

    #[test]
    fn test_name_taken() {
        let (repo, _) = setup();
        assert_eq!(
            ensure_name_available(&repo, "ens1f0", ResourceType::Network),
            Err(ValidationError::NameTaken {
                name: "ens1f0".into(),
                kind: ResourceType::Network
            })
        );
        assert!(ensure_name_available(&repo, "ens1f0", ResourceType::Export).is_ok());
    }

    #[test]
    fn test_wrong_type_and_missing() {
        let (repo, id) = setup();
        assert!(ensure_type(&repo, &id, ResourceType::Network).is_ok());
        assert!(matches!(
            ensure_type(&repo, &id, ResourceType::Export),
            Err(ValidationError::WrongType { .. })
        ));
        let missing = ResourceId::parse("tid_00zzzz").unwrap();
        assert_eq!(
            ensure_ready(&repo, &missing),
            Err(ValidationError::ResourceNotFound(missing))
        );
    }

    #[test]
    fn test_locked_resource_is_busy() {
        let (mut repo, id) = setup();
        assert!(ensure_ready(&repo, &id).is_ok());
        assert!(ensure_available(&repo, &[id.clone()]).is_ok());

        repo.lock(&id).unwrap();
        assert_eq!(
            ensure_ready(&repo, &id),
            Err(ValidationError::ResourceBusy(id.clone()))
        );
        assert_eq!(
            ensure_available(&repo, &[id.clone()]),
            Err(ValidationError::ResourceBusy(id))
        );
    }

    #[test]
    fn test_exported_resource_is_busy() {
        let (mut repo, id) = setup();
        let export_id = repo.make_id();
        repo.add(Resource::new(
            export_id,
            "lab-01",
            "iqn.a",
            ResourceKind::Export(Export {
                params: ExportParams {
                    proto: ExportProto::Iscsi,
                    proto_params: ProtoParams::default(),
                    relation_id: Some(id.clone()),
                },
                state: ExportState::default(),
            }),
            1,
        ))
        .unwrap();

        assert_eq!(
            ensure_ready(&repo, &id),
            Err(ValidationError::ResourceBusy(id.clone()))
        );
        // Busy-by-export does not block job targeting.
        assert!(ensure_available(&repo, &[id]).is_ok());
    }
}
