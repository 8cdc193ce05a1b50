//! `issue-reconciler apply` command.

use std::path::Path;

use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::ports::store::ResourceStore;
use crate::resource::{validate, IssueResource};

/// What `apply` did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A new record was stored.
    Created,
    /// An existing record's spec was replaced.
    Updated,
    /// The stored spec already matched.
    Unchanged,
}

/// Execute the `apply` command.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, the record is
/// invalid, or the store rejects the write.
pub fn run(ctx: &ServiceContext, file: &Path) -> Result<()> {
    let contents = ctx
        .fs
        .read_to_string(file)
        .map_err(|e| Error::store(format!("failed to read {}: {e}", file.display())))?;
    let declared: IssueResource = serde_yaml::from_str(&contents)
        .map_err(|e| Error::validation("file", format!("{}: {e}", file.display())))?;
    let name = declared.metadata.name.clone();

    match apply(&ctx.store(), declared)? {
        Applied::Created => println!("{name} created"),
        Applied::Updated => println!("{name} configured"),
        Applied::Unchanged => println!("{name} unchanged"),
    }
    Ok(())
}

/// Creates `declared`, or replaces the spec of the stored record of the same name.
///
/// Only the spec is taken from `declared`; finalizers, deletion state, and
/// status stay as stored.
///
/// # Errors
///
/// Returns a validation error for a malformed record, a conflict if the
/// record changed concurrently, or a store error.
pub fn apply(store: &dyn ResourceStore, declared: IssueResource) -> Result<Applied> {
    validate(&declared)?;
    let Some(mut current) = store.get(&declared.key())? else {
        let fresh = IssueResource::new(declared.metadata.name, declared.spec);
        store.create(fresh)?;
        return Ok(Applied::Created);
    };
    if current.spec == declared.spec {
        return Ok(Applied::Unchanged);
    }
    current.spec = declared.spec;
    store.update(&current)?;
    Ok(Applied::Updated)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapters::live::clock::LiveClock;
    use crate::resource::{IssueSpec, FINALIZER};
    use crate::store::MemoryStore;

    fn declared(description: &str) -> IssueResource {
        IssueResource::new(
            "readme-typo",
            IssueSpec {
                repo: "octo/widgets".into(),
                title: "Fix README typo".into(),
                description: description.into(),
            },
        )
    }

    #[test]
    fn apply_creates_then_updates_spec_only() {
        let store = MemoryStore::new(Arc::new(LiveClock));
        assert_eq!(apply(&store, declared("d1")).unwrap(), Applied::Created);
        assert_eq!(apply(&store, declared("d1")).unwrap(), Applied::Unchanged);

        let mut stored = store.get(&declared("").key()).unwrap().unwrap();
        stored.add_finalizer(FINALIZER);
        store.update(&stored).unwrap();

        let mut incoming = declared("d2");
        incoming.metadata.finalizers.clear();
        assert_eq!(apply(&store, incoming).unwrap(), Applied::Updated);

        let stored = store.get(&declared("").key()).unwrap().unwrap();
        assert_eq!(stored.spec.description, "d2");
        assert!(stored.has_finalizer(FINALIZER));
    }

    #[test]
    fn apply_ignores_declared_store_fields() {
        let store = MemoryStore::new(Arc::new(LiveClock));
        let mut incoming = declared("d1");
        incoming.metadata.resource_version = "99".into();
        incoming.metadata.finalizers.push("x/y".into());
        apply(&store, incoming).unwrap();

        let stored = store.get(&declared("").key()).unwrap().unwrap();
        assert_eq!(stored.metadata.resource_version, "1");
        assert!(stored.metadata.finalizers.is_empty());
    }

    #[test]
    fn apply_rejects_malformed_repo() {
        let store = MemoryStore::new(Arc::new(LiveClock));
        let mut incoming = declared("d1");
        incoming.spec.repo = "widgets".into();
        assert!(matches!(apply(&store, incoming), Err(Error::Validation { .. })));
    }
}
