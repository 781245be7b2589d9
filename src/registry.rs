use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use log::debug;

use crate::backend::{DiskBackend, StorageBackend};
use crate::spec::FileSpec;
use crate::{Error, Result};

pub const DISK_BACKEND_NAME: &str = "disk";

/// Name-keyed registry of backend prototypes.
///
/// Prototypes are never opened; each create/open mints a fresh instance via
/// `make_new`. A spec naming an unregistered backend is a hard error, never
/// a silent fallback to disk.
pub struct BackendRegistry {
    prototypes: RwLock<HashMap<String, Box<dyn StorageBackend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            prototypes: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `prototype` under its own name, replacing any previous
    /// registration for that name.
    pub fn register(&self, prototype: Box<dyn StorageBackend>) {
        let name = prototype.name().to_string();
        debug!("registering storage backend '{name}'");
        self.prototypes
            .write()
            .expect("registry lock")
            .insert(name, prototype);
    }

    /// Removes the backend registered under `name`. Returns whether one was
    /// registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.prototypes
            .write()
            .expect("registry lock")
            .remove(name)
            .is_some()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.prototypes
            .read()
            .expect("registry lock")
            .contains_key(name)
    }

    /// Mints an unopened instance of the backend registered under `name`.
    pub fn new_backend(&self, name: &str) -> Result<Box<dyn StorageBackend>> {
        self.prototypes
            .read()
            .expect("registry lock")
            .get(name)
            .map(|prototype| prototype.make_new())
            .ok_or_else(|| Error::BackendUnavailable(name.to_string()))
    }

    /// Resolves the spec's backend and opens the file object for reading.
    pub fn open(&self, spec: &FileSpec) -> Result<Box<dyn StorageBackend>> {
        let mut backend = self.new_backend(self.backend_name(spec))?;
        backend.open_spec(spec)?;
        Ok(backend)
    }

    /// Resolves the spec's backend and creates the file object for writing.
    pub fn create(&self, spec: &FileSpec) -> Result<Box<dyn StorageBackend>> {
        let mut backend = self.new_backend(self.backend_name(spec))?;
        backend.create(spec)?;
        Ok(backend)
    }

    fn backend_name<'a>(&self, spec: &'a FileSpec) -> &'a str {
        if spec.backend_name.is_empty() {
            DISK_BACKEND_NAME
        } else {
            &spec.backend_name
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide registry, seeded with the disk backend.
pub fn global() -> &'static BackendRegistry {
    static REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let registry = BackendRegistry::new();
        registry.register(Box::new(DiskBackend::new()));
        registry
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_is_unavailable() {
        let registry = BackendRegistry::new();
        let spec = FileSpec::with_backend("shard", vec!["bucket/obj".to_string()]);
        let err = registry.open(&spec).map(|_| ()).unwrap_err();
        match err {
            Error::BackendUnavailable(name) => assert_eq!(name, "shard"),
            other => panic!("expected BackendUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn empty_backend_name_means_disk() {
        let registry = BackendRegistry::new();
        registry.register(Box::new(DiskBackend::new()));
        assert!(registry.is_registered(DISK_BACKEND_NAME));
        let spec = FileSpec::from_chunks(vec!["/no/such/file".to_string()]);
        // Resolution succeeds; the open itself fails on the missing file.
        let err = registry.open(&spec).map(|_| ()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn unregister_disables_resolution() {
        let registry = BackendRegistry::new();
        registry.register(Box::new(DiskBackend::new()));
        assert!(registry.unregister(DISK_BACKEND_NAME));
        assert!(!registry.unregister(DISK_BACKEND_NAME));
        let spec = FileSpec::from_chunks(vec!["/no/such/file".to_string()]);
        assert!(matches!(
            registry.open(&spec).map(|_| ()),
            Err(Error::BackendUnavailable(_))
        ));
    }
}
