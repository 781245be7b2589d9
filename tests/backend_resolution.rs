use tempfile::tempdir;
use trove::backend::{DiskBackend, StorageBackend};
use trove::registry::BackendRegistry;
use trove::{Error, FileSpec, Result};

/// A backend that stores its objects as local files under a fixed root,
/// addressed by `vault:` URIs.
struct VaultBackend {
    root: std::path::PathBuf,
    inner: DiskBackend,
}

impl VaultBackend {
    fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            root: root.into(),
            inner: DiskBackend::new(),
        }
    }

    fn local_spec(&self, spec: &FileSpec) -> Result<FileSpec> {
        let object = spec
            .chunks
            .first()
            .ok_or(Error::InvalidData("file spec has no chunk path"))?;
        let path = self.root.join(object);
        Ok(FileSpec::from_chunks(vec![path.to_string_lossy().into_owned()]))
    }
}

impl StorageBackend for VaultBackend {
    fn name(&self) -> &'static str {
        "vault"
    }

    fn make_new(&self) -> Box<dyn StorageBackend> {
        Box::new(VaultBackend::new(self.root.clone()))
    }

    fn create(&mut self, spec: &FileSpec) -> Result<()> {
        let local = self.local_spec(spec)?;
        self.inner.create(&local)
    }

    fn open_spec(&mut self, spec: &FileSpec) -> Result<()> {
        let local = self.local_spec(spec)?;
        self.inner.open_spec(&local)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write(data)
    }

    fn overwrite(&mut self, data: &[u8]) -> Result<()> {
        self.inner.overwrite(data)
    }

    fn set_pos(&mut self, pos: u64) -> Result<()> {
        self.inner.set_pos(pos)
    }

    fn pos(&self) -> u64 {
        self.inner.pos()
    }

    fn total_size(&self) -> u64 {
        self.inner.total_size()
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn add_chunk(&mut self) -> Result<()> {
        self.inner.add_chunk()
    }

    fn chunk_count(&self) -> usize {
        self.inner.chunk_count()
    }

    fn chunk_sizes(&self) -> Vec<u64> {
        self.inner.chunk_sizes()
    }

    fn chunk_path(&self, index: usize) -> Option<String> {
        self.inner.chunk_path(index)
    }

    fn truncate(&mut self) -> Result<()> {
        self.inner.truncate()
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

#[test]
fn uri_resolves_to_registered_backend() {
    let dir = tempdir().expect("tempdir");
    let registry = BackendRegistry::new();
    registry.register(Box::new(DiskBackend::new()));
    registry.register(Box::new(VaultBackend::new(dir.path())));

    let spec = FileSpec::from_path_json_uri("vault:session/recording").expect("parse");
    assert_eq!(spec.backend_name, "vault");

    std::fs::create_dir_all(dir.path().join("session")).expect("mkdir");
    let mut backend = registry.create(&spec).expect("create");
    backend.write(b"payload").expect("write");
    backend.close().expect("close");

    let mut backend = registry.open(&spec).expect("open");
    let mut buf = vec![0u8; 7];
    backend.read(&mut buf).expect("read");
    assert_eq!(buf, b"payload");

    // The object landed under the vault root, not at the literal path.
    assert!(dir.path().join("session/recording").is_file());
}

#[test]
fn unregistered_backend_never_falls_back_to_disk() {
    let registry = BackendRegistry::new();
    registry.register(Box::new(DiskBackend::new()));

    let spec = FileSpec::from_path_json_uri("vault:session/recording").expect("parse");
    match registry.open(&spec).map(|_| ()) {
        Err(Error::BackendUnavailable(name)) => assert_eq!(name, "vault"),
        other => panic!("expected BackendUnavailable, got {other:?}"),
    }
}

#[test]
fn unregistering_revokes_resolution() {
    let dir = tempdir().expect("tempdir");
    let registry = BackendRegistry::new();
    registry.register(Box::new(VaultBackend::new(dir.path())));
    assert!(registry.is_registered("vault"));

    assert!(registry.unregister("vault"));
    let spec = FileSpec::from_path_json_uri("vault:obj").expect("parse");
    assert!(matches!(
        registry.create(&spec).map(|_| ()),
        Err(Error::BackendUnavailable(_))
    ));
}
