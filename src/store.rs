//! The persistent key-value store backing pod state is an external
//! collaborator (see spec §1): `PodStore` is the seam, `AtomicFileStore` a
//! concrete JSON-on-disk implementation good enough to run the crate
//! without a real database.

use crate::pod::Pod;
use std::io;
use std::path::{Path, PathBuf};

pub trait PodStore {
    fn load(&self) -> io::Result<Option<Pod>>;
    fn save(&self, pod: &Pod) -> io::Result<()>;
}

/// Writes to a temp file in the same directory and renames it over the
/// target, so a crash mid-write never leaves a truncated/corrupt file
/// behind — the persistence half of "mandatory state persistence on every
/// exit path".
#[derive(Debug, Clone)]
pub struct AtomicFileStore {
    path: PathBuf,
}

impl AtomicFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PodStore for AtomicFileStore {
    fn load(&self) -> io::Result<Option<Pod>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&self.path)?;
        let pod = serde_json::from_slice(&data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(pod))
    }

    fn save(&self, pod: &Pod) -> io::Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, pod).map_err(io::Error::other)?;
        tmp.persist(&self.path).map_err(io::Error::other)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::Pod;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = AtomicFileStore::new(dir.path().join("pod.json"));
        assert!(store.load().unwrap().is_none());

        let pod = Pod::new(111, 222);
        store.save(&pod).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.id_lot, 111);
        assert_eq!(loaded.id_t, 222);
    }
}
