use super::Serializer;
use crate::{Key, LatticeType, LatticeValue};
use eyre::{bail, Context};
use std::{
    fmt::Write as _,
    fs, io,
    path::{Path, PathBuf},
};

/// File-per-key backend for disk-tier nodes.
///
/// Every key maps to exactly one file below the backend's directory, so a
/// torn write can only ever affect the key being written. Writes go through
/// a temporary file in the same directory followed by a rename, which keeps
/// the previous value intact if the process dies mid-write.
pub struct DiskSerializer {
    dir: PathBuf,
}

impl DiskSerializer {
    /// Creates a backend rooted at `<thread_dir>/<lattice type>`.
    pub fn new(thread_dir: &Path, ty: LatticeType) -> eyre::Result<Self> {
        let dir = thread_dir.join(type_dir(ty));
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create storage dir `{}`", dir.display()))?;
        Ok(Self { dir })
    }

    fn value_path(&self, key: &Key) -> eyre::Result<PathBuf> {
        let encoded = serde_json::to_vec(key).context("failed to serialize key")?;

        // hex of the encoded key: collision-free and filesystem-safe
        let mut name = String::with_capacity(encoded.len() * 2 + 5);
        for byte in encoded {
            write!(name, "{:02x}", byte).expect("writing to a String cannot fail");
        }
        name.push_str(".json");

        Ok(self.dir.join(name))
    }

    fn read_value(&self, path: &Path) -> eyre::Result<Option<(LatticeValue, usize)>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read value file `{}`", path.display())
                })
            }
        };
        let size = bytes.len();
        let value = serde_json::from_slice(&bytes).with_context(|| {
            format!("corrupt value file `{}`", path.display())
        })?;
        Ok(Some((value, size)))
    }
}

impl Serializer for DiskSerializer {
    fn get(&self, key: &Key) -> eyre::Result<Option<(LatticeValue, usize)>> {
        self.read_value(&self.value_path(key)?)
    }

    fn put(&mut self, key: &Key, value: &LatticeValue) -> eyre::Result<(LatticeValue, usize)> {
        let path = self.value_path(key)?;

        let merged = match self.read_value(&path)? {
            Some((mut stored, _)) => {
                if let Err(err) = stored.try_merge(value) {
                    bail!(err);
                }
                stored
            }
            None => value.clone(),
        };

        let encoded = serde_json::to_vec(&merged).context("failed to serialize value")?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &encoded).with_context(|| {
            format!("failed to write value file `{}`", tmp_path.display())
        })?;
        fs::rename(&tmp_path, &path).with_context(|| {
            format!("failed to move value file into place at `{}`", path.display())
        })?;

        Ok((merged, encoded.len()))
    }

    fn remove(&mut self, key: &Key) -> eyre::Result<()> {
        let path = self.value_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to remove value file `{}`", path.display())),
        }
    }
}

fn type_dir(ty: LatticeType) -> &'static str {
    match ty {
        LatticeType::Lww => "lww",
        LatticeType::Set => "set",
        LatticeType::OrderedSet => "ordered_set",
        LatticeType::SingleCausal => "single_causal",
        LatticeType::MultiCausal => "multi_causal",
        LatticeType::Priority => "priority",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::{
        last_writer_wins::Timestamp, Lattice, LastWriterWinsLattice, SetLattice,
    };

    fn key(name: &str) -> Key {
        Key::Client(name.into())
    }

    fn set_value(items: &[&str]) -> LatticeValue {
        LatticeValue::Set(SetLattice::new(
            items.iter().map(|i| i.as_bytes().to_owned()).collect(),
        ))
    }

    #[test]
    fn put_then_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = DiskSerializer::new(dir.path(), LatticeType::Set).unwrap();

        let (merged, size) = backend.put(&key("k"), &set_value(&["a"])).unwrap();
        assert_eq!(merged, set_value(&["a"]));

        let (read_back, read_size) = backend.get(&key("k")).unwrap().unwrap();
        assert_eq!(read_back, merged);
        assert_eq!(read_size, size);
    }

    #[test]
    fn put_merges_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = DiskSerializer::new(dir.path(), LatticeType::Set).unwrap();

        backend.put(&key("k"), &set_value(&["a"])).unwrap();
        let (merged, _) = backend.put(&key("k"), &set_value(&["b"])).unwrap();
        assert_eq!(merged.as_set().unwrap().len().reveal(), &2);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let ts = Timestamp::now();
        let value = LatticeValue::Lww(LastWriterWinsLattice::from_pair(ts, b"persisted".to_vec()));
        {
            let mut backend = DiskSerializer::new(dir.path(), LatticeType::Lww).unwrap();
            backend.put(&key("k"), &value).unwrap();
        }

        let backend = DiskSerializer::new(dir.path(), LatticeType::Lww).unwrap();
        let (read_back, _) = backend.get(&key("k")).unwrap().unwrap();
        assert_eq!(read_back, value);
    }

    #[test]
    fn keys_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = DiskSerializer::new(dir.path(), LatticeType::Set).unwrap();

        backend.put(&key("k1"), &set_value(&["one"])).unwrap();
        backend.put(&key("k2"), &set_value(&["two"])).unwrap();
        backend.remove(&key("k1")).unwrap();

        assert!(backend.get(&key("k1")).unwrap().is_none());
        let (survivor, _) = backend.get(&key("k2")).unwrap().unwrap();
        assert_eq!(survivor, set_value(&["two"]));
    }

    #[test]
    fn remove_missing_key_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = DiskSerializer::new(dir.path(), LatticeType::Lww).unwrap();
        backend.remove(&key("missing")).unwrap();
    }
}
