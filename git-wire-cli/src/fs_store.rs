//! A loose-object filesystem store: zlib-deflated objects under
//! `objects/aa/bb…`, one file per ref under `refs/`.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use git_wire_core::object::referenced_ids;
use git_wire_core::store::{ObjectStore, StoreError, StoreResult};
use git_wire_core::{Object, ObjectId, ObjectKind};

/// A bare, loose-object-only store rooted at one directory.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Opens (creating if needed) a store at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("refs"))?;
        Ok(Self { root })
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join("objects").join(&hex[..2]).join(&hex[2..])
    }

    fn ref_path(&self, name: &BStr) -> StoreResult<PathBuf> {
        let text = name
            .to_str()
            .map_err(|_| StoreError::from("ref name is not valid UTF-8"))?;
        if text.split('/').any(|part| {
            part.is_empty() || part == "." || part == ".." || part.contains('\\')
        }) {
            return Err(format!("unsafe ref name {text}").into());
        }
        Ok(self.root.join(text))
    }

    fn collect_refs(
        &self,
        dir: &Path,
        prefix: &mut String,
        out: &mut Vec<(BString, ObjectId)>,
    ) -> StoreResult<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name
                .to_str()
                .ok_or_else(|| StoreError::from("non-UTF-8 ref path"))?
                .to_string();
            let saved = prefix.len();
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(&name);
            if entry.file_type()?.is_dir() {
                self.collect_refs(&entry.path(), prefix, out)?;
            } else {
                let text = fs::read_to_string(entry.path())?;
                let id = ObjectId::from_hex(text.trim().as_bytes())
                    .map_err(|err| StoreError::from(err.to_string()))?;
                out.push((BString::from(prefix.as_str()), id));
            }
            prefix.truncate(saved);
        }
        Ok(())
    }
}

impl ObjectStore for FsStore {
    fn has_object(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.object_path(id).exists())
    }

    fn read_object(&self, id: &ObjectId) -> StoreResult<Object> {
        let compressed = fs::read(self.object_path(id))?;
        let mut raw = Vec::new();
        ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut raw)?;

        let nul = raw
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| StoreError::from("loose object lacks a header"))?;
        let header = &raw[..nul];
        let space = header
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| StoreError::from("malformed loose-object header"))?;
        let kind = ObjectKind::from_name(&header[..space])
            .ok_or_else(|| StoreError::from("unknown object kind in header"))?;
        let declared: usize = std::str::from_utf8(&header[space + 1..])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::from("malformed size in loose-object header"))?;
        let data = raw[nul + 1..].to_vec();
        if data.len() != declared {
            return Err(format!(
                "loose object {id} declares {declared} bytes but holds {}",
                data.len()
            )
            .into());
        }
        Ok(Object::new(kind, data))
    }

    fn write_object(&mut self, object: Object) -> StoreResult<ObjectId> {
        let id = object.id();
        let path = self.object_path(&id);
        if path.exists() {
            return Ok(id);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(object.kind.name().as_bytes())?;
        encoder.write_all(b" ")?;
        encoder.write_all(object.data.len().to_string().as_bytes())?;
        encoder.write_all(b"\0")?;
        encoder.write_all(&object.data)?;
        let compressed = encoder.finish()?;

        // Write-then-rename so a crashed write never leaves a readable
        // half-object under its final name.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, compressed)?;
        fs::rename(&tmp, &path)?;
        Ok(id)
    }

    fn list_refs(&self) -> StoreResult<Vec<(BString, ObjectId)>> {
        let mut out = Vec::new();
        let mut prefix = String::from("refs");
        self.collect_refs(&self.root.join("refs"), &mut prefix, &mut out)?;
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn read_ref(&self, name: &BStr) -> StoreResult<Option<ObjectId>> {
        let path = self.ref_path(name)?;
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(
                ObjectId::from_hex(text.trim().as_bytes())
                    .map_err(|err| StoreError::from(err.to_string()))?,
            )),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write_ref(&mut self, name: &BStr, target: ObjectId) -> StoreResult<()> {
        let path = self.ref_path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("lock");
        fs::write(&tmp, format!("{}\n", target.to_hex()))?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn reachable_from(
        &self,
        roots: &[ObjectId],
    ) -> StoreResult<Box<dyn Iterator<Item = ObjectId> + '_>> {
        let mut seen = std::collections::HashSet::new();
        let mut queue: Vec<ObjectId> = roots.to_vec();
        let mut order = Vec::new();
        while let Some(id) = queue.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Ok(object) = self.read_object(&id) else {
                continue;
            };
            order.push(id);
            for (child, _) in referenced_ids(object.kind, &object.data) {
                queue.push(child);
            }
        }
        Ok(Box::new(order.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_object_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsStore::open(dir.path()).unwrap();
        let object = Object::new(ObjectKind::Blob, b"loose bytes".to_vec());
        let id = store.write_object(object.clone()).unwrap();
        assert!(store.has_object(&id).unwrap());
        assert_eq!(store.read_object(&id).unwrap(), object);
    }

    #[test]
    fn refs_round_trip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsStore::open(dir.path()).unwrap();
        let id = ObjectId::from_bytes([7; 20]);
        store.write_ref("refs/heads/main".into(), id).unwrap();
        store.write_ref("refs/tags/v1".into(), id).unwrap();
        assert_eq!(store.read_ref("refs/heads/main".into()).unwrap(), Some(id));
        assert_eq!(store.read_ref("refs/heads/gone".into()).unwrap(), None);
        let refs = store.list_refs().unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].0, "refs/heads/main");
    }

    #[test]
    fn hostile_ref_names_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsStore::open(dir.path()).unwrap();
        let id = ObjectId::from_bytes([7; 20]);
        assert!(store.write_ref("refs/../escape".into(), id).is_err());
        assert!(store.write_ref("refs//double".into(), id).is_err());
    }
}
