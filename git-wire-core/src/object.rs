//! The object model carried by packfiles and the store seam.

use bstr::BString;

use crate::hash::ObjectId;

/// The four first-class Git object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// A commit.
    Commit,
    /// A tree.
    Tree,
    /// A blob.
    Blob,
    /// An annotated tag.
    Tag,
}

impl ObjectKind {
    /// The type code used in pack entry headers.
    pub fn pack_code(&self) -> u8 {
        match self {
            ObjectKind::Commit => 1,
            ObjectKind::Tree => 2,
            ObjectKind::Blob => 3,
            ObjectKind::Tag => 4,
        }
    }

    /// Maps a pack entry type code back to a kind. Codes 6 and 7 are delta
    /// encodings, not object kinds, and yield `None` like the reserved codes.
    pub fn from_pack_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ObjectKind::Commit),
            2 => Some(ObjectKind::Tree),
            3 => Some(ObjectKind::Blob),
            4 => Some(ObjectKind::Tag),
            _ => None,
        }
    }

    /// The name used in loose-object headers and `ls-tree` style output.
    pub fn name(&self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::Tree => "tree",
            ObjectKind::Blob => "blob",
            ObjectKind::Tag => "tag",
        }
    }

    /// Parses a kind name as found in loose-object headers.
    pub fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"commit" => Some(ObjectKind::Commit),
            b"tree" => Some(ObjectKind::Tree),
            b"blob" => Some(ObjectKind::Blob),
            b"tag" => Some(ObjectKind::Tag),
            _ => None,
        }
    }
}

/// A materialized object: its kind plus the raw payload without the loose
/// header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// The object kind.
    pub kind: ObjectKind,
    /// The payload bytes.
    pub data: Vec<u8>,
}

impl Object {
    /// Creates an object from a kind and payload.
    pub fn new(kind: ObjectKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    /// Computes this object's content-addressed id.
    pub fn id(&self) -> ObjectId {
        ObjectId::for_object(self.kind, &self.data)
    }
}

/// The ids an object refers to, with the entry name when the reference came
/// from a tree. Used for reachability walks and delta path hints.
///
/// Malformed bodies are tolerated by stopping early; graph walks treat a
/// truncated object as a leaf rather than failing the whole traversal.
pub fn referenced_ids(kind: ObjectKind, data: &[u8]) -> Vec<(ObjectId, Option<BString>)> {
    match kind {
        ObjectKind::Blob => Vec::new(),
        ObjectKind::Commit => header_ids(data, &[b"tree", b"parent"]),
        ObjectKind::Tag => header_ids(data, &[b"object"]),
        ObjectKind::Tree => tree_entry_ids(data),
    }
}

/// The parent commit ids of a commit payload.
pub fn commit_parents(data: &[u8]) -> Vec<ObjectId> {
    header_ids(data, &[b"parent"])
        .into_iter()
        .map(|(id, _)| id)
        .collect()
}

/// Scans the header block (everything before the first empty line) for
/// `<field> <40-hex>` lines matching one of `fields`.
fn header_ids(data: &[u8], fields: &[&[u8]]) -> Vec<(ObjectId, Option<BString>)> {
    let mut out = Vec::new();
    for line in data.split(|&b| b == b'\n') {
        if line.is_empty() {
            break;
        }
        let Some(space) = line.iter().position(|&b| b == b' ') else {
            continue;
        };
        let (field, rest) = (&line[..space], &line[space + 1..]);
        if fields.contains(&field) {
            if let Ok(id) = ObjectId::from_hex(rest) {
                out.push((id, None));
            }
        }
    }
    out
}

/// Walks tree entries of the form `<mode> SP <name> NUL <20 raw bytes>`.
fn tree_entry_ids(data: &[u8]) -> Vec<(ObjectId, Option<BString>)> {
    let mut out = Vec::new();
    let mut rest = data;
    loop {
        let Some(nul) = rest.iter().position(|&b| b == 0) else {
            break;
        };
        if rest.len() < nul + 1 + ObjectId::LEN {
            break;
        }
        let entry = &rest[..nul];
        let name = entry
            .iter()
            .position(|&b| b == b' ')
            .map(|space| BString::from(&entry[space + 1..]));
        if let Ok(id) = ObjectId::from_slice(&rest[nul + 1..nul + 1 + ObjectId::LEN]) {
            out.push((id, name));
        }
        rest = &rest[nul + 1 + ObjectId::LEN..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_codes_round_trip() {
        for kind in [
            ObjectKind::Commit,
            ObjectKind::Tree,
            ObjectKind::Blob,
            ObjectKind::Tag,
        ] {
            assert_eq!(ObjectKind::from_pack_code(kind.pack_code()), Some(kind));
        }
        assert_eq!(ObjectKind::from_pack_code(0), None);
        assert_eq!(ObjectKind::from_pack_code(6), None);
        assert_eq!(ObjectKind::from_pack_code(7), None);
    }

    #[test]
    fn commit_references_tree_and_parents() {
        let commit = b"tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
                       parent 0123456789abcdef0123456789abcdef01234567\n\
                       author A <a@example.com> 0 +0000\n\
                       \n\
                       message\n";
        let refs = referenced_ids(ObjectKind::Commit, commit);
        assert_eq!(refs.len(), 2);
        assert_eq!(
            refs[0].0.to_hex(),
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904"
        );
    }

    #[test]
    fn tree_references_entries_with_names() {
        let mut tree = Vec::new();
        tree.extend_from_slice(b"100644 hello.txt\0");
        tree.extend_from_slice(&[0x11; 20]);
        tree.extend_from_slice(b"40000 sub\0");
        tree.extend_from_slice(&[0x22; 20]);
        let refs = referenced_ids(ObjectKind::Tree, &tree);
        assert_eq!(refs.len(), 2);
        assert_eq!(
            refs[0].1.as_ref().map(|n| n.as_slice()),
            Some(b"hello.txt".as_slice())
        );
        assert_eq!(refs[1].1.as_ref().map(|n| n.as_slice()), Some(b"sub".as_slice()));
    }

    #[test]
    fn truncated_tree_stops_without_panicking() {
        let mut tree = Vec::new();
        tree.extend_from_slice(b"100644 partial\0");
        tree.extend_from_slice(&[0x33; 7]);
        assert!(referenced_ids(ObjectKind::Tree, &tree).is_empty());
    }
}
