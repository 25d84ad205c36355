//! Ref update commands as sent to `git-receive-pack`.

use bstr::{BStr, BString};

use git_wire_core::ObjectId;

/// One ref update the client asks the server to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a new ref pointing at `new`.
    Create {
        /// The object the new ref will point at.
        new: ObjectId,
        /// The full ref name.
        name: BString,
    },
    /// Delete an existing ref which currently points at `old`.
    Delete {
        /// The object the ref points at now, for the server's check.
        old: ObjectId,
        /// The full ref name.
        name: BString,
    },
    /// Move an existing ref from `old` to `new`.
    Update {
        /// The expected current target.
        old: ObjectId,
        /// The new target.
        new: ObjectId,
        /// The full ref name.
        name: BString,
    },
}

impl Command {
    /// The ref this command targets.
    pub fn name(&self) -> &BStr {
        match self {
            Command::Create { name, .. }
            | Command::Delete { name, .. }
            | Command::Update { name, .. } => name.as_slice().into(),
        }
    }

    /// The old side of the command; zero for creations.
    pub fn old(&self) -> ObjectId {
        match self {
            Command::Create { .. } => ObjectId::ZERO,
            Command::Delete { old, .. } | Command::Update { old, .. } => *old,
        }
    }

    /// The new side of the command; zero for deletions.
    pub fn new(&self) -> ObjectId {
        match self {
            Command::Delete { .. } => ObjectId::ZERO,
            Command::Create { new, .. } | Command::Update { new, .. } => *new,
        }
    }

    /// Whether this command deletes its ref.
    pub fn is_delete(&self) -> bool {
        matches!(self, Command::Delete { .. })
    }

    /// The wire form `<old> SP <new> SP <name>`, without capability suffix
    /// or newline.
    pub fn line(&self) -> BString {
        let mut line = BString::from(format!("{} {} ", self.old().to_hex(), self.new().to_hex()));
        line.extend_from_slice(self.name());
        line
    }
}
