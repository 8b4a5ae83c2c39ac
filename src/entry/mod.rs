mod content;
mod path;

pub use content::Content;
pub use path::{MemberPath, SEPARATOR, join};

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// One extracted or yet-to-be-expanded file.
///
/// `full_path` is a logical path used for reporting only; it never refers to
/// anything on the local filesystem.
#[derive(Debug)]
pub struct FileEntry {
    /// The member's own filename, without separators. A root opened from
    /// disk holds the path it was opened with instead.
    pub name: String,
    /// Full logical path of whatever produced this entry; empty for the root.
    pub parent_path: String,
    pub content: Content,
    /// Recursion depth at which this entry was produced (root = 0).
    pub depth: u32,
    /// Whether `content` is already fully materialized.
    pub passthrough: bool,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, parent_path: impl Into<String>, content: Content) -> Self {
        FileEntry {
            name: name.into(),
            parent_path: parent_path.into(),
            content,
            depth: 0,
            passthrough: false,
        }
    }

    /// Wrap a file on disk as a depth-0 root entry.
    ///
    /// The root keeps an empty `parent_path` and carries the path exactly as
    /// given in `name`, so reported paths start from what the caller passed.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(FileEntry::new(
            path.to_string_lossy(),
            "",
            Content::from_file(file)?,
        ))
    }

    /// Build a child of `parent` from a member path stored in a container.
    ///
    /// Directory components of `member_path` are folded into `parent_path` so
    /// the child's `name` is a bare filename.
    pub fn child(parent: &FileEntry, member_path: &str, content: Content) -> Self {
        let member = MemberPath::parse(member_path);
        let name = member.file_name().unwrap_or_default().to_string();
        let parent_path = join(&parent.full_path(), &member.dir());
        FileEntry {
            name,
            parent_path,
            content,
            depth: parent.depth + 1,
            passthrough: true,
        }
    }

    /// Materialize `reader` into a scoped temporary resource and wrap it as a child.
    pub fn spooled_child<R: Read + ?Sized>(
        parent: &FileEntry,
        member_path: &str,
        reader: &mut R,
        threshold: usize,
    ) -> io::Result<Self> {
        let content = Content::spool(reader, threshold)?;
        Ok(FileEntry::child(parent, member_path, content))
    }

    /// Move the content out, leaving an empty stream behind.
    ///
    /// Used by handlers whose backend takes ownership of the byte stream
    /// while the entry itself is still needed to name the children.
    pub fn take_content(&mut self) -> Content {
        std::mem::replace(&mut self.content, Content::from_bytes(Vec::new()))
    }

    /// Same name and lineage with empty content, for naming children while
    /// the real content is borrowed by a reader.
    pub fn detached(&self) -> FileEntry {
        FileEntry {
            name: self.name.clone(),
            parent_path: self.parent_path.clone(),
            content: Content::from_bytes(Vec::new()),
            depth: self.depth,
            passthrough: self.passthrough,
        }
    }

    /// `parent_path` + separator + `name`.
    pub fn full_path(&self) -> String {
        join(&self.parent_path, &self.name)
    }

    pub fn len(&self) -> u64 {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
