/// Separator used when composing logical paths for reporting.
pub const SEPARATOR: char = '/';

/// A member path as stored inside an archive, split into clean segments.
///
/// Archive formats store member names with either separator, with leading
/// slashes, `.` components and occasionally `..`. None of that is used for
/// filesystem access here, but the segments still have to be normalized so
/// that [`FileEntry::name`](super::FileEntry) never contains a separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberPath {
    segments: Vec<String>,
}

impl MemberPath {
    /// Parse a raw member path from an archive header.
    pub fn parse(raw: &str) -> Self {
        let mut segments: Vec<String> = Vec::new();
        for segment in raw.split(['/', '\\']) {
            if segment.is_empty() || segment == "." {
                continue;
            } else if segment == ".." {
                segments.pop();
            } else {
                segments.push(segment.to_string());
            }
        }
        MemberPath { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The last segment, used as the entry name.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// Everything before the last segment, joined with [`SEPARATOR`].
    pub fn dir(&self) -> String {
        match self.segments.split_last() {
            Some((_, dirs)) => dirs.join("/"),
            None => String::new(),
        }
    }
}

/// Join two logical path fragments, skipping empty ones.
pub fn join(parent: &str, child: &str) -> String {
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (false, true) => parent.to_string(),
        (false, false) => format!("{parent}{SEPARATOR}{child}"),
    }
}
