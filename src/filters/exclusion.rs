use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use tracing::debug;

use crate::source::read_lines;
use crate::types::{SCOPE_SEPARATOR, normalize_name};

/// Dataset names that are dropped unconditionally.
///
/// Names are stored normalized and without scope, so `scope:name`, `name`
/// and `name/` all exclude the same dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionList {
    names: BTreeSet<String>,
}

impl ExclusionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load one name per line from every file in `paths`.
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let list: Self = read_lines(paths)?.iter().map(String::as_str).collect();
        debug!(files = paths.len(), names = list.len(), "exclusion list loaded.");
        Ok(list)
    }

    pub fn insert(&mut self, name: &str) -> bool {
        self.names.insert(Self::key(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&Self::key(name))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn key(name: &str) -> String {
        let bare = name
            .split_once(SCOPE_SEPARATOR)
            .map_or(name, |(_, bare)| bare);
        normalize_name(bare.trim())
    }
}

impl<'a> FromIterator<&'a str> for ExclusionList {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        let mut list = ExclusionList::new();
        for name in iter {
            list.insert(name);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn names_are_normalized() {
        let list: ExclusionList = ["user.jdoe:user.jdoe.a", "user.jdoe.b/"].into_iter().collect();
        assert!(list.contains("user.jdoe.a"));
        assert!(list.contains("user.jdoe.a/"));
        assert!(list.contains("user.jdoe:user.jdoe.b"));
        assert!(!list.contains("user.jdoe.c"));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn load_from_files() {
        let mut first = tempfile::NamedTempFile::new().unwrap();
        writeln!(first, "user.jdoe.a\n\nuser.jdoe.b").unwrap();
        let mut second = tempfile::NamedTempFile::new().unwrap();
        writeln!(second, "user.jdoe.a/").unwrap();

        let list = ExclusionList::load(&[first.path().to_path_buf(), second.path().to_path_buf()]).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.contains("user.jdoe.b"));
    }

    #[test]
    fn empty_list_excludes_nothing() {
        let list = ExclusionList::load(&[]).unwrap();
        assert!(list.is_empty());
        assert!(!list.contains("anything"));
    }
}
