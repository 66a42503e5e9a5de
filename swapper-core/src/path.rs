use crate::nitrofs::{Directory, EntryRef, FileEntry};
use crate::{Result, SwapError};

impl Directory {
    /// Walks `path` from this directory. Segments are separated by `/` and
    /// matched exactly; empty segments stay where they are, so `""` and a
    /// trailing slash name the directory itself.
    pub fn get_path(&self, path: &str) -> Result<EntryRef<'_>> {
        let mut current = EntryRef::Directory(self);

        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            let dir = match current {
                EntryRef::Directory(dir) => dir,
                EntryRef::File(_) => return Err(SwapError::PathNotFound(segment.to_string())),
            };
            current = dir
                .child(segment)
                .ok_or_else(|| SwapError::PathNotFound(segment.to_string()))?
                .entry_ref();
        }

        Ok(current)
    }

    pub fn get_file(&self, path: &str) -> Result<&FileEntry> {
        match self.get_path(path)? {
            EntryRef::File(file) => Ok(file),
            EntryRef::Directory(_) => Err(SwapError::NotAFile(path.to_string())),
        }
    }

    pub fn get_dir(&self, path: &str) -> Result<&Directory> {
        match self.get_path(path)? {
            EntryRef::Directory(dir) => Ok(dir),
            EntryRef::File(_) => Err(SwapError::NotADirectory(path.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::fixture::{build_image, FixtureNode};
    use crate::nitrofs::{read_file_system, Directory, EntryRef};
    use crate::SwapError;
    use std::io::Cursor;

    fn tree() -> Directory {
        let image = build_image(&[
            FixtureNode::dir(
                "a",
                vec![FixtureNode::dir("b", vec![FixtureNode::file("c", b"ccc")])],
            ),
            FixtureNode::file("Readme", b"r"),
        ]);
        read_file_system(&mut Cursor::new(image)).unwrap()
    }

    fn failed_segment(root: &Directory, path: &str) -> String {
        match root.get_path(path) {
            Err(SwapError::PathNotFound(segment)) => segment,
            other => panic!("expected PathNotFound for {path:?}, got {other:?}"),
        }
    }

    #[test]
    fn resolves_every_declared_prefix() {
        let root = tree();
        assert!(matches!(root.get_path("a").unwrap(), EntryRef::Directory(d) if d.name == "a"));
        assert!(matches!(root.get_path("a/b").unwrap(), EntryRef::Directory(d) if d.name == "b"));
        assert_eq!(root.get_file("a/b/c").unwrap().length, 3);
    }

    #[test]
    fn empty_path_and_trailing_slash_stay_put() {
        let root = tree();
        assert!(matches!(root.get_path("").unwrap(), EntryRef::Directory(d) if std::ptr::eq(d, &root)));
        assert!(matches!(root.get_path("/").unwrap(), EntryRef::Directory(d) if std::ptr::eq(d, &root)));

        let b = root.get_dir("a/b").unwrap();
        assert!(std::ptr::eq(root.get_dir("a/b/").unwrap(), b));
        assert!(matches!(b.get_path("").unwrap(), EntryRef::Directory(d) if std::ptr::eq(d, b)));
        assert_eq!(root.get_file("/a/b/c/").unwrap().name, "c");
    }

    #[test]
    fn reports_first_missing_segment() {
        let root = tree();
        assert_eq!(failed_segment(&root, "x/b/c"), "x");
        assert_eq!(failed_segment(&root, "a/x/c"), "x");
        assert_eq!(failed_segment(&root, "a/b/c/d"), "d");
    }

    #[test]
    fn matching_is_exact() {
        let root = tree();
        assert_eq!(failed_segment(&root, "readme"), "readme");
        assert_eq!(failed_segment(&root, "a/*"), "*");
        assert_eq!(failed_segment(&root, "a/b/.."), "..");
    }

    #[test]
    fn kind_mismatches_are_reported() {
        let root = tree();
        assert!(matches!(root.get_file("a/b"), Err(SwapError::NotAFile(p)) if p == "a/b"));
        assert!(matches!(root.get_dir("Readme"), Err(SwapError::NotADirectory(p)) if p == "Readme"));
    }
}
