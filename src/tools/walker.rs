//! Expands the argument list into regular-file inputs.
//!
//! The walk is lazy: directories are only read as the dispatcher pulls entries, so
//! jobs start while a large tree is still being traversed. Bad arguments and bad
//! tree entries come out as `Err` items and the walk carries on.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::trace;
use walkdir::WalkDir;

use super::naming::Source;
use crate::error::BzError;

/// A path that could not be turned into an input.
#[derive(Debug)]
pub struct WalkError {
    pub path: PathBuf,
    pub error: BzError,
}

pub struct Walker {
    args: std::vec::IntoIter<PathBuf>,
    recursive: bool,
    tree: Option<walkdir::IntoIter>,
}

impl Walker {
    pub fn new(args: Vec<PathBuf>, recursive: bool) -> Self {
        Self {
            args: args.into_iter(),
            recursive,
            tree: None,
        }
    }

    fn next_in_tree(&mut self) -> Option<Result<Source, WalkError>> {
        let tree = self.tree.as_mut()?;
        for entry in tree {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    return Some(Ok(Source::File(entry.into_path())))
                }
                Ok(entry) => trace!("skipping {}", entry.path().display()),
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    let error = BzError::Io(io::Error::from(e));
                    return Some(Err(WalkError { path, error }));
                }
            }
        }
        self.tree = None;
        None
    }

    fn expand_arg(&mut self, arg: PathBuf) -> Option<Result<Source, WalkError>> {
        if arg.as_os_str() == "-" {
            return Some(Ok(Source::Stdin));
        }
        match fs::metadata(&arg) {
            Err(e) => Some(Err(WalkError {
                path: arg,
                error: e.into(),
            })),
            Ok(meta) if meta.is_dir() => {
                if self.recursive {
                    // Sorting makes walkdir list a directory in full before yielding
                    // from it, so outputs written beside their inputs never show up
                    // as new inputs.
                    let tree = WalkDir::new(&arg).follow_links(false).sort_by_file_name();
                    self.tree = Some(tree.into_iter());
                    None
                } else {
                    Some(Err(WalkError {
                        path: arg,
                        error: BzError::path("is a directory (use -r to process recursively)"),
                    }))
                }
            }
            Ok(_) => Some(Ok(Source::File(arg))),
        }
    }
}

impl Iterator for Walker {
    type Item = Result<Source, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.next_in_tree() {
                return Some(item);
            }
            let arg = self.args.next()?;
            if let Some(item) = self.expand_arg(arg) {
                return Some(item);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeSet;

    fn files(items: &[Result<Source, WalkError>]) -> BTreeSet<PathBuf> {
        items
            .iter()
            .filter_map(|i| match i {
                Ok(Source::File(p)) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn dash_is_stdin() {
        let items: Vec<_> = Walker::new(vec![PathBuf::from("-")], false).collect();
        assert!(matches!(items.as_slice(), [Ok(Source::Stdin)]));
    }

    #[test]
    fn missing_path_does_not_stop_the_walk() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.txt");
        fs::write(&good, b"x").unwrap();
        let missing = dir.path().join("missing.txt");

        let items: Vec<_> = Walker::new(vec![missing.clone(), good.clone()], false).collect();
        assert_eq!(items.len(), 2);
        match &items[0] {
            Err(WalkError { path, error: BzError::Io(_) }) => assert_eq!(path, &missing),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(files(&items), BTreeSet::from([good]));
    }

    #[test]
    fn directory_without_recursion_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), b"x").unwrap();
        let items: Vec<_> = Walker::new(vec![dir.path().to_path_buf()], false).collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(WalkError { error: BzError::Path(_), .. })));
    }

    #[test]
    fn recursion_yields_every_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub/deeper")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        for p in ["a.txt", "sub/b.txt", "sub/deeper/c.txt"] {
            fs::write(root.join(p), p).unwrap();
        }
        let items: Vec<_> = Walker::new(vec![root.to_path_buf()], true).collect();
        assert!(items.iter().all(|i| i.is_ok()));
        assert_eq!(
            files(&items),
            BTreeSet::from([
                root.join("a.txt"),
                root.join("sub/b.txt"),
                root.join("sub/deeper/c.txt"),
            ])
        );
    }
}
