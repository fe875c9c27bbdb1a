//! `#import "file"` preprocessing.
//!
//! Flattens a source file and everything it imports into one program string.
//! Each file is included at most once per [`Importer`]; later imports of an
//! already loaded file expand to nothing, which also breaks import cycles.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};

const IMPORT_DIRECTIVE: &str = "#import";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}:{line}: malformed import, expected `#import \"file\"`", path.display())]
    Malformed { path: PathBuf, line: usize },
}

#[derive(Debug, Default)]
pub struct Importer {
    loaded: HashSet<PathBuf>,
}

impl Importer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files already pulled in, as canonical paths.
    pub fn loaded(&self) -> impl Iterator<Item = &Path> {
        self.loaded.iter().map(PathBuf::as_path)
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<String, ImportError> {
        let path = path.as_ref();
        let path = fs::canonicalize(path).map_err(|source| ImportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if !self.loaded.insert(path.clone()) {
            trace!(path = %path.display(), "already imported, skipping");
            return Ok(String::new());
        }
        let text = fs::read_to_string(&path).map_err(|source| ImportError::Read {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "loading source");

        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut output = vec![];
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if !line.starts_with(IMPORT_DIRECTIVE) {
                output.push(line.to_owned());
                continue;
            }
            let Some(target) = quoted_target(line) else {
                return Err(ImportError::Malformed {
                    path,
                    line: index + 1,
                });
            };
            output.push(self.load(base.join(target))?);
        }
        Ok(output.join("\n"))
    }
}

fn quoted_target(line: &str) -> Option<&str> {
    let start = line.find('"')? + 1;
    let end = line.rfind('"')?;
    (start < end).then(|| &line[start..end])
}

#[test]
fn test_quoted_target() -> anyhow::Result<()> {
    assert_eq!(quoted_target(r#"#import "lib/util.bf""#), Some("lib/util.bf"));
    assert_eq!(quoted_target(r#"#import  "a.bf"  "#), Some("a.bf"));
    assert_eq!(quoted_target("#import a.bf"), None);
    assert_eq!(quoted_target(r#"#import """#), None);
    assert_eq!(quoted_target(r#"#import ""#), None);
    Ok(())
}
