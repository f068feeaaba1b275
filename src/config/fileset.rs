//! Resolution of file-set globs to concrete test files.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use globset::GlobBuilder;
use walkdir::WalkDir;

use crate::error::{KettleError, Result};

/// Resolve every pattern in order, dropping duplicates.
///
/// A pattern without glob metacharacters names a file (or a directory, which
/// contributes every file below it). `*` never crosses a `/`; `**` does.
pub fn resolve(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();

    for pattern in patterns {
        for path in resolve_one(pattern)? {
            if seen.insert(path.clone()) {
                paths.push(path);
            }
        }
    }

    Ok(paths)
}

/// True when `word` should be read as a path or glob rather than a name.
pub fn is_path_like(word: &str) -> bool {
    word.contains('/') || has_glob_meta(word) || Path::new(word).is_file()
}

pub fn has_glob_meta(text: &str) -> bool {
    text.contains(['*', '?', '[', '{'])
}

fn resolve_one(pattern: &str) -> Result<Vec<PathBuf>> {
    let normalized = pattern.strip_prefix("./").unwrap_or(pattern);

    if !has_glob_meta(normalized) {
        let path = Path::new(normalized);
        if path.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }
        if path.is_dir() {
            return Ok(walk_files(path).collect());
        }
        return Ok(Vec::new());
    }

    let matcher = GlobBuilder::new(normalized)
        .literal_separator(true)
        .build()
        .map_err(|e| KettleError::GlobPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?
        .compile_matcher();

    let base = literal_base(normalized);
    let relative = base.as_os_str().is_empty();
    let root = if relative {
        PathBuf::from(".")
    } else {
        base
    };
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let matches = walk_files(&root)
        .map(|path| {
            if relative {
                path.strip_prefix(".").map(Path::to_path_buf).unwrap_or(path)
            } else {
                path
            }
        })
        .filter(|path| matcher.is_match(path))
        .collect();

    Ok(matches)
}

/// Leading path components that contain no glob metacharacters.
fn literal_base(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    for component in Path::new(pattern).components() {
        if let Component::Normal(part) = component {
            if has_glob_meta(&part.to_string_lossy()) {
                break;
            }
        }
        base.push(component);
    }
    base
}

fn walk_files(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!("skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn double_star_descends_and_single_star_does_not() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "unit/a_test.yml");
        touch(tmp.path(), "unit/deep/b_test.yml");
        touch(tmp.path(), "unit/helper.yml");
        let root = tmp.path().display();

        let deep = resolve(&[format!("{}/**/*_test.yml", root)]).unwrap();
        assert_eq!(deep.len(), 2);

        let shallow = resolve(&[format!("{}/unit/*_test.yml", root)]).unwrap();
        assert_eq!(shallow, vec![tmp.path().join("unit/a_test.yml")]);
    }

    #[test]
    fn overlapping_patterns_do_not_duplicate() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a_test.yml");
        let root = tmp.path().display();

        let paths = resolve(&[
            format!("{}/*_test.yml", root),
            format!("{}/a_test.yml", root),
        ])
        .unwrap();
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn literal_directory_contributes_all_files() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "suite/one.yml");
        touch(tmp.path(), "suite/two.yml");

        let paths = resolve(&[tmp.path().join("suite").display().to_string()]).unwrap();
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn nothing_matches_yields_empty() {
        let tmp = TempDir::new().unwrap();
        let paths = resolve(&[format!("{}/nope/**/*.yml", tmp.path().display())]).unwrap();
        assert!(paths.is_empty());
    }

    #[test]
    fn invalid_glob_is_reported() {
        let err = resolve(&["test/[*.yml".to_string()]).unwrap_err();
        assert!(matches!(err, KettleError::GlobPattern { .. }));
    }

    #[test]
    fn path_like_words() {
        assert!(is_path_like("test/unit"));
        assert!(is_path_like("*_test.yml"));
        assert!(!is_path_like("MathTest"));
        assert!(!is_path_like("1-2"));
    }
}
