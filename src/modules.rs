use crate::error::{MutationError, Result};
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub const MODULE_EXTENSION: &str = "py";

fn is_module(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == MODULE_EXTENSION)
}

/// Python modules at or below `module_path`.
///
/// A file is yielded only when it has a `.py` extension; a directory is
/// walked recursively. A path that does not exist yields nothing.
pub fn find_modules(module_path: &Path) -> Box<dyn Iterator<Item = Result<PathBuf>>> {
    if module_path.is_file() {
        let found: Option<Result<PathBuf>> = is_module(module_path).then(|| Ok(module_path.to_path_buf()));
        Box::new(found.into_iter())
    } else if module_path.is_dir() {
        let walker = WalkDir::new(module_path).sort_by_file_name().into_iter();
        Box::new(walker.filter_map(|entry| match entry {
            Ok(entry) => (entry.file_type().is_file() && is_module(entry.path()))
                .then(|| Ok(entry.into_path())),
            Err(e) => Some(Err(MutationError::from(e))),
        }))
    } else {
        Box::new(std::iter::empty())
    }
}

/// Removes `paths` matched by any of the exclusion globs.
pub fn filter_paths<I, S>(paths: I, excluded_patterns: &[S]) -> Result<BTreeSet<PathBuf>>
where
    I: IntoIterator<Item = PathBuf>,
    S: AsRef<str>,
{
    let mut excluded = HashSet::new();
    for pattern in excluded_patterns {
        let matches = resolve_glob(pattern.as_ref())?;
        debug!(pattern = pattern.as_ref(), matches = matches.len(), "resolved exclusion");
        excluded.extend(matches);
    }

    Ok(paths
        .into_iter()
        .map(|path| normalize_path(&path))
        .filter(|path| !excluded.contains(path))
        .collect())
}

/// Expands a glob against the filesystem.
///
/// Supports `*`, `?`, `[...]` and `**` (any number of directories). Relative
/// patterns are resolved from the current directory. Names starting with `.`
/// are only matched when a pattern component itself starts with `.`.
pub fn resolve_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut base = PathBuf::new();
    let mut rest: Vec<String> = Vec::new();

    for component in Path::new(pattern).components() {
        let text = component.as_os_str().to_string_lossy();
        if rest.is_empty() && !has_glob_meta(&text) {
            base.push(component);
        } else {
            rest.push(text.into_owned());
        }
    }

    if rest.is_empty() {
        return Ok(if base.exists() {
            vec![normalize_path(&base)]
        } else {
            Vec::new()
        });
    }

    let root = if base.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base
    };
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let matcher = glob_to_regex(&rest.join("/"))?;
    let mut walker = WalkDir::new(&root).min_depth(1);
    if !rest.iter().any(|c| c.contains("**")) {
        walker = walker.max_depth(rest.len());
    }
    // Wildcards skip hidden entries unless the pattern names one explicitly.
    let hidden_allowed = rest.iter().any(|c| c.starts_with('.'));

    let mut matches = Vec::new();
    let entries = walker
        .into_iter()
        .filter_entry(|e| hidden_allowed || e.depth() == 0 || !is_hidden(e.file_name()));
    for entry in entries {
        let entry = entry?;
        let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if matcher.is_match(&relative) {
            matches.push(normalize_path(entry.path()));
        }
    }

    Ok(matches)
}

fn is_hidden(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn has_glob_meta(text: &str) -> bool {
    text.contains(['*', '?', '['])
}

fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut regex = String::from("^");
    let mut chars = glob.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        regex.push_str("(?:.*/)?");
                    } else {
                        regex.push_str(".*");
                    }
                } else {
                    regex.push_str("[^/]*");
                }
            }
            '?' => regex.push_str("[^/]"),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == ']' {
                        closed = true;
                        break;
                    }
                    class.push(n);
                }
                if closed && !class.is_empty() {
                    regex.push('[');
                    let members = match class.strip_prefix('!') {
                        Some(negated) => {
                            regex.push('^');
                            negated
                        }
                        None => class.as_str(),
                    };
                    for m in members.chars() {
                        if matches!(m, '\\' | '[' | '^' | '&' | '~') {
                            regex.push('\\');
                        }
                        regex.push(m);
                    }
                    regex.push(']');
                } else {
                    regex.push_str(&regex::escape(&format!("[{}", class)));
                    if closed {
                        regex.push_str(&regex::escape("]"));
                    }
                }
            }
            other => regex.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }

    regex.push('$');
    Ok(Regex::new(&regex)?)
}

/// Lexically normalizes `path` by dropping `.` components, so paths coming
/// from a directory walk, a glob and a diff compare equal.
pub fn normalize_path(path: &Path) -> PathBuf {
    let normalized: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}
