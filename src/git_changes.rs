use crate::error::{MutationError, Result};
use crate::modules::normalize_path;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str;
use tracing::{debug, info};

/// Lines added or changed per file, relative to a baseline reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffLineSet {
    files: HashMap<PathBuf, BTreeSet<usize>>,
}

impl DiffLineSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<I>(&mut self, path: impl AsRef<Path>, lines: I)
    where
        I: IntoIterator<Item = usize>,
    {
        self.files
            .entry(normalize_path(path.as_ref()))
            .or_default()
            .extend(lines);
    }

    /// Changed lines of `path`; `None` means the file has no changes at all.
    ///
    /// Falls back to the canonical form of `path`, so a module named
    /// relatively still finds changes keyed by an absolute path.
    pub fn lines_for(&self, path: &Path) -> Option<&BTreeSet<usize>> {
        self.files.get(&normalize_path(path)).or_else(|| {
            fs::canonicalize(path)
                .ok()
                .and_then(|canonical| self.files.get(&canonical))
        })
    }

    pub fn contains_file(&self, path: &Path) -> bool {
        self.lines_for(path).is_some()
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Re-keys every path relative to `dir` as a canonical absolute path.
    /// Files that no longer exist keep the joined path.
    pub fn rebase(self, dir: &Path) -> Result<Self> {
        let root = fs::canonicalize(dir)?;
        let files = self
            .files
            .into_iter()
            .map(|(path, lines)| {
                let joined = root.join(path);
                let key = fs::canonicalize(&joined).unwrap_or_else(|_| normalize_path(&joined));
                (key, lines)
            })
            .collect();
        Ok(Self { files })
    }
}

pub fn run_git_command(args: &[&str], repo_dir: &Path) -> Result<Vec<String>> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| MutationError::Git(format!("Failed to execute git command: {}", e)))?;

    if !output.status.success() {
        let stderr = str::from_utf8(&output.stderr).unwrap_or("Unknown error");
        return Err(MutationError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    let stdout = str::from_utf8(&output.stdout)
        .map_err(|e| MutationError::Git(format!("Invalid UTF-8 in git output: {}", e)))?;

    Ok(stdout.lines().map(|s| s.to_string()).collect())
}

/// Lines changed in `repo_dir` since `baseline`.
///
/// Returns `Ok(None)` when no baseline is configured, meaning nothing is
/// filtered. Any git failure is an error: it must never widen the filter.
pub fn git_filters(baseline: Option<&str>, repo_dir: &Path) -> Result<Option<DiffLineSet>> {
    let Some(baseline) = baseline else {
        return Ok(None);
    };

    let diff_args = &["diff", "--relative", "-U0", baseline, "."];
    let diff_output = run_git_command(diff_args, repo_dir)?;
    let lines = parse_diff(&diff_output)?.rebase(repo_dir)?;

    info!(
        baseline,
        files = lines.len(),
        "computed changed lines against baseline"
    );
    Ok(Some(lines))
}

/// Parses zero-context unified diff output into a [`DiffLineSet`].
pub fn parse_diff<S: AsRef<str>>(diff_output: &[S]) -> Result<DiffLineSet> {
    let hunk_regex = Regex::new(r"^@@ -\d+(?:,\d+)? \+(\d+)(?:,(\d+))? @@")?;
    let mut current_file: Option<PathBuf> = None;
    let mut lines = DiffLineSet::new();

    for line in diff_output {
        let line = line.as_ref();

        if line.starts_with("@@") {
            let captures = hunk_regex
                .captures(line)
                .ok_or_else(|| MutationError::Diff(format!("Invalid hunk header: {}", line)))?;

            let start_line = parse_number(&captures[1], line)?;
            let num_lines = match captures.get(2) {
                Some(count) => parse_number(count.as_str(), line)?,
                None => 1,
            };

            // Pure deletions touch no line of the new file.
            if num_lines == 0 {
                continue;
            }

            let file = current_file.as_ref().ok_or_else(|| {
                MutationError::Diff(format!("Hunk before any file header: {}", line))
            })?;
            let end_line = start_line.checked_add(num_lines).ok_or_else(|| {
                MutationError::Diff(format!("Hunk range out of bounds: {}", line))
            })?;
            debug!(file = %file.display(), start_line, num_lines, "hunk");
            lines.insert(file, start_line..end_line);
        } else if let Some(path) = line.strip_prefix("+++ b/") {
            current_file = Some(PathBuf::from(path));
        } else if line == "+++ /dev/null" {
            current_file = None;
        }
    }

    Ok(lines)
}

fn parse_number(text: &str, line: &str) -> Result<usize> {
    text.parse()
        .map_err(|_| MutationError::Diff(format!("Invalid line number in hunk header: {}", line)))
}
