use crate::ast::{filter_nodes, parse_module, LocatedNode};
use crate::config::SessionConfig;
use crate::error::{MutationError, Result};
use crate::git_changes::{git_filters, DiffLineSet};
use crate::modules::{filter_paths, find_modules, normalize_path};
use crate::operators::OperatorCatalog;
use crate::work_item::{WorkItem, WorkStore};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Every work item for the given modules and operators.
///
/// Modules are visited in the order given, operators in the order named.
/// With `filters`, modules without changed lines are skipped and only
/// nodes touching a changed line are considered. Occurrences count from
/// zero per module and operator.
pub fn all_work_items<P, S>(
    catalog: &OperatorCatalog,
    module_paths: &[P],
    operator_names: &[S],
    python_version: &str,
    filters: Option<&DiffLineSet>,
) -> Result<Vec<WorkItem>>
where
    P: AsRef<Path>,
    S: AsRef<str>,
{
    let operators = catalog.resolve(operator_names)?;
    let mut work_items = Vec::new();

    for module_path in module_paths {
        let module_path = normalize_path(module_path.as_ref());
        let module = parse_module(&module_path, python_version)?;

        let nodes: Vec<LocatedNode<'_>> = match filters {
            Some(filters) => match filters.lines_for(&module_path) {
                Some(lines) => filter_nodes(module.nodes(), lines),
                None => {
                    debug!(module = %module_path.display(), "no changed lines, skipping");
                    continue;
                }
            },
            None => module.nodes().collect(),
        };

        let generated = work_items.len();
        for operator in &operators {
            let mut occurrence = 0;
            for node in &nodes {
                for (start_pos, end_pos) in operator.mutation_positions(node.node) {
                    work_items.push(WorkItem::new(
                        module_path.clone(),
                        operator.name(),
                        occurrence,
                        start_pos,
                        end_pos,
                    ));
                    occurrence += 1;
                }
            }
        }

        info!(
            module = %module_path.display(),
            nodes = nodes.len(),
            items = work_items.len() - generated,
            "generated work items"
        );
    }

    Ok(work_items)
}

/// Modules named by the configuration, minus the excluded ones, sorted.
pub fn discover_modules(config: &SessionConfig) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for module_path in &config.module_path {
        if !module_path.exists() {
            return Err(MutationError::Config(format!(
                "module path {} does not exist",
                module_path.display()
            )));
        }
        for module in find_modules(module_path) {
            found.push(module?);
        }
    }

    let modules = filter_paths(found, &config.excluded_modules)?;
    info!(count = modules.len(), "discovered modules");
    Ok(modules.into_iter().collect())
}

/// Operator names a configuration selects, defaulting to the whole catalog.
pub fn selected_operators(config: &SessionConfig, catalog: &OperatorCatalog) -> Vec<String> {
    if config.operators.is_empty() {
        catalog.names().map(str::to_string).collect()
    } else {
        config.operators.clone()
    }
}

/// Replaces the content of `work_store` with a freshly generated session.
///
/// Every item is generated before the store is touched, and the store
/// replaces its content in one step, so a failure leaves previously stored
/// items, results and configuration in place.
pub fn init<W: WorkStore>(
    module_paths: &[PathBuf],
    work_store: &mut W,
    config: &SessionConfig,
    filters: Option<&DiffLineSet>,
) -> Result<usize> {
    let catalog = OperatorCatalog::new();
    let operator_names = selected_operators(config, &catalog);

    let work_items = all_work_items(
        &catalog,
        module_paths,
        &operator_names,
        &config.python_version,
        filters,
    )?;
    let count = work_items.len();

    work_store.replace_session(config, work_items)?;

    info!(count, operators = operator_names.len(), "session initialized");
    Ok(count)
}

/// Discovers modules, computes the baseline diff in `repo_dir` when one is
/// configured, and initializes `work_store`.
pub fn init_session<W: WorkStore>(
    config: &SessionConfig,
    work_store: &mut W,
    repo_dir: &Path,
) -> Result<usize> {
    config.validate()?;
    let modules = discover_modules(config)?;
    let filters = git_filters(config.baseline.as_deref(), repo_dir)?;
    init(&modules, work_store, config, filters.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::Position;
    use std::fs;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, source: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, source).unwrap();
        path
    }

    fn locations(items: &[WorkItem]) -> Vec<(PathBuf, String, usize, Position, Position)> {
        items
            .iter()
            .map(|i| {
                (
                    i.module_path.clone(),
                    i.operator_name.clone(),
                    i.occurrence,
                    i.start_pos,
                    i.end_pos,
                )
            })
            .collect()
    }

    #[test]
    fn test_occurrences_follow_traversal_order() {
        let dir = tempdir().unwrap();
        let module = write(
            dir.path(),
            "m.py",
            "def f(a, b):\n    return a < b and b < a\n",
        );
        let catalog = OperatorCatalog::new();

        let items = all_work_items(&catalog, &[&module], &["ReplaceLtWithGt"], "3", None).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].occurrence, 0);
        assert_eq!(items[0].start_pos, Position::new(2, 13));
        assert_eq!(items[0].end_pos, Position::new(2, 14));
        assert_eq!(items[1].occurrence, 1);
        assert_eq!(items[1].start_pos, Position::new(2, 23));
        assert!(items.iter().all(|i| i.module_path == module));
    }

    #[test]
    fn test_occurrence_resets_per_operator_and_module() {
        let dir = tempdir().unwrap();
        let first = write(dir.path(), "a.py", "x = a == b\ny = c == d\n");
        let second = write(dir.path(), "b.py", "z = e == f\n");
        let catalog = OperatorCatalog::new();

        let items = all_work_items(
            &catalog,
            &[&first, &second],
            &["ReplaceEqWithNotEq", "ReplaceEqWithLt"],
            "3",
            None,
        )
        .unwrap();

        let summary: Vec<(&str, &str, usize)> = items
            .iter()
            .map(|i| {
                (
                    i.module_path.file_name().unwrap().to_str().unwrap(),
                    i.operator_name.as_str(),
                    i.occurrence,
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a.py", "ReplaceEqWithNotEq", 0),
                ("a.py", "ReplaceEqWithNotEq", 1),
                ("a.py", "ReplaceEqWithLt", 0),
                ("a.py", "ReplaceEqWithLt", 1),
                ("b.py", "ReplaceEqWithNotEq", 0),
                ("b.py", "ReplaceEqWithLt", 0),
            ]
        );
    }

    #[test]
    fn test_generation_is_deterministic() {
        let dir = tempdir().unwrap();
        let module = write(
            dir.path(),
            "m.py",
            "if a is None or b not in c:\n    d = e >= f != g\n",
        );
        let catalog = OperatorCatalog::new();
        let names: Vec<&str> = catalog.names().collect();

        let first = all_work_items(&catalog, &[&module], &names, "3", None).unwrap();
        let second = all_work_items(&catalog, &[&module], &names, "3", None).unwrap();

        assert!(!first.is_empty());
        assert_eq!(locations(&first), locations(&second));
        assert!(first
            .iter()
            .zip(&second)
            .all(|(a, b)| a.job_id != b.job_id));
    }

    #[test]
    fn test_location_triple_is_unique() {
        let dir = tempdir().unwrap();
        let module = write(dir.path(), "m.py", "a < b < c\nd in e\n");
        let catalog = OperatorCatalog::new();
        let names: Vec<&str> = catalog.names().collect();

        let items = all_work_items(&catalog, &[&module], &names, "3", None).unwrap();
        let mut keys: Vec<_> = items
            .iter()
            .map(|i| (i.module_path.clone(), i.operator_name.clone(), i.occurrence))
            .collect();
        let total = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), total);
        // Two `<` and one `in`, each replaced by 9 other operators.
        assert_eq!(total, 27);
    }

    #[test]
    fn test_diff_filter_restricts_nodes() {
        let dir = tempdir().unwrap();
        let module = write(dir.path(), "m.py", "x = a == b\ny = c == d\n");
        let mut filters = DiffLineSet::new();
        filters.insert(&module, [2]);
        let catalog = OperatorCatalog::new();

        let items = all_work_items(
            &catalog,
            &[&module],
            &["ReplaceEqWithNotEq"],
            "3",
            Some(&filters),
        )
        .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].occurrence, 0);
        assert_eq!(items[0].start_pos.line, 2);
    }

    #[test]
    fn test_diff_filter_skips_unchanged_module() {
        let dir = tempdir().unwrap();
        let changed = write(dir.path(), "changed.py", "x = 1\n");
        let untouched = write(dir.path(), "untouched.py", "x = a == b\n");
        let mut filters = DiffLineSet::new();
        filters.insert(&changed, [1]);
        let catalog = OperatorCatalog::new();

        let items = all_work_items(
            &catalog,
            &[&changed, &untouched],
            &["ReplaceEqWithNotEq"],
            "3",
            Some(&filters),
        )
        .unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_unknown_operator_fails_before_parsing() {
        let catalog = OperatorCatalog::new();
        let err = all_work_items(
            &catalog,
            &[Path::new("/does/not/exist.py")],
            &["ReplaceEqWithWalrus"],
            "3",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, MutationError::UnknownOperator(_)));
    }

    #[test]
    fn test_parse_failure_is_propagated() {
        let dir = tempdir().unwrap();
        let module = write(dir.path(), "bad.py", "def f(:\n");
        let catalog = OperatorCatalog::new();
        let err = all_work_items(&catalog, &[&module], &["ReplaceEqWithNotEq"], "3", None)
            .unwrap_err();
        assert!(matches!(err, MutationError::Parse { .. }));
    }

    #[test]
    fn test_module_without_matches_is_not_an_error() {
        let dir = tempdir().unwrap();
        let module = write(dir.path(), "empty.py", "");
        let catalog = OperatorCatalog::new();
        let items =
            all_work_items(&catalog, &[&module], &["ReplaceEqWithNotEq"], "3", None).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_discover_modules_applies_exclusions() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "");
        write(dir.path(), "b.py", "");
        write(dir.path(), "c.txt", "");

        let toml = format!(
            "module-path = {:?}\nexcluded-modules = [{:?}]",
            dir.path().display().to_string(),
            format!("{}/b.*", dir.path().display())
        );
        let config = SessionConfig::from_toml_str(&toml).unwrap();
        let modules = discover_modules(&config).unwrap();
        assert_eq!(modules, vec![dir.path().join("a.py")]);
    }

    #[test]
    fn test_discover_modules_rejects_missing_path() {
        let config = SessionConfig::from_toml_str("module-path = \"/no/such/pkg\"").unwrap();
        assert!(matches!(
            discover_modules(&config),
            Err(MutationError::Config(_))
        ));
    }

    #[test]
    fn test_selected_operators_default_to_catalog() {
        let catalog = OperatorCatalog::new();
        let config = SessionConfig::from_toml_str("module-path = \"pkg\"").unwrap();
        assert_eq!(selected_operators(&config, &catalog).len(), catalog.len());

        let config = SessionConfig::from_toml_str(
            "module-path = \"pkg\"\noperators = [\"ReplaceInWithNotIn\"]",
        )
        .unwrap();
        assert_eq!(selected_operators(&config, &catalog), vec!["ReplaceInWithNotIn"]);
    }
}
