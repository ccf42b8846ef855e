use crate::error::{MutationError, Result};
use crate::operators::Position;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tree_sitter::{Node, Parser, Tree, TreeCursor};

/// A Python module together with its syntax tree.
pub struct ParsedModule {
    path: PathBuf,
    source: String,
    tree: Tree,
}

impl ParsedModule {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Every node of the tree, parents before children and siblings in
    /// source order. Each call starts a fresh traversal.
    pub fn nodes(&self) -> AstNodes<'_> {
        AstNodes::new(self.tree.root_node())
    }
}

/// Reads and parses the module at `path`.
///
/// `python_version` is handed through to the parser untouched; the grammar
/// covers every Python 3 release.
pub fn parse_module(path: &Path, python_version: &str) -> Result<ParsedModule> {
    let source = fs::read_to_string(path).map_err(|e| {
        MutationError::Config(format!("cannot read module {}: {}", path.display(), e))
    })?;
    debug!(path = %path.display(), python_version, "parsing module");
    parse_source(path, source)
}

pub fn parse_source(path: impl Into<PathBuf>, source: impl Into<String>) -> Result<ParsedModule> {
    let path = path.into();
    let source = source.into();

    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| MutationError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;

    let tree = parser
        .parse(&source, None)
        .ok_or_else(|| MutationError::Parse {
            path: path.clone(),
            reason: "parser produced no tree".to_string(),
        })?;

    if tree.root_node().has_error() {
        let reason = AstNodes::new(tree.root_node())
            .find(|n| n.node.is_error() || n.node.is_missing())
            .map(|n| format!("syntax error at line {}", n.start_line))
            .unwrap_or_else(|| "syntax error".to_string());
        return Err(MutationError::Parse { path, reason });
    }

    Ok(ParsedModule { path, source, tree })
}

/// A syntax node with its inclusive line span.
#[derive(Debug, Clone, Copy)]
pub struct LocatedNode<'tree> {
    pub node: Node<'tree>,
    pub start_line: usize,
    pub end_line: usize,
}

impl<'tree> LocatedNode<'tree> {
    pub fn new(node: Node<'tree>) -> Self {
        let start = node.start_position();
        let end = node.end_position();
        let start_line = start.row + 1;
        // A node ending right after a newline stops on the previous line.
        let end_line = if end.column == 0 && end.row > start.row {
            end.row
        } else {
            end.row + 1
        };
        Self {
            node,
            start_line,
            end_line,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.node.kind()
    }

    pub fn start_pos(&self) -> Position {
        self.node.start_position().into()
    }

    pub fn end_pos(&self) -> Position {
        self.node.end_position().into()
    }

    /// True when any line of the span is in `lines`.
    pub fn overlaps(&self, lines: &BTreeSet<usize>) -> bool {
        lines.range(self.start_line..=self.end_line).next().is_some()
    }
}

/// Lazy pre-order walk over a syntax tree.
pub struct AstNodes<'tree> {
    cursor: TreeCursor<'tree>,
    done: bool,
}

impl<'tree> AstNodes<'tree> {
    pub fn new(root: Node<'tree>) -> Self {
        Self {
            cursor: root.walk(),
            done: false,
        }
    }
}

impl<'tree> Iterator for AstNodes<'tree> {
    type Item = LocatedNode<'tree>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let node = self.cursor.node();

        if !self.cursor.goto_first_child() {
            loop {
                if self.cursor.goto_next_sibling() {
                    break;
                }
                if !self.cursor.goto_parent() {
                    self.done = true;
                    break;
                }
            }
        }

        Some(LocatedNode::new(node))
    }
}

/// Keeps the nodes whose span touches at least one line in `lines`.
pub fn filter_nodes<'tree, I>(nodes: I, lines: &BTreeSet<usize>) -> Vec<LocatedNode<'tree>>
where
    I: IntoIterator<Item = LocatedNode<'tree>>,
{
    nodes.into_iter().filter(|node| node.overlaps(lines)).collect()
}
