use crate::error::{MutationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tree_sitter::{Node, Point};

/// Node kind the Python grammar uses for chained and simple comparisons.
const COMPARISON_KIND: &str = "comparison_operator";

/// Relational comparison operators of the Python language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl RelOp {
    pub const ALL: [RelOp; 10] = [
        RelOp::Eq,
        RelOp::NotEq,
        RelOp::Lt,
        RelOp::LtE,
        RelOp::Gt,
        RelOp::GtE,
        RelOp::Is,
        RelOp::IsNot,
        RelOp::In,
        RelOp::NotIn,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RelOp::Eq => "Eq",
            RelOp::NotEq => "NotEq",
            RelOp::Lt => "Lt",
            RelOp::LtE => "LtE",
            RelOp::Gt => "Gt",
            RelOp::GtE => "GtE",
            RelOp::Is => "Is",
            RelOp::IsNot => "IsNot",
            RelOp::In => "In",
            RelOp::NotIn => "NotIn",
        }
    }

    /// Source text of the operator.
    pub fn token(self) -> &'static str {
        match self {
            RelOp::Eq => "==",
            RelOp::NotEq => "!=",
            RelOp::Lt => "<",
            RelOp::LtE => "<=",
            RelOp::Gt => ">",
            RelOp::GtE => ">=",
            RelOp::Is => "is",
            RelOp::IsNot => "is not",
            RelOp::In => "in",
            RelOp::NotIn => "not in",
        }
    }

    pub fn from_token(token: &str) -> Option<RelOp> {
        RelOp::ALL.into_iter().find(|op| op.token() == token)
    }

    /// Operator carried by `node` when it is the operator token of a comparison.
    ///
    /// The `in` of a `for` loop and the `in` nested inside a `not in` token
    /// are not comparison operators and yield `None`.
    pub fn of_node(node: Node<'_>) -> Option<RelOp> {
        let parent = node.parent()?;
        if parent.kind() != COMPARISON_KIND {
            return None;
        }
        RelOp::from_token(node.kind())
    }
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A source position: 1-based line, 0-based column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl From<Point> for Position {
    fn from(point: Point) -> Self {
        Self {
            line: point.row + 1,
            column: point.column,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The construct a mutation puts in place of the original operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replacement {
    pub operator: RelOp,
    pub start: Position,
    pub end: Position,
}

/// Replaces one relational operator with another.
///
/// Each operator owns its `from`/`to` pair, so two operators built in the
/// same loop never share state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOperator {
    name: String,
    from: RelOp,
    to: RelOp,
}

impl MutationOperator {
    pub fn new(from: RelOp, to: RelOp) -> Result<Self> {
        if from == to {
            return Err(MutationError::InvalidInput(format!(
                "cannot replace {} with itself",
                from
            )));
        }
        Ok(Self::pair(from, to))
    }

    fn pair(from: RelOp, to: RelOp) -> Self {
        Self {
            name: format!("Replace{}With{}", from.name(), to.name()),
            from,
            to,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn from_op(&self) -> RelOp {
        self.from
    }

    pub fn to_op(&self) -> RelOp {
        self.to
    }

    pub fn description(&self) -> String {
        format!("replace {} with {}", self.from, self.to)
    }

    pub fn applies_to(&self, node: Node<'_>) -> bool {
        RelOp::of_node(node) == Some(self.from)
    }

    /// The replacement for `node`, or `None` when the operator does not apply.
    /// The tree itself is never modified.
    pub fn mutate(&self, node: Node<'_>) -> Option<Replacement> {
        if !self.applies_to(node) {
            return None;
        }
        Some(Replacement {
            operator: self.to,
            start: node.start_position().into(),
            end: node.end_position().into(),
        })
    }

    /// Source ranges this operator would rewrite in `node`.
    pub fn mutation_positions(&self, node: Node<'_>) -> Vec<(Position, Position)> {
        if !self.applies_to(node) {
            return Vec::new();
        }
        vec![(node.start_position().into(), node.end_position().into())]
    }
}

impl fmt::Display for MutationOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Immutable table of every available mutation operator.
#[derive(Debug, Clone)]
pub struct OperatorCatalog {
    operators: Vec<MutationOperator>,
}

impl OperatorCatalog {
    /// Builds one operator per ordered pair of distinct relational operators.
    pub fn new() -> Self {
        let count = RelOp::ALL.len();
        let mut operators = Vec::with_capacity(count * (count - 1));
        for from in RelOp::ALL {
            for to in RelOp::ALL {
                if from != to {
                    operators.push(MutationOperator::pair(from, to));
                }
            }
        }
        Self { operators }
    }

    pub fn get(&self, name: &str) -> Option<&MutationOperator> {
        self.operators.iter().find(|op| op.name() == name)
    }

    /// Looks up every name, in the order given. Fails on the first unknown
    /// or repeated one.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<&MutationOperator>> {
        let mut seen = HashSet::new();
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                if !seen.insert(name) {
                    return Err(MutationError::Config(format!(
                        "operator {} selected more than once",
                        name
                    )));
                }
                self.get(name)
                    .ok_or_else(|| MutationError::UnknownOperator(name.to_string()))
            })
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operators.iter().map(MutationOperator::name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MutationOperator> {
        self.operators.iter()
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

impl Default for OperatorCatalog {
    fn default() -> Self {
        Self::new()
    }
}
