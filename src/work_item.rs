use crate::config::SessionConfig;
use crate::error::Result;
use crate::operators::Position;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One located candidate mutation awaiting execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub job_id: String,
    pub module_path: PathBuf,
    pub operator_name: String,
    pub occurrence: usize,
    pub start_pos: Position,
    pub end_pos: Position,
}

impl WorkItem {
    /// Creates a work item with a fresh random job id.
    pub fn new(
        module_path: impl Into<PathBuf>,
        operator_name: impl Into<String>,
        occurrence: usize,
        start_pos: Position,
        end_pos: Position,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4().simple().to_string(),
            module_path: module_path.into(),
            operator_name: operator_name.into(),
            occurrence,
            start_pos,
            end_pos,
        }
    }

    /// Everything that identifies the mutation except the job id.
    pub fn location(&self) -> (&Path, &str, usize, Position, Position) {
        (
            self.module_path.as_path(),
            self.operator_name.as_str(),
            self.occurrence,
            self.start_pos,
            self.end_pos,
        )
    }
}

/// Destination for a generated session.
pub trait WorkStore {
    /// Persists the configuration the session was generated from.
    fn set_config(&mut self, config: &SessionConfig) -> Result<()>;

    /// Removes every stored work item and result.
    fn clear(&mut self) -> Result<()>;

    fn add_work_items<I>(&mut self, work_items: I) -> Result<()>
    where
        I: IntoIterator<Item = WorkItem>;

    /// Clears the store, then records `config` and `work_items`.
    ///
    /// Stores that can should override this so a failure part way through
    /// leaves the previous session intact.
    fn replace_session<I>(&mut self, config: &SessionConfig, work_items: I) -> Result<()>
    where
        I: IntoIterator<Item = WorkItem>,
    {
        self.clear()?;
        self.set_config(config)?;
        self.add_work_items(work_items)
    }
}
