//! Task catalog.
//!
//! Tasks are loaded from a TOML file of `[[tasks]]` tables and are
//! immutable afterwards. Each task carries the reference query its
//! submissions are graded against.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

use crate::error::{GraderError, Result};

/// A single exercise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub category: String,
    /// Tag selecting the sample database the task runs against.
    pub database_schema: String,
    /// Reference query that defines the correct result.
    pub gold_query: String,
    /// Tables students may need, for schema hints.
    #[serde(default, deserialize_with = "deserialize_table_list")]
    pub tables_involved: Vec<String>,
}

/// Accepts either a list of names or a comma-separated string.
fn deserialize_table_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TableList {
        List(Vec<String>),
        Joined(String),
    }

    let names = match TableList::deserialize(deserializer)? {
        TableList::List(names) => names,
        TableList::Joined(joined) => joined.split(',').map(str::to_string).collect(),
    };

    Ok(names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

/// Optional filters for [`TaskCatalog::list`]. Matching is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub category: Option<String>,
    pub difficulty: Option<String>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        let field_matches = |wanted: &Option<String>, actual: &str| {
            wanted
                .as_deref()
                .map_or(true, |w| w.eq_ignore_ascii_case(actual))
        };
        field_matches(&self.category, &task.category)
            && field_matches(&self.difficulty, &task.difficulty)
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    tasks: Vec<Task>,
}

/// All known tasks, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    tasks: BTreeMap<i64, Task>,
}

impl TaskCatalog {
    /// Loads a catalog from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GraderError::catalog(format!(
                "Failed to read task catalog {}: {e}",
                path.display()
            ))
        })?;
        let catalog = Self::from_toml(&content).map_err(|e| match e {
            GraderError::Catalog(msg) => {
                GraderError::catalog(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        debug!("Loaded {} tasks from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Parses a catalog from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content)
            .map_err(|e| GraderError::catalog(format!("Invalid task catalog:\n  {e}")))?;
        Self::from_tasks(file.tasks)
    }

    /// Builds a catalog, rejecting non-positive and duplicate ids.
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Result<Self> {
        let mut by_id = BTreeMap::new();
        for task in tasks {
            if task.task_id <= 0 {
                return Err(GraderError::catalog(format!(
                    "Task id must be positive, got {}",
                    task.task_id
                )));
            }
            if task.gold_query.trim().is_empty() {
                return Err(GraderError::catalog(format!(
                    "Task {} has an empty gold_query",
                    task.task_id
                )));
            }
            let id = task.task_id;
            if by_id.insert(id, task).is_some() {
                return Err(GraderError::catalog(format!("Duplicate task id {id}")));
            }
        }
        Ok(Self { tasks: by_id })
    }

    /// Looks up a task by id.
    pub fn get(&self, task_id: i64) -> Result<&Task> {
        self.tasks
            .get(&task_id)
            .ok_or_else(|| GraderError::catalog(format!("Task {task_id} not found")))
    }

    /// Tasks matching the filter, ordered by id.
    pub fn list(&self, filter: &TaskFilter) -> Vec<&Task> {
        self.tasks.values().filter(|t| filter.matches(t)).collect()
    }

    /// Distinct non-empty categories, sorted.
    pub fn categories(&self) -> Vec<String> {
        distinct(self.tasks.values().map(|t| t.category.as_str()))
    }

    /// Distinct non-empty difficulty levels, sorted.
    pub fn difficulties(&self) -> Vec<String> {
        distinct(self.tasks.values().map(|t| t.difficulty.as_str()))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    values
        .filter(|v| !v.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}
