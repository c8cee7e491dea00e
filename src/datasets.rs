use std::fmt;

use serde_yaml::Value;
use stacked_errors::{Result, StackableErr};

use crate::{BuddyError, ContainerRuntime, DatasetSource};

/// A database table and the dataset that populates it. The row count is
/// `None` until it has been queried from the live database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub dataset: String,
    pub row_count: Option<u64>,
}

impl TableInfo {
    pub fn new(name: impl ToString, dataset: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            dataset: dataset.to_string(),
            row_count: None,
        }
    }

    pub fn with_row_count(&self, row_count: u64) -> Self {
        Self {
            row_count: Some(row_count),
            ..self.clone()
        }
    }
}

impl fmt::Display for TableInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row_count {
            Some(count) => write!(
                f,
                "Table {} has {} rows.",
                self.name,
                thousands(count)
            ),
            None => write!(f, "Table {} does not currently exist.", self.name),
        }
    }
}

/// Formats with `,` between groups of three digits
pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut res = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i != 0 && (digits.len() - i) % 3 == 0 {
            res.push(',');
        }
        res.push(c);
    }
    res
}

/// The datasets of a manifest in manifest order, with the tables each one
/// populates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub datasets: Vec<String>,
    pub tables: Vec<TableInfo>,
}

impl Manifest {
    /// Parses newline separated dataset names, as printed by `nycdb
    /// --list-datasets`. Each dataset is assumed to populate one table of the
    /// same name.
    pub fn from_listing(listing: &str) -> Self {
        let datasets: Vec<String> = listing
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        let tables = datasets.iter().map(|d| TableInfo::new(d, d)).collect();
        Self { datasets, tables }
    }

    /// Parses a YAML mapping of dataset names to objects with a `schema` field
    /// that is either one schema object or a list of them. Every schema object
    /// has a `table_name`.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let invalid = BuddyError::InvalidManifest;
        let root: Value = serde_yaml::from_str(yaml).stack()?;
        let mapping = root
            .as_mapping()
            .ok_or_else(|| invalid("the top level is not a mapping".to_owned()))
            .stack()?;
        let mut res = Self::default();
        for (key, dataset) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| invalid(format!("dataset key {key:?} is not a string")))
                .stack()?;
            let schemas = match dataset.get("schema") {
                Some(Value::Sequence(schemas)) => schemas.iter().collect::<Vec<_>>(),
                Some(schema @ Value::Mapping(_)) => vec![schema],
                Some(_) => {
                    return Err(invalid(format!(
                        "the schema of dataset \"{name}\" is neither an object nor a list"
                    )))
                    .stack()
                }
                None => {
                    return Err(invalid(format!("dataset \"{name}\" has no schema"))).stack()
                }
            };
            for schema in schemas {
                let table_name = schema
                    .get("table_name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        invalid(format!(
                            "a schema of dataset \"{name}\" has no `table_name`"
                        ))
                    })
                    .stack()?;
                res.tables.push(TableInfo::new(table_name, name));
            }
            res.datasets.push(name.to_owned());
        }
        Ok(res)
    }

    /// Discovers the manifest by running a throwaway container of `image`
    #[tracing::instrument(skip(runtime))]
    pub async fn discover(
        runtime: &impl ContainerRuntime,
        image: &str,
        source: &DatasetSource,
    ) -> Result<Self> {
        match source {
            DatasetSource::Listing => {
                let cmd = ["nycdb".to_owned(), "--list-datasets".to_owned()];
                let listing = runtime.run_and_remove(image, &cmd).await.stack()?;
                Ok(Self::from_listing(&listing))
            }
            DatasetSource::Manifest { path } => {
                let cmd = ["cat".to_owned(), path.clone()];
                let yaml = runtime.run_and_remove(image, &cmd).await.stack()?;
                Self::from_yaml(&yaml).stack_err_with(|| format!("parsing {path} from {image}"))
            }
        }
    }
}
