//! Schema definition and type inference for datasets.
//!
//! Schemas are YAML documents with a `columns` list of single-entry mappings:
//!
//! ```yaml
//! columns:
//!   - having_IP_Address: int64
//!   - URL_Length: int64
//!   - Result: int64
//! ```

use crate::data::dataset::{Dataset, Scalar};
use crate::error::MlError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Null,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    /// Type tag used in schema files.
    pub fn tag(&self) -> &'static str {
        match self {
            ColumnType::Integer => "int64",
            ColumnType::Float => "float64",
            ColumnType::String | ColumnType::Null => "object",
        }
    }
}

/// Infer a column type from its cells. Missing cells are ignored; a column is
/// numeric only when every present cell is a number.
pub fn infer_column_type<'a>(values: impl IntoIterator<Item = &'a Scalar>) -> ColumnType {
    let mut has_float = false;
    let mut has_int = false;
    for value in values {
        match value {
            Scalar::Text(_) => return ColumnType::String,
            Scalar::Number(n) if n.fract() == 0.0 => has_int = true,
            Scalar::Number(_) => has_float = true,
            Scalar::Missing => {}
        }
    }
    if has_float {
        ColumnType::Float
    } else if has_int {
        ColumnType::Integer
    } else {
        ColumnType::Null
    }
}

/// Schema for a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    /// Type tag as written in the schema file (`int64`, `float64`, `object`, ...).
    pub dtype: String,
}

/// Declared column list a dataset is validated against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDefinition {
    pub columns: Vec<ColumnSchema>,
}

#[derive(Serialize, Deserialize)]
struct SchemaFile {
    columns: Vec<BTreeMap<String, String>>,
}

impl SchemaDefinition {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, MlError> {
        let file: SchemaFile = serde_yaml::from_str(yaml)?;
        let mut columns = Vec::with_capacity(file.columns.len());
        for (position, entry) in file.columns.into_iter().enumerate() {
            if entry.len() != 1 {
                return Err(MlError::invalid_input(format!(
                    "Schema entry {position} must map exactly one column name to a type, found {} keys",
                    entry.len()
                )));
            }
            if let Some((name, dtype)) = entry.into_iter().next() {
                columns.push(ColumnSchema { name, dtype });
            }
        }
        Ok(Self { columns })
    }

    pub fn load(path: &Path) -> Result<Self, MlError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MlError::invalid_input(format!("Failed to read schema {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_string(&self) -> Result<String, MlError> {
        let file = SchemaFile {
            columns: self
                .columns
                .iter()
                .map(|c| BTreeMap::from([(c.name.clone(), c.dtype.clone())]))
                .collect(),
        };
        Ok(serde_yaml::to_string(&file)?)
    }

    /// Derive a schema from a dataset's columns and inferred types.
    pub fn infer(dataset: &Dataset) -> Self {
        let columns = dataset
            .columns()
            .iter()
            .map(|name| ColumnSchema {
                name: name.clone(),
                dtype: dataset
                    .column_type(name)
                    .unwrap_or(ColumnType::Null)
                    .tag()
                    .to_string(),
            })
            .collect();
        Self { columns }
    }
}
