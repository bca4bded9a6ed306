//! Data engineering building blocks: tabular model, record stores, storage,
//! splitting, validation, drift statistics and feature transforms.

pub mod dataset;
pub mod drift;
pub mod encoder;
pub mod schema;
pub mod source;
pub mod split;
pub mod storage;
pub mod transform;
pub mod validate;

pub use dataset::{Dataset, Scalar};
pub use drift::{ColumnDrift, DriftReport, DriftTest, detect_drift};
pub use encoder::LabelEncoder;
pub use schema::{ColumnSchema, ColumnType, SchemaDefinition};
pub use source::{Document, JsonlRecordStore, RecordStore, SqliteRecordStore, open_store};
pub use split::stratified_split;
pub use storage::{read_csv, read_npy, write_csv, write_npy};
pub use transform::{ColumnRoute, FittedTransformer, Route};
pub use validate::{ColumnNameCheck, check_column_names, validate_columns};
