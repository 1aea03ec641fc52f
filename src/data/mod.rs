//! Row-shaped data movement: INSERT script loading and table copying.

pub mod batch;
pub mod copier;
pub mod loader;
pub mod transform;

pub use copier::{
    CopyConfig, CopyProgress, CopyReport, CopyStrategy, CrossDatabaseCopier, DataCopier,
    FieldMapping, OnError, TableCopyResult, parse_conditions, parse_mappings,
};
pub use loader::{
    ConflictPolicy, DataInsertConfig, DataLoader, InsertResult, LoadProgress, TableInsertResult,
};
pub use transform::Transform;
