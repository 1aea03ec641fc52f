pub mod ddl;
pub mod insert;
pub mod scanner;

pub use ddl::{ObjectKind, Statement, parse_script, validate_statements};
pub use insert::{InsertParser, InsertStatement, table_names, validate_inserts};
pub use scanner::{RawStatement, StatementSplitter, split_statements};
