pub mod creator;
pub mod manager;
pub mod target;

pub use creator::{
    CreateDatabaseOptions, CreateFromScriptResult, CreatedObject, DatabaseCreator, IfExists,
};
pub use manager::{DatabaseInfo, DatabaseManager, DatabaseSource, ManagerOptions};
pub use target::TargetSelection;
