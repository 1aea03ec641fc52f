pub mod reporter;

pub use reporter::{Reporter, format_duration};
