pub mod query;
pub mod roster;
pub mod types;

pub use query::*;
pub use types::*;
