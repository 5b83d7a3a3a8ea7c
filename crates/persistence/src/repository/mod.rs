//! Repository implementations for database operations

pub mod results;
pub mod runs;

pub use results::*;
pub use runs::*;
