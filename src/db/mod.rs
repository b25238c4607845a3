//! Database layer: driver abstraction, handle registry, SQL Server and SQLite backends

mod connection_string;
mod driver;
mod query;
mod registry;
pub mod sqlite;
pub mod sqlserver;

pub use connection_string::*;
pub use driver::*;
pub use query::*;
pub use registry::*;
