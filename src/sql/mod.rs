//! SQL generation module.
//!
//! Fragment-level builders for the statements tally issues against SQLite:
//!
//! - [`query`] - SELECT query builder
//! - [`ddl`] - Data Definition Language (CREATE TABLE, CREATE INDEX, DROP TABLE)
//! - [`dml`] - Data Manipulation Language (INSERT, UPDATE)
//! - [`validate`] - sqlparser-backed statement and expression validation

pub mod ddl;
pub mod dml;
pub mod query;
pub mod validate;

pub use ddl::{ColumnDef, CreateIndex, CreateTable, DataType, DropTable};
pub use dml::{Insert, InsertSource, OnConflict, Update};
pub use query::{Join, JoinType, Query, TableRef};
pub use validate::{is_identifier, validate_expression, validate_sql};
