//! Core types shared by the source, target and copy engine:
//!
//! - [`schema`]: column metadata and reconciliation
//! - [`value`]: owned cell values and row batches
//! - [`identifier`]: identifier validation and bracket quoting

pub mod identifier;
pub mod schema;
pub mod value;

pub use schema::{reconcile, ColumnDescriptor, DropReason, ReconciledColumns};
pub use value::{Row, RowBatch, SqlNullType, SqlValue};
