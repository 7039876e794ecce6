//! winqdb - an embeddable SQL store driven by a chainable statement builder
//!
//! Statements are built in code rather than parsed from text:
//!
//! ```ignore
//! let db = Database::memory();
//! let mut handle = db.handle();
//! handle.open()?;
//! handle.create_table("users", vec![
//!     Column::new("id", ColumnType::Integer).primary_key(),
//!     Column::new("name", ColumnType::Text),
//! ])?;
//! handle.insert_into("users").values([literal(1), literal("ann")]).execute()?;
//! let names: Vec<String> = handle.select([column("name")]).from("users").all_values()?;
//! ```
//!
//! The crate provides:
//! - Expression and statement builders rendering canonical SQL
//! - Query planning and execution
//! - MVCC-based transaction support
//! - Pluggable storage engines

pub mod config;
pub mod error;
pub mod sql;
pub mod storage;

pub use config::Config;
pub use error::{Error, ErrorCode, Result};
pub use sql::{
    chain::{Delete, Insert, Select, Update},
    engine::{Database, Handle, PreparedStatement, Step},
    expr::{
        BinaryOperator, BindParameter, Expression, OrderDirection, OrderingTerm, ResultColumn, UnaryOperator, bind,
        bind_named, column, compare, count_all, function, literal, not, subquery,
    },
    schema::{Column, Table},
    statement::{Compile, SelectStatement, Statement, StatementBuilder, StatementKind},
    types::{ColumnType, FromColumn, Row, ToColumn, Value},
};
pub use storage::{disk::DiskEngine, memory::MemoryEngine};
