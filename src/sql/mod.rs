//! SQL processing module
//!
//! - `types`: values, column types and typed conversions
//! - `expr`: expression builder and evaluator
//! - `statement`: statement builder and compiled statements
//! - `schema`: table and column definitions
//! - `plan`: execution plan generation
//! - `executor`: query and mutation execution
//! - `engine`: database, handles and prepared statements
//! - `chain`: statement builders bound to a handle

pub mod chain;
pub mod engine;
pub mod executor;
pub mod expr;
pub mod plan;
pub mod schema;
pub mod statement;
pub mod types;
