//! Storage layer for price data
//!
//! This module provides the PostgreSQL schema, the bulk COPY loader, the
//! bulk-load session settings and the store the pipeline runs against.

mod copy;
mod repository;
mod schema;
mod session;
mod traits;

pub use copy::*;
pub use repository::*;
pub use schema::*;
pub use session::*;
pub use traits::*;
