//! # Database Crate
//!
//! This crate is the application's only PostgreSQL adapter. It owns the calculation and
//! template store, the report execution journal, and read-only access to the warehouse.
//!
//! ## Architectural Principles
//!
//! - **Layer 3 Adapter:** All database-specific logic lives here. The compiler and
//!   registry never see a connection; they produce SQL text and bind values which
//!   `WarehouseReader` runs.
//! - **Runtime-checked queries:** Statements use `sqlx::query`/`query_as` with explicit
//!   binds, so the crate builds without a live database.
//! - **Asynchronous & Pooled:** All operations are asynchronous and share one `PgPool`.
//!
//! ## Public API
//!
//! - `connect` / `run_migrations`: pool creation and schema setup.
//! - `DbRepository`: definitions, templates and the execution journal.
//! - `WarehouseReader`: runs compiled report statements and decodes typed cells.
//! - `DbError`: the specific error types that can be returned from this crate.

pub mod connection;
pub mod error;
pub mod repository;
pub mod warehouse;

pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use repository::{DbRepository, ExecutionLogEntry};
pub use warehouse::WarehouseReader;

// Callers hold the pool without depending on sqlx themselves.
pub use sqlx::PgPool;
