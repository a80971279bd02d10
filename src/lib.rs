//! Policy-driven archive and purge engine.
//!
//! Policies name the tables to clean up, a filter template for each, and a
//! commit strategy that splits the work into batches. Every batch moves the
//! matching rows from the core database into the archive database (or just
//! deletes them) and commits both sides together.

pub mod config;
pub mod db;
pub mod dialect;
pub mod engine;
pub mod observability;
pub mod policy;
