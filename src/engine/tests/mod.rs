//! Engine scenario tests
//!
//! Each scenario seeds SQLite core/archive databases, runs a policy through
//! the orchestrator or the process runner, and checks both stores and the
//! transaction log afterwards.

mod commit;
