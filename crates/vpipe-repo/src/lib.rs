//! Postgres job repository.
//!
//! Durable store for jobs and their event history. All mutations are
//! single-transaction; scheduling selection takes row locks so a second
//! scheduler tick cannot double-dispatch.

pub mod error;
pub mod repository;

pub use error::{RepoError, RepoResult};
pub use repository::JobRepository;
