//! Persistence implementations

pub mod memory;
#[cfg(feature = "postgres")]
pub mod admission_repository;
#[cfg(feature = "postgres")]
pub mod call_summary_repository;
#[cfg(feature = "postgres")]
pub mod database;
#[cfg(feature = "postgres")]
pub mod session_repository;

pub use memory::{InMemoryAdmissionDirectory, InMemoryCallSessionStore, InMemoryCallSummaryRepository};
#[cfg(feature = "postgres")]
pub use admission_repository::PgAdmissionDirectory;
#[cfg(feature = "postgres")]
pub use call_summary_repository::PgCallSummaryRepository;
#[cfg(feature = "postgres")]
pub use database::{create_pool, run_migrations};
#[cfg(feature = "postgres")]
pub use session_repository::PgCallSessionStore;
