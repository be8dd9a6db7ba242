//! mg-db - Database endpoints and script execution for Migrid
//!
//! Defines the `Dest` endpoint model, the abstract `SqlRunner` capability
//! used by the executor, a `psql`-subprocess implementation, and the
//! bookkeeping-function I/O (persisted version lists, digests and rerun
//! fingerprints).

pub mod dest;
pub mod digest_io;
pub mod error;
pub mod psql;
pub mod traits;

pub use dest::{Dest, DEFAULT_SCHEMA};
pub use error::{DbError, DbResult};
pub use psql::PsqlRunner;
pub use traits::{ExitResult, OnLine, SqlRunner};
