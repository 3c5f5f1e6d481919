//! Flowmail Segment Engine
//!
//! Compiles segment predicate trees into parameterized SQL, rebinds
//! placeholders for query composition, and provides the Postgres
//! repositories that evaluate compiled predicates and maintain membership.

pub mod compiler;
pub mod db;
pub mod rebind;

pub use compiler::{CompileError, CompiledQuery, compile};
pub use db::{PgContactRepository, PgContactSegmentQueueRepository, PgSegmentRepository};
pub use rebind::rebind;
