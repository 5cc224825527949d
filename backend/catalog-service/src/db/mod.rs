/// Database access layer
///
/// Repository functions over the shared `PgPool`; the pool itself is
/// constructed in the binaries and injected.
pub mod product_repo;

pub use product_repo::AppendOutcome;
