pub mod harness;

pub use harness::PgContext;
