//! Concrete [`Driver`](crate::Driver) implementations.

pub mod postgres;

pub use postgres::PostgresDriver;
