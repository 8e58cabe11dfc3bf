//! Database connection utilities

pub use sea_orm;
mod connection;

pub use connection::{establish_connection, DatabaseError, DbConnection};
