//! Database migrations for the Faultline schema

pub use sea_orm_migration::prelude::*;

mod migration;
pub use migration::Migrator;
