pub mod config;
pub mod database;
pub mod index;
pub mod query;
pub mod storage;
pub mod table;
