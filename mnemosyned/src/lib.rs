pub mod config;
pub mod db;
pub mod purge;
pub mod storage;
