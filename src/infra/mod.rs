pub mod cache;
pub mod db;
pub mod repository;
pub mod storage;
