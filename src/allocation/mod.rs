pub mod engine;
pub mod repository;
pub mod repository_sqlx;
pub mod types;
