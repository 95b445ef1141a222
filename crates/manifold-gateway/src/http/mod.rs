pub mod admin;
pub mod completions;
pub mod error;
pub mod health;
pub mod models;
pub mod react;
