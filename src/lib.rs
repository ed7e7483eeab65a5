pub mod database;
pub mod exec;
pub mod service;
pub mod ui;
