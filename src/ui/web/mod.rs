pub mod api;
pub mod response;

pub use api::{start, Config};
