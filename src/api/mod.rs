mod error;
pub mod models;
mod server;
pub mod services;
pub mod state;
pub mod stream;

pub use error::ApiError;
pub use server::{router, run};
