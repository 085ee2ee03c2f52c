pub mod crypto;
pub mod error;
pub mod models;
pub mod session;
pub mod storage;
