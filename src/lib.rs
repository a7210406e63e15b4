pub mod background;
pub mod config;
pub mod cursor;
pub mod driver;
pub mod error;
pub mod prefetch;
pub mod remote;
pub mod utils;
