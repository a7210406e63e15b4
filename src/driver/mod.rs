pub mod connection;
pub mod status;

pub use connection::{Connection, CursorHandle};
pub use status::ReturnCode;
