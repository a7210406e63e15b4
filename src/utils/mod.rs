pub mod scalar;
pub mod util;
