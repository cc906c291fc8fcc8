pub mod config;
pub mod mirror;
pub mod sync;

pub use config::*;
pub use mirror::*;
pub use sync::*;
