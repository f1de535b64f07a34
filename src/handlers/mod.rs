pub mod config;
pub mod reverse;

pub use self::config::*;
pub use self::reverse::*;
