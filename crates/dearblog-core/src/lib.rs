pub mod config;
pub mod error;
pub mod io;
pub mod paths;
pub mod preview;
pub mod toolchain;

pub use error::{BlogError, Result};
