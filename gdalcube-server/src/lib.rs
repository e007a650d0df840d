pub use gdalcube::{Error, Result};

pub mod cli;
pub mod server;
pub mod http;
