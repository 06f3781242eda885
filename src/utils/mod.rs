pub mod config;
pub mod log_buffer;
pub mod logging;
