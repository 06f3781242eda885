pub mod api;
pub mod service;
pub mod storage;
pub mod sync;
pub mod uploader;
pub mod utils;
