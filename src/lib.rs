pub mod cli;
pub mod config;
pub mod pipeline;
pub mod service;
pub mod source;
pub mod storage;
pub mod stream;
