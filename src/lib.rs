pub mod app;
pub mod archive;
pub mod config;
pub mod convert;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod output;
pub mod pattern;
pub mod report;
pub mod retry;
pub mod session;
pub mod store;
