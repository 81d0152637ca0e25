// sheetbot-daemon library entry point.

pub mod attachment;
pub mod auth;
pub mod cache;
pub mod config;
pub mod notify;
pub mod remote;
pub mod runtime;
pub mod tables;
pub mod telegram;
