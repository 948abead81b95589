pub mod api_util;
pub mod cache;
pub mod cipher_util;
pub mod config;
pub mod expiry;
pub mod run;
pub mod scoreboard;
