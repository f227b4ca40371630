#[macro_export]
macro_rules! profile {
  ($name:expr) => {
    let _span = tracing::span!(tracing::Level::DEBUG, $name);
    let _enter = _span.enter();
  };
}

pub mod analyze;
pub mod archive;
pub mod auth;
pub mod client;
pub mod config;
pub mod diff;
pub mod error;
pub mod git;
pub mod render;
pub mod retry;
pub mod workflow;

pub use error::{Error, Result};
