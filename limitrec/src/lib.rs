//! limitrec library crate.
//!
//! Records live streams that sit behind a login, an age gate or a password,
//! driving a real browser to authenticate and handing the stream to an
//! external capture tool.

pub mod barrier;
pub mod browser;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod cookies;
pub mod credentials;
pub mod deps;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod recorder;
pub mod utils;

pub use error::{Error, Result};
