//! HTTP request handlers.

pub mod artifacts;
pub mod blob;
pub mod common;
pub mod health;
pub mod upload;
pub mod webhook;

pub use artifacts::*;
pub use blob::*;
pub use common::*;
pub use health::*;
pub use upload::*;
pub use webhook::*;
