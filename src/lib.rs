//! HTTP service that captions uploaded images in a selectable style.
//!
//! A CLIP vision encoder and a GPT-2 language model are loaded once at startup
//! and shared read-only by every request.

pub mod captioner;
pub mod config;
pub mod download;
pub mod error;
pub mod models;
mod page;
pub mod routes;
pub mod state;
pub mod styles;
pub mod upload;

pub use routes::router;
