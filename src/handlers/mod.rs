//! HTTP request handlers
//!
//! - `api` - Health check endpoint
//! - `tts` - Long-form conversion jobs and provider listing

pub mod api;
pub mod tts;
