//! HTTP trigger surface for taskloom.
//!
//! Axum-based API at `/api/v1/` with shared-secret authorization, envelope
//! response format, and CORS support.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
