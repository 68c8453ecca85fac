//! Potato leaf disease detection server.
//!
//! Visitors upload a leaf photo through a form; the image is resized and
//! normalized, classified by a tract model loaded once at startup, and the
//! predicted disease is shown with guidance text.

pub mod config;
pub mod diseases;
pub mod error;
pub mod inference;
pub mod models;
pub mod preprocess;
pub mod render;
pub mod routes;
pub mod upload;
