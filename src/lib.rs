//! Shopscout - store scraping and catalog import/update pipeline
//!
//! This crate turns per-store, data-driven extraction recipes plus XML site
//! maps into a normalized product catalog with price history, availability
//! and shipping metadata. Batches are driven per region by an external
//! scheduler through the entry points in [`application::batch`].

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;
