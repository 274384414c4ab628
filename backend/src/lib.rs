//! Price board backend
//!
//! Aggregates gold, silver and bank currency quotes from several sources
//! into one authoritative price per instrument, and prices jewellery
//! valuations and currency conversions from the published snapshot.

pub mod api;
pub mod config;
pub mod conversion;
pub mod error;
pub mod ingest;
pub mod labels;
pub mod price_resolver;
pub mod quote_store;
pub mod settings;
pub mod snapshot_aggregator;
pub mod source_registry;
pub mod types;
pub mod valuation;
