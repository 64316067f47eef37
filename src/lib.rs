//! Scrapes price listings of African stock exchanges into normalised
//! ticker snapshots and persists them per exchange.

pub mod config;
pub mod models;
pub mod pipeline;
pub mod scraper;
pub mod storage;
pub mod utils;
