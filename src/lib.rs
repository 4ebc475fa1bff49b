//! Scrape-and-reconcile pipeline for ISQ course evaluation data.
//!
//! [`scraper::Scraper`] drives the portal through a rate-limited
//! [`http::FetchClient`], extracts rows with [`page::Page`] and feeds them to a
//! [`reconcile::Reconciler`] backed by a [`reconcile::Store`].

pub mod cli;
pub mod config;
pub mod http;
pub mod logging;
pub mod models;
pub mod page;
pub mod reconcile;
pub mod scraper;
pub mod utils;
