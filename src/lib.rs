//! Podcast feed ingestion and catalog synchronization.
//!
//! - [`feed`] - fetch and parse RSS 2.0 / Atom podcast feeds
//! - [`identity`] - content-addressed show and episode identities
//! - [`storage`] - SQLite catalog of shows and episodes
//! - [`sync`] - subscribe, refresh and unsubscribe
//! - [`directory`] - podcast search for candidate feed URLs
//! - [`config`] - TOML configuration

pub mod config;
pub mod directory;
pub mod feed;
pub mod identity;
pub mod storage;
pub mod sync;
pub mod util;
