//! Debrid Resolver - turns magnet links into direct stream URLs
//!
//! Resolution goes through Real-Debrid, AllDebrid or TorBox. Concurrent
//! requests for the same torrent share one provider round trip, and pack
//! listings are cached in SQLite.

pub mod config;
pub mod db;
pub mod services;
