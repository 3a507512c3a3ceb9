//! macsentry-watch: LAN presence watch.
//!
//! Sweeps a subnet with nmap, learns the hardware addresses that are
//! normally present, then raises an alarm for any address it has not
//! learned.

pub mod action;
pub mod config;
pub mod engine;
pub mod error;
pub mod nmap_xml;
pub mod scanner;
pub mod whitelist;
