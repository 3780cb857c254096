//! Versos Core - Shared domain types.
//!
//! This crate provides the types used across all Versos components:
//! - `storefront` - Public catalog, cart and checkout service
//! - `cli` - Command-line tools for migrations and seeding
//!
//! # Architecture
//!
//! The core crate contains only types and pure rules - no I/O, no database
//! access, no HTTP clients. This keeps it lightweight and allows it to be used
//! anywhere.
//!
//! # Modules
//!
//! - [`types`] - Typed IDs, prices, emails, cart items, addresses, coupons and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
