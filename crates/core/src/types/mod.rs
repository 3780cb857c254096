//! Core types for Versos.
//!
//! This module provides type-safe wrappers for the storefront's domain concepts.

pub mod address;
pub mod cart;
pub mod coupon;
pub mod email;
pub mod id;
pub mod price;
pub mod status;

pub use address::{Address, AddressError, NewAddress};
pub use cart::CartItem;
pub use coupon::{Coupon, normalize_coupon_code};
pub use email::{Email, EmailError};
pub use id::*;
pub use price::{Price, PriceError};
pub use status::*;
