//! HR expense claims backend
//!
//! Claims move through an approval chain configured per user group and
//! draw from per-user spending balances that reset daily, weekly, monthly
//! or yearly.
//!
//! ## Layout
//!
//! - [`services`]: permission resolution, balances, the claim lifecycle and
//!   the workflow projection
//! - [`db`]: the `ClaimStore` gateway with PostgreSQL and in-memory backends
//! - [`handlers`]: the axum HTTP surface

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod validation;
