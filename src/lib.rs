//! tenantpay - payment reconciliation and plan/add-on transition engine
//!
//! Verifies Fawry and Paymob callbacks, moves payments through their status
//! lifecycle exactly once, and turns successful payments into plan changes or
//! add-on activations. Also meters usage-based add-ons.

pub mod billing;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod models;
pub mod notify;
pub mod payments;
