//! HTTP handlers for policy-service.

pub mod health;
pub mod interactions;
pub mod internal;
pub mod metrics;
pub mod policies;
pub mod transactions;
