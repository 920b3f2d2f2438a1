//! studio-service: metered AI image generation gated by a free quota and
//! Stripe subscriptions kept in sync through webhooks.

pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
