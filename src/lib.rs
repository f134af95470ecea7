//! Gatekeeper - Policy-Driven Rate Limiting Engine
//!
//! This crate decides whether an incoming request may proceed, based on
//! configurable policies scoped to callers, endpoints and network origins.
//! Counters live in calendar-aligned windows with an optional token bucket
//! burst allowance in front of them. Denials are recorded as violations,
//! which feed threshold alerts and periodic traffic metrics.

pub mod config;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod ratelimit;
pub mod scheduler;
pub mod violations;
