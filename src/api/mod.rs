//! HTTP surface of the gateway

pub mod endpoints;
