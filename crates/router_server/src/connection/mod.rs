//! Connection bookkeeping for the broker.

pub mod client;

pub use client::{ClientId, ClientLink, ClientSession, Delivery};
