//! Client message dispatch.

pub mod router;

pub use router::route_message;
