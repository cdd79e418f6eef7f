//! Network surface for the event protocol.
//!
//! No UI lives here; the event stream is the UI contract and this module
//! is its transport.

pub mod ws;
