//! Client connections
//!
//! A session reads length-prefixed request envelopes, hands each one to the
//! service layer on its own task and writes the reply back tagged with the
//! request's sequence id.

mod connection;

pub use connection::{Session, SessionWriter};
