//! wagate: an HTTP gateway for sending WhatsApp text messages.
//!
//! One linked device is paired through a bridge process, outbound messages
//! are dispatched through it, and delivery receipts are folded into a
//! SQLite status ledger that callers can query by message id.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod ledger;
pub mod transport;

pub mod correlator;
pub mod dispatcher;
pub mod session;

pub mod http;
pub mod service;
