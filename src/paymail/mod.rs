//! Paymail resolution
//!
//! [`PaymailService`] discovers host capabilities (cached per domain), requests
//! P2P payment destinations, fetches PKI records and delivers transactions to
//! receivers. Network access goes through the [`PaymailClient`] trait; the
//! reqwest implementation is available with the `http` feature.

pub mod address;
pub mod client;
#[cfg(feature = "http")]
pub mod http_client;
pub mod service;

pub use address::PaymailAddress;
pub use client::*;
#[cfg(feature = "http")]
pub use http_client::{HttpPaymailClient, PaymailHost};
pub use service::PaymailService;
