// SPDX-License-Identifier: Apache-2.0

//! Outbound notification sinks.
//!
//! Processors hand notable units to a [`Notifier`]. A failed delivery is
//! reported to the caller and never retried here.

mod feishu;

pub use feishu::{FeiShu, FeiShuConfig};

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to build request: {0}")]
    Build(String),

    #[error("failed to sign request: {0}")]
    Sign(String),

    #[error("failed to send request: {0}")]
    Transport(String),

    #[error("webhook returned non-200 status: {status}")]
    Status { status: http::StatusCode, body: String },
}

/// Future returned by [`Notifier::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

/// Delivers a titled message to an external destination.
pub trait Notifier: Send + Sync {
    fn send<'a>(&'a self, title: &'a str, text: &'a str) -> SendFuture<'a>;
}
