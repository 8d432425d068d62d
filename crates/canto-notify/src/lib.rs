//! Failure notifiers for Canto.
//!
//! A fetch that exhausts its retries is reported exactly once through a
//! [`canto_core::ports::FailureNotifier`]. This crate provides notifiers that
//! log the failure, forward it to a UI channel, post it to a webhook, or fan
//! out to several of those.

pub mod channels;
pub mod sender;

pub use channels::{NotifierConfig, WebhookConfig};
pub use sender::{
    ChannelNotifier, ExhaustedNotice, FanoutNotifier, LogNotifier, NotifyError, WebhookNotifier,
    create_notifier,
};
