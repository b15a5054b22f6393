//! gatewatch-notify: Alert delivery.
//!
//! A single-consumer dispatch queue in front of pluggable transports: a LAN
//! multipart upload receiver, the Telegram Bot API, or a log-only dry run.

pub mod dispatch;
pub mod http;
pub mod telegram;
pub mod transport;

pub use dispatch::{DispatchError, DispatchHandle, DispatchStats, Dispatcher, NotificationJob};
pub use http::HttpUploadTransport;
pub use telegram::TelegramTransport;
pub use transport::{LogTransport, Transport, TransportConfig, TransportError};
