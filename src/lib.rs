#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::similar_names,
    clippy::cast_possible_truncation, // TODO
    clippy::too_many_lines, // TODO
)]

mod admission;
mod client;
pub mod connection;
pub mod error;
mod events;
mod flags;
mod flow_control;
mod frame;
mod hpack;
mod request;
mod response;
pub mod settings;
mod socket;
mod stream;

pub use bytes::Bytes;
pub use client::Client;
pub use connection::{ConnectionConfig, ConnectionHandle};
pub use error::{ErrorCode, Http2Error};
pub use events::ConnectionEvent;
pub use request::{Method, Request};
pub use response::Response;
pub use settings::Settings;
pub use socket::Transport;
pub use url::Url;
