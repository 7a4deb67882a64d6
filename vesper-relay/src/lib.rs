#![doc = include_str!("../README.md")]
#![deny(
    clippy::all,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    unsafe_code,
    unused
)]
#![allow(clippy::module_name_repetitions)]

pub mod broker;
pub mod control;
pub mod error;
pub mod link;
pub mod payload;
pub mod topic;

mod downstream;
mod session;
mod upstream;

pub use self::{
    broker::{LocalBroker, PayloadSink, PayloadSource},
    control::{ControlOp, NodeControl},
    downstream::DownstreamRelay,
    error::{Error, ErrorType},
    link::GatewayLink,
    payload::{OpCode, Payload},
    topic::Topic,
    upstream::UpstreamRelay,
};
