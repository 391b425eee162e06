#![forbid(unsafe_code)]

//! Turns artifact descriptors into PanDA task submissions and classifies the outcome.

pub mod command;
pub mod request;
pub mod service;
pub mod submitter;

pub use command::*;
pub use request::*;
pub use service::*;
pub use submitter::*;
