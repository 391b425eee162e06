#![forbid(unsafe_code)]

//! Message plumbing between the generator and the submission path.

pub mod dispatcher;
pub mod listener;
pub mod memory;
pub mod transport;

pub use dispatcher::*;
pub use listener::*;
pub use memory::*;
pub use transport::*;
