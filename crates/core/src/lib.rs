#![forbid(unsafe_code)]

//! Schedule-driven STF generation: schedule loading, the compressed event clock,
//! artifact production and the counters shared with the submission path.

pub mod clock;
pub mod counters;
pub mod generator;
pub mod model;
pub mod schedule;
pub mod sink;

pub use clock::*;
pub use counters::*;
pub use generator::*;
pub use model::*;
pub use schedule::*;
pub use sink::*;
