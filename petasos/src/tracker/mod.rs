//! Downstream continuation tracking.

mod downstream;

pub use downstream::{
    ContinuationStatus, DownstreamContinuation, DownstreamContinuationRecord,
    DownstreamContinuationTracker,
};
