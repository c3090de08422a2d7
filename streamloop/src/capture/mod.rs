//! Capture workers: one task per actively-recorded channel.

mod worker;

pub use worker::{CaptureOutcome, CaptureWorker};
