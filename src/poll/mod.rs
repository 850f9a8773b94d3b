pub mod service;

pub use service::{CycleReport, PollHandle, PollLoop, PollState};
