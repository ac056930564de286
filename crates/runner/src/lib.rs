pub mod streaming_loop;

pub use streaming_loop::{CycleOutcome, LoopState, RunStats, StreamingLoop};
