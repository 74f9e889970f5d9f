//! Handlers (§4.7): subscribers to the Event Bus. Grounded on
//! `logic/telemetry/recorder.rs` (JSONL append) and `logic/dataset/writer.rs`
//! (writer-behind-mutex with rotation helpers).

mod console;
mod logger;
mod rate_limiter;

pub use console::ConsoleDisplay;
pub use logger::EventLogger;
pub use rate_limiter::{RateLimiter, DAMPENING_TOPIC};
