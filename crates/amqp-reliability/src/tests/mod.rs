//! Integration tests for the reliability core.
//!
//! - `harness.rs`        - Scripted handler and in-memory test harness
//! - `confirms.rs`       - I. Publisher confirms (Rules 1-6)
//! - `dispatch.rs`       - II. Acknowledgment dispatch (Rules 7-11)
//! - `handler_failure.rs` - III. Handler failures (Rules 12-16)
//! - `channel_close.rs`  - IV. Channel closure (Rules 17-20)
//! - `concurrency.rs`    - V. Concurrent publishing and consuming (Rules 21-23)

mod channel_close;
mod confirms;
mod handler_failure;

#[allow(unused_imports)]
pub use harness::{HandlerResponse, ScriptedHandler, TestHarness};
