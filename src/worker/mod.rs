//! Everything about talking to the Worker CLI: building the `exec`
//! invocation, the stage prompts, recovering the final JSON object from its
//! noisy output, and harvesting live progress.

pub mod extract;
pub mod invoke;
pub mod prompts;

pub use extract::{extract_json, NoJsonFound};
pub use invoke::{worker_spec, ProgressTracker, WorkerSettings};
