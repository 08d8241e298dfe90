//! Subprocess supervision: spawning children, streaming their output to the
//! job log / terminal / live-progress callbacks, and bounded tail capture.

pub mod runner;
pub mod sink;

pub use runner::{
    CommandRunner, LineCallback, ProcessError, ProcessRunner, RunOutput, RunSpec,
    DEFAULT_CAPTURE_LIMIT,
};
pub use sink::{FanoutSink, JobLog, LineSink, TerminalSink};
