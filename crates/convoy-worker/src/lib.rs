//! Worker runtime for the Convoy CD engine.
//!
//! A worker registers once with a token, claims a job, executes its steps,
//! streams logs and results back, and reports a terminal status. The
//! session protocol lives in [`session`]; step execution is pluggable
//! through [`runner`].

pub mod runner;
pub mod session;

pub use runner::{ShellRunner, StepOutcome, StepRunner};
pub use session::{Session, SessionConfig};
