//! # Rekey Workflow
//!
//! Drives a managed secret's providers through the rotation protocol:
//!
//! 1. **Prepare**: declared user hints are checked before any provider call.
//! 2. **SanityTest**: read-only checks, optional.
//! 3. **GenerateTemporary**: alternate secrets that are valid already.
//! 4. **DistributeTemporary**: consumers stage and switch to the alternates.
//! 5. **Rekey**: the primary credential is rotated.
//! 6. **Commit**: consumers stage and switch to the rotated secrets.
//! 7. **Cleanup**: unused material is retired.
//!
//! Every step is recorded in a [`WorkflowActionCollection`](rekey_core::WorkflowActionCollection).
//! A failing step stops the attempt; nothing already done is rolled back.

#![forbid(unsafe_code)]

pub mod engine;
pub mod error;
pub mod hints;
pub mod options;
pub mod runner;

pub use engine::RotationWorkflow;
pub use error::WorkflowError;
pub use hints::{HintError, validate_batch, validate_hints};
pub use options::WorkflowOptions;
pub use runner::{LocalRunner, RunRequest, WorkflowRunner};
