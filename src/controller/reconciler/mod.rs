//! # Reconciler
//!
//! Keeps every labelled source secret mirrored into every other namespace.
//!
//! Each source identity is either ABSENT or PRESENT at some version:
//!
//! - in-scope secret observed: becomes PRESENT and is fanned out to every target
//! - secret deleted or sentinel label removed: becomes ABSENT and its mirrors
//!   are withdrawn
//! - namespace created: every PRESENT source is written into it
//! - namespace removed: nothing to do, the API server deletes its contents
//!
//! Work for one identity is serialized on its own lane (see `lanes`); lanes
//! for different identities run concurrently.

mod engine;
mod lanes;
pub mod types;

pub use engine::Reconciler;
pub use types::{
    FanOutReport, MirrorOperation, MirrorOutcome, SecretKey, SecretPayload, SourceSecret,
    SyncEvent, TargetResult, TrackedSource,
};
