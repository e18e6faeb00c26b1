//! Bucketed retention and rotation.
//!
//! Rotation decides which chains the retention policy still claims
//! ([`classify`]), prunes the rest ([`RotationEngine`]), and sweeps any
//! directories left behind by interrupted runs. Pruning tombstones every
//! entry before its artifact is deleted, so a crash at any point leaves
//! a catalog the next load can verify.

mod classify;
mod policy;
mod rotate;

pub use classify::{
    classify, eligible_for_pruning, week_start_of, BucketKind, RetentionBucket,
};
pub use policy::RotationPolicy;
pub use rotate::{RotateOutcome, RotatePlan, RotationEngine};
