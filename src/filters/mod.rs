//! Filters applied to the selected candidates before any action runs.
//!
//! Candidates pass through the exclusion list first, then through the copy
//! policy, which consults an [`ExistingStateOracle`](crate::oracle::ExistingStateOracle)
//! for what the catalog already holds.

pub mod copy_policy;
pub mod exclusion;
mod filter_properties;

pub use copy_policy::{CopyPolicyFilter, RejectReason, Verdict};
pub use exclusion::ExclusionList;
