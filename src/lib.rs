pub mod clients;
pub mod config;
pub mod contracts;
pub mod controller;
pub mod errors;
pub mod gas;
pub mod predicate;
pub mod shutdown;
pub mod submitter;
pub mod wallet;

#[cfg(test)]
pub(crate) mod test_utils;

pub use controller::{Controller, ExecutionOutcome};
pub use errors::{FailureReason, PredicateReadError, SubmissionError};
