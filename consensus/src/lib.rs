//! MERIDIAN consensus roles
//!
//! The proposer drives rounds (lock, pack, sign, parallel fan-out,
//! commit); validators statelessly re-check candidate blocks and sign
//! them. Both talk to the coordinator through [`CoordinatorApi`] and to
//! each other through [`ValidatorClient`].

pub mod client;
pub mod proposer;
pub mod validator;

pub use client::{HttpValidatorClient, LocalValidatorClient, ValidateRequest, ValidatorClient};
pub use proposer::{IdleReason, Proposer, RoundOutcome, RoundSummary};
pub use validator::{ValidationResponse, Validator, MAX_CLOCK_SKEW_MS};

#[doc(inline)]
pub use meridian_ledger::CoordinatorApi;
