//! Verification harness for boundlibc.
//!
//! This crate provides:
//! - Policy matrix: run the bounds-check policy resolution in fresh child
//!   processes under controlled environments and compare against the
//!   documented table
//! - Structured logging: JSONL records for every verification step

#![forbid(unsafe_code)]

pub mod policy_matrix;
pub mod structured_log;

pub use policy_matrix::{HarnessError, MatrixReport, PolicyCase, default_cases, run_matrix};
