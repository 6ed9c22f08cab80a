//! Shared argument types

pub mod common;

pub use common::OutputFormat;
