//! Integration tests module
//!
//! End-to-end tests for the curator:
//! - provide / get_record behavior against counting in-process backends
//! - HTTP backends (wiremock) reached through remote pools
//! - a replica forwarding to a real master server
//! - error classification on the wire

pub mod backend_test;
pub mod error_scenarios;
pub mod fixtures;
pub mod pipeline_test;
pub mod replica_test;
