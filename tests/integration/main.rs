//! Integration tests for babble-ingest
//!
//! These tests use wiremock to serve news pages and drive the full
//! claim, fetch, parse and persist cycle end-to-end.

mod ingest_tests;
