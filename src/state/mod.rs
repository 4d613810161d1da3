//! State module for scheduling bookkeeping
//!
//! # Components
//!
//! - `FetchVersion`: version tag of the extraction logic, drives reprocessing
//! - `DomainSlot`: in-memory politeness entry for one domain

mod domain_slot;
mod fetch_version;

pub use domain_slot::DomainSlot;
pub use fetch_version::FetchVersion;
