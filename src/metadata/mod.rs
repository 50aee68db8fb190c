//! Account and container metadata lookups.
//!
//! The [`lookup::MetadataLookup`] trait defines the read-only interface the
//! eligibility check needs; [`remote::HttpMetadataLookup`] asks the storage
//! service, [`fixed::StaticMetadata`] serves a table from configuration.

pub mod fixed;
pub mod lookup;
pub mod remote;
