//! Job record model and store contract for docket.
//!
//! This crate defines what a scheduled job looks like on disk and the small
//! set of operations a document store must offer to host them:
//!
//! - **Records**: the cron field group, merged into any job-bearing document
//! - **Query vocabulary**: claim filter, partial update and sort preference,
//!   renderable as MongoDB-style documents
//! - **Store contract**: atomic claim, partial update, delete
//! - **Memory store**: an in-process implementation of the contract

mod error;
mod id;
mod memory;
mod query;
pub mod records;
mod store;

pub use error::StoreError;
pub use id::JobId;
pub use memory::MemoryStore;
pub use query::{Change, ClaimFilter, JobPatch, SortOrder};
pub use records::{CronFields, JobRecord, JobState, fields};
pub use store::JobStore;
