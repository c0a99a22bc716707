//! Relay pipeline
//!
//! Ingestion, keyword filtering, dedup and fan-out of channel posts, group
//! posts and job postings.

pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod recipients;
pub mod rules;
pub mod types;


pub use dedup::DedupStore;
pub use dispatcher::{DeliveryChannel, Dispatcher};
pub use error::*;
pub use filter::{should_keep, FilterRule};
pub use recipients::RecipientDirectory;
pub use rules::{EntityRule, RuleBook, RuleProvider, RuleSet, SourceSettings};
pub use types::*;
