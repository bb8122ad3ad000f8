mod bucket;
mod canonical;
mod deduplicator;
mod locks;
mod matcher;
mod similarity;
mod union_find;

pub use bucket::bucket_of;
pub use canonical::{canonical_index, CanonicalKey};
pub use deduplicator::{Deduplicator, FreshDraft, RerunOutcome};
pub use matcher::MatchRule;
