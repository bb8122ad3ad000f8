mod event;
mod raw_post;
mod status;
mod summary;

pub use event::{EventDraft, MasterEvent, SourceLink};
pub use raw_post::{content_hash, NewRawPost, RawPost};
pub use status::{Classification, EventStatus};
pub use summary::{FailureKind, PipelineFailure, RunSummary};
