mod repository;
mod schema;

pub use repository::{
    ClearOutcome, ClusterMember, ClusterWrite, IntegrityIncident, MergePlan, MergeWrite, Repository,
    RewriteOutcome,
};
