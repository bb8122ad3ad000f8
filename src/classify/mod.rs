mod classifier;
mod heuristics;

pub use classifier::{Classifier, Stage};
