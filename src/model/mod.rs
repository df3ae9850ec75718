// src/model/mod.rs
//! Records shared by the pipeline, stores and HTTP layer.

pub mod item;
pub mod prediction;
pub mod run;

pub use item::{Engagement, Item, MalformedItem, RawItem};
pub use prediction::{
    ClassifierOutputs, Label, Prediction, PrimaryOutput, PrimaryScores, SecondaryOutput,
    WORKFLOW_VERSION,
};
pub use run::{CrawlMode, FeedStats, RunRecord, RunStatus, RunTotals};
