//! Turning a finished drawing into something the scoring service accepts.

mod client;
mod payload;

pub use client::{
    ClassificationResult, ModelPrediction, ProcessSubmitter, SpiralFeatures, SpiralSubmitter,
    SubmissionTarget, SubmitFuture, VoteCount,
};
pub use payload::{draw_duration_secs, SpiralMethod, SubmissionPayload};
