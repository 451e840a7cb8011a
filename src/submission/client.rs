use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::CaptureError;

use super::SubmissionPayload;

/// Where a drawing goes once submitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SubmissionTarget {
    /// Scored and returned, not stored. Only the image is sent.
    Practice,
    /// Stored against a patient together with duration and method.
    Clinical { patient_id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteCount {
    #[serde(rename = "Healthy", default)]
    pub healthy: u32,
    #[serde(rename = "Parkinson", default)]
    pub parkinson: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub prediction: String,
    #[serde(default)]
    pub probabilities: Option<BTreeMap<String, f64>>,
}

/// Geometric features the service extracted from the spiral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpiralFeatures {
    pub area: f64,
    pub perimeter: f64,
    pub circularity: f64,
    pub aspect_ratio: f64,
    pub entropy: f64,
    pub mean_thickness: f64,
    pub std_thickness: f64,
}

/// Reply of the scoring service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub majority_decision: String,
    #[serde(default)]
    pub vote_count: VoteCount,
    #[serde(default)]
    pub model_results: BTreeMap<String, ModelPrediction>,
    #[serde(default)]
    pub extracted_features: Option<SpiralFeatures>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub analysis: Option<String>,
}

pub type SubmitFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ClassificationResult, CaptureError>> + Send + 'a>>;

/// The external scorer. Implementations must not retry on their own.
pub trait SpiralSubmitter: Send + Sync {
    fn submit<'a>(
        &'a self,
        target: &'a SubmissionTarget,
        payload: &'a SubmissionPayload,
    ) -> SubmitFuture<'a>;
}

/// Hands each payload to an external program.
///
/// The program receives one JSON header line followed by the PNG bytes on
/// stdin and must print a [`ClassificationResult`] as JSON on stdout.
pub struct ProcessSubmitter {
    command: Vec<String>,
    timeout: Duration,
}

impl ProcessSubmitter {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    fn header(target: &SubmissionTarget, payload: &SubmissionPayload) -> serde_json::Value {
        match target {
            SubmissionTarget::Practice => json!({
                "target": "practice",
                "imageBytes": payload.image_len(),
            }),
            SubmissionTarget::Clinical { patient_id } => json!({
                "target": "clinical",
                "patientId": patient_id,
                "drawDuration": payload.draw_duration_secs,
                "method": payload.method.code(),
                "imageBytes": payload.image_len(),
            }),
        }
    }

    async fn run(
        &self,
        target: &SubmissionTarget,
        payload: &SubmissionPayload,
    ) -> Result<ClassificationResult, CaptureError> {
        let failure = |msg: String| CaptureError::SubmissionFailure(msg);
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| failure("no submission command configured".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| failure(format!("failed to start {program}: {err}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| failure("submission command has no stdin".to_string()))?;
        let mut header = Self::header(target, payload).to_string();
        header.push('\n');
        stdin
            .write_all(header.as_bytes())
            .await
            .map_err(|err| failure(format!("failed to send header: {err}")))?;
        stdin
            .write_all(&payload.image_png)
            .await
            .map_err(|err| failure(format!("failed to send image: {err}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| failure(format!("submission command failed: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failure(format!(
                "submission command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|err| failure(format!("malformed classification result: {err}")))
    }
}

impl SpiralSubmitter for ProcessSubmitter {
    fn submit<'a>(
        &'a self,
        target: &'a SubmissionTarget,
        payload: &'a SubmissionPayload,
    ) -> SubmitFuture<'a> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.run(target, payload)).await {
                Ok(result) => result,
                Err(_) => Err(CaptureError::SubmissionFailure(format!(
                    "no reply within {}s",
                    self.timeout.as_secs()
                ))),
            }
        })
    }
}
