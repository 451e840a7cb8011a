use std::fmt;

use serde::Serialize;

use crate::capture::CaptureStatus;

/// Why a camera device could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UnavailableReason {
    /// No camera is attached to the machine.
    NoCamera,
    /// The platform backend cannot drive this device.
    Unsupported,
    /// A frame was requested from a source that is not open.
    StreamClosed,
}

/// Outcomes of the capture pipeline that a caller has to tell apart.
///
/// Device errors are fatal to the session and halt the frame loop.
/// Encoding and submission errors leave the session in `Finished` so the
/// caller can retry.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    DeviceUnavailable(UnavailableReason),
    PermissionDenied,
    DeviceBusy,
    EncodingFailure(String),
    SubmissionFailure(String),
    InvalidTransition {
        from: CaptureStatus,
        action: &'static str,
    },
    CalibrationOutOfFrame {
        x: f32,
        y: f32,
    },
    /// A frame-loop worker panicked or could not be joined.
    PipelineFailure(String),
}

impl CaptureError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CaptureError::DeviceUnavailable(_)
                | CaptureError::PermissionDenied
                | CaptureError::DeviceBusy
                | CaptureError::PipelineFailure(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CaptureError::EncodingFailure(_) | CaptureError::SubmissionFailure(_)
        )
    }

    /// Message suitable for showing to the person taking the test.
    pub fn user_message(&self) -> String {
        match self {
            CaptureError::DeviceUnavailable(UnavailableReason::NoCamera) => {
                "No camera was found. Connect a camera and try again.".to_string()
            }
            CaptureError::DeviceUnavailable(UnavailableReason::Unsupported) => {
                "Your camera is not supported on this device.".to_string()
            }
            CaptureError::DeviceUnavailable(UnavailableReason::StreamClosed) => {
                "The camera stopped delivering video. Start the test again.".to_string()
            }
            CaptureError::PermissionDenied => {
                "Camera access was denied. Check the camera permissions and try again."
                    .to_string()
            }
            CaptureError::DeviceBusy => {
                "The camera is being used by another application.".to_string()
            }
            CaptureError::EncodingFailure(_) => {
                "The drawing could not be prepared for upload. Try submitting again."
                    .to_string()
            }
            CaptureError::SubmissionFailure(detail) => {
                format!("The drawing could not be analysed: {detail}")
            }
            CaptureError::InvalidTransition { .. } => {
                "That action is not available right now.".to_string()
            }
            CaptureError::CalibrationOutOfFrame { .. } => {
                "Tap inside the video to pick the marker color.".to_string()
            }
            CaptureError::PipelineFailure(_) => {
                "Tracking stopped unexpectedly. Start the test again.".to_string()
            }
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::DeviceUnavailable(reason) => {
                write!(f, "camera unavailable: {reason:?}")
            }
            CaptureError::PermissionDenied => write!(f, "camera permission denied"),
            CaptureError::DeviceBusy => write!(f, "camera already in use"),
            CaptureError::EncodingFailure(msg) => write!(f, "failed to encode drawing: {msg}"),
            CaptureError::SubmissionFailure(msg) => write!(f, "submission failed: {msg}"),
            CaptureError::InvalidTransition { from, action } => {
                write!(f, "cannot {action} while {from:?}")
            }
            CaptureError::CalibrationOutOfFrame { x, y } => {
                write!(f, "calibration point ({x:.1}, {y:.1}) is outside the frame")
            }
            CaptureError::PipelineFailure(msg) => write!(f, "frame pipeline failed: {msg}"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Pulls a [`CaptureError`] back out of an `anyhow` chain, if there is one.
pub fn as_capture_error(err: &anyhow::Error) -> Option<&CaptureError> {
    err.chain().find_map(|cause| cause.downcast_ref::<CaptureError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn device_errors_are_fatal_and_not_retryable() {
        for err in [
            CaptureError::DeviceUnavailable(UnavailableReason::NoCamera),
            CaptureError::PermissionDenied,
            CaptureError::DeviceBusy,
            CaptureError::PipelineFailure("tracker panicked".into()),
        ] {
            assert!(err.is_fatal(), "{err} should be fatal");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn upload_errors_are_retryable() {
        assert!(CaptureError::EncodingFailure("png".into()).is_retryable());
        assert!(CaptureError::SubmissionFailure("503".into()).is_retryable());
        assert!(!CaptureError::SubmissionFailure("503".into()).is_fatal());
    }

    #[test]
    fn each_device_failure_has_its_own_message() {
        let messages = [
            CaptureError::DeviceUnavailable(UnavailableReason::NoCamera).user_message(),
            CaptureError::DeviceUnavailable(UnavailableReason::Unsupported).user_message(),
            CaptureError::PermissionDenied.user_message(),
            CaptureError::DeviceBusy.user_message(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn capture_error_survives_anyhow_context() {
        let err = Err::<(), _>(CaptureError::DeviceBusy)
            .context("opening camera 0")
            .unwrap_err();
        assert_eq!(as_capture_error(&err), Some(&CaptureError::DeviceBusy));
    }
}
