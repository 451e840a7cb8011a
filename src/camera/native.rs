use std::sync::mpsc;
use std::thread::JoinHandle;

use chrono::Utc;
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
};
use nokhwa::{Camera, NokhwaError};

use crate::error::{CaptureError, UnavailableReason};
use crate::models::{Frame, Resolution};
use crate::settings::CameraSettings;

use super::FrameSource;

type FrameReply = Result<RgbImage, CaptureError>;

/// A webcam driven through `nokhwa`.
///
/// The backend handle is not `Send` on every platform, so it lives on a
/// dedicated thread for as long as the stream is open. Dropping the request
/// channel stops the stream and ends that thread.
pub struct NativeCamera {
    settings: CameraSettings,
    requests: Option<mpsc::Sender<()>>,
    replies: Option<mpsc::Receiver<FrameReply>>,
    worker: Option<JoinHandle<()>>,
    sequence: u64,
}

impl NativeCamera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            requests: None,
            replies: None,
            worker: None,
            sequence: 0,
        }
    }
}

fn map_backend_error(err: &NokhwaError) -> CaptureError {
    if matches!(
        err,
        NokhwaError::UnsupportedOperationError(_) | NokhwaError::NotImplementedError(_)
    ) {
        return CaptureError::DeviceUnavailable(UnavailableReason::Unsupported);
    }
    classify_backend_message(&err.to_string())
}

fn classify_backend_message(message: &str) -> CaptureError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        CaptureError::PermissionDenied
    } else if lower.contains("busy") || lower.contains("in use") {
        CaptureError::DeviceBusy
    } else if lower.contains("unsupported") || lower.contains("not implemented") {
        CaptureError::DeviceUnavailable(UnavailableReason::Unsupported)
    } else {
        CaptureError::DeviceUnavailable(UnavailableReason::NoCamera)
    }
}

fn open_camera(settings: &CameraSettings) -> Result<Camera, CaptureError> {
    let devices = nokhwa::query(ApiBackend::Auto).map_err(|err| map_backend_error(&err))?;
    if devices.is_empty() {
        return Err(CaptureError::DeviceUnavailable(UnavailableReason::NoCamera));
    }

    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
        CameraFormat::new(
            nokhwa::utils::Resolution::new(settings.width, settings.height),
            FrameFormat::MJPEG,
            settings.fps,
        ),
    ));
    let mut camera = Camera::new(CameraIndex::Index(settings.device_index), format)
        .map_err(|err| map_backend_error(&err))?;
    camera
        .open_stream()
        .map_err(|err| map_backend_error(&err))?;
    Ok(camera)
}

fn grab(camera: &mut Camera) -> FrameReply {
    let buffer = camera.frame().map_err(|err| map_backend_error(&err))?;
    let decoded = buffer
        .decode_image::<RgbFormat>()
        .map_err(|err| map_backend_error(&err))?;
    let (width, height) = (decoded.width(), decoded.height());
    RgbImage::from_raw(width, height, decoded.into_raw())
        .ok_or(CaptureError::DeviceUnavailable(UnavailableReason::StreamClosed))
}

impl FrameSource for NativeCamera {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.is_open() {
            return Ok(());
        }

        let (request_tx, request_rx) = mpsc::channel::<()>();
        let (reply_tx, reply_rx) = mpsc::channel::<FrameReply>();
        let settings = self.settings.clone();

        let worker = std::thread::Builder::new()
            .name("native-camera".into())
            .spawn(move || {
                let mut camera = match open_camera(&settings) {
                    Ok(camera) => {
                        let _ = reply_tx.send(Ok(RgbImage::new(0, 0)));
                        camera
                    }
                    Err(err) => {
                        let _ = reply_tx.send(Err(err));
                        return;
                    }
                };
                while request_rx.recv().is_ok() {
                    if reply_tx.send(grab(&mut camera)).is_err() {
                        break;
                    }
                }
                if let Err(err) = camera.stop_stream() {
                    log::warn!("failed to stop camera stream: {err}");
                }
            })
            .map_err(|_| CaptureError::DeviceUnavailable(UnavailableReason::Unsupported))?;

        match reply_rx.recv() {
            Ok(Ok(_)) => {
                self.requests = Some(request_tx);
                self.replies = Some(reply_rx);
                self.worker = Some(worker);
                self.sequence = 0;
                log::info!("camera {} opened", self.settings.device_index);
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = worker.join();
                Err(err)
            }
            Err(_) => {
                let _ = worker.join();
                Err(CaptureError::DeviceUnavailable(UnavailableReason::StreamClosed))
            }
        }
    }

    fn close(&mut self) {
        self.requests = None;
        self.replies = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("camera worker panicked during shutdown");
            }
            log::info!("camera {} closed", self.settings.device_index);
        }
    }

    fn is_open(&self) -> bool {
        self.worker.is_some()
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let closed = CaptureError::DeviceUnavailable(UnavailableReason::StreamClosed);
        let (Some(requests), Some(replies)) = (&self.requests, &self.replies) else {
            return Err(closed);
        };
        requests.send(()).map_err(|_| closed.clone())?;
        let image = replies.recv().map_err(|_| closed)??;
        let frame = Frame::new(image, Utc::now(), self.sequence);
        self.sequence += 1;
        Ok(frame)
    }

    fn resolution(&self) -> Resolution {
        self.settings.resolution()
    }
}

impl Drop for NativeCamera {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_messages_map_onto_device_errors() {
        assert_eq!(
            classify_backend_message("Permission Denied by user"),
            CaptureError::PermissionDenied
        );
        assert_eq!(
            classify_backend_message("device or resource busy"),
            CaptureError::DeviceBusy
        );
        assert_eq!(
            classify_backend_message("format unsupported"),
            CaptureError::DeviceUnavailable(UnavailableReason::Unsupported)
        );
        assert_eq!(
            classify_backend_message("no such device"),
            CaptureError::DeviceUnavailable(UnavailableReason::NoCamera)
        );
    }

    #[test]
    fn closed_camera_refuses_frames() {
        let mut camera = NativeCamera::new(CameraSettings::default());
        assert!(!camera.is_open());
        assert!(camera.next_frame().is_err());
        camera.close();
    }
}
