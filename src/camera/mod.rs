//! Frame sources: the camera side of the pipeline.
//!
//! A source is opened once per session, delivers frames until closed, and
//! must release the device on `close()` and on drop. `close()` on a closed
//! source is a no-op.

#[cfg(feature = "native-camera")]
mod native;
mod synthetic;

#[cfg(feature = "native-camera")]
pub use native::NativeCamera;
pub use synthetic::{DeviceLease, DeviceRegistry, SyntheticCamera, SyntheticScene};

use crate::error::CaptureError;
use crate::models::{Frame, Resolution};

pub trait FrameSource: Send {
    /// Acquires the device and starts streaming.
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Stops every device track. Safe to call repeatedly.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Blocks until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;

    fn resolution(&self) -> Resolution;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn open(&mut self) -> Result<(), CaptureError> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        (**self).next_frame()
    }

    fn resolution(&self) -> Resolution {
        (**self).resolution()
    }
}
