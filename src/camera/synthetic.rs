use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use image::{Rgb, RgbImage};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::error::{CaptureError, UnavailableReason};
use crate::models::{Frame, Point, Resolution};

use super::FrameSource;

/// Tracks which device indices are currently held by an open source.
///
/// Shared by every source that can contend for the same hardware.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    held: Arc<Mutex<HashSet<u32>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, index: u32) -> Result<DeviceLease, CaptureError> {
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !held.insert(index) {
            return Err(CaptureError::DeviceBusy);
        }
        Ok(DeviceLease {
            registry: self.clone(),
            index,
        })
    }

    pub fn is_held(&self, index: u32) -> bool {
        match self.held.lock() {
            Ok(guard) => guard.contains(&index),
            Err(poisoned) => poisoned.into_inner().contains(&index),
        }
    }

    fn release(&self, index: u32) {
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(&index);
    }
}

/// Exclusive hold on one device index; released when dropped.
pub struct DeviceLease {
    registry: DeviceRegistry,
    index: u32,
}

impl DeviceLease {
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.registry.release(self.index);
    }
}

/// What the synthetic camera "sees": a flat background and a colored disc
/// that moves through `path`, one position per frame, holding the last one.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub background: Rgb<u8>,
    pub marker_color: Rgb<u8>,
    pub marker_radius: f32,
    pub path: Vec<Point>,
    /// Maximum per-channel noise added to every pixel.
    pub noise: u8,
    pub seed: u64,
}

impl Default for SyntheticScene {
    fn default() -> Self {
        Self {
            background: Rgb([60, 60, 60]),
            marker_color: Rgb([0, 200, 0]),
            marker_radius: 12.0,
            path: Vec::new(),
            noise: 0,
            seed: 7,
        }
    }
}

impl SyntheticScene {
    pub fn marker_at(&self, frame_index: u64) -> Option<Point> {
        if self.path.is_empty() {
            return None;
        }
        let i = (frame_index as usize).min(self.path.len() - 1);
        Some(self.path[i])
    }

    pub fn render(&self, resolution: Resolution, frame_index: u64, rng: &mut StdRng) -> RgbImage {
        let mut image = RgbImage::from_pixel(resolution.width, resolution.height, self.background);

        if self.noise > 0 {
            let n = self.noise as i16;
            for pixel in image.pixels_mut() {
                for c in pixel.0.iter_mut() {
                    let jitter: i16 = rng.gen_range(-n..=n);
                    *c = (*c as i16 + jitter).clamp(0, 255) as u8;
                }
            }
        }

        if let Some(center) = self.marker_at(frame_index) {
            let r = self.marker_radius;
            let x0 = (center.x - r).floor().max(0.0) as u32;
            let y0 = (center.y - r).floor().max(0.0) as u32;
            let x1 = ((center.x + r).ceil() as u32).min(resolution.width.saturating_sub(1));
            let y1 = ((center.y + r).ceil() as u32).min(resolution.height.saturating_sub(1));
            for y in y0..=y1 {
                for x in x0..=x1 {
                    if Point::new(x as f32, y as f32).distance(&center) <= r {
                        image.put_pixel(x, y, self.marker_color);
                    }
                }
            }
        }

        image
    }
}

/// A camera that renders [`SyntheticScene`] frames and honours device exclusivity.
pub struct SyntheticCamera {
    index: u32,
    resolution: Resolution,
    registry: DeviceRegistry,
    scene: SyntheticScene,
    lease: Option<DeviceLease>,
    frame_index: u64,
    rng: StdRng,
    open_failure: Option<CaptureError>,
}

impl SyntheticCamera {
    pub fn new(
        index: u32,
        resolution: Resolution,
        registry: DeviceRegistry,
        scene: SyntheticScene,
    ) -> Self {
        let rng = StdRng::seed_from_u64(scene.seed);
        Self {
            index,
            resolution,
            registry,
            scene,
            lease: None,
            frame_index: 0,
            rng,
            open_failure: None,
        }
    }

    /// Makes every `open()` fail with `error`, as a misbehaving device would.
    pub fn failing_with(mut self, error: CaptureError) -> Self {
        self.open_failure = Some(error);
        self
    }

    pub fn scene(&self) -> &SyntheticScene {
        &self.scene
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frame_index
    }
}

impl FrameSource for SyntheticCamera {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.lease.is_some() {
            return Ok(());
        }
        if let Some(err) = &self.open_failure {
            return Err(err.clone());
        }
        self.lease = Some(self.registry.acquire(self.index)?);
        self.frame_index = 0;
        self.rng = StdRng::seed_from_u64(self.scene.seed);
        log::debug!("synthetic camera {} opened", self.index);
        Ok(())
    }

    fn close(&mut self) {
        if self.lease.take().is_some() {
            log::debug!("synthetic camera {} closed", self.index);
        }
    }

    fn is_open(&self) -> bool {
        self.lease.is_some()
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.lease.is_none() {
            return Err(CaptureError::DeviceUnavailable(UnavailableReason::StreamClosed));
        }
        let image = self
            .scene
            .render(self.resolution, self.frame_index, &mut self.rng);
        let frame = Frame::new(image, Utc::now(), self.frame_index);
        self.frame_index += 1;
        Ok(frame)
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(registry: &DeviceRegistry) -> SyntheticCamera {
        SyntheticCamera::new(
            0,
            Resolution::new(64, 48),
            registry.clone(),
            SyntheticScene {
                path: vec![Point::new(10.0, 10.0), Point::new(30.0, 20.0)],
                marker_radius: 3.0,
                ..SyntheticScene::default()
            },
        )
    }

    #[test]
    fn second_open_on_held_device_is_busy() {
        let registry = DeviceRegistry::new();
        let mut a = camera(&registry);
        let mut b = camera(&registry);
        a.open().unwrap();
        assert_eq!(b.open(), Err(CaptureError::DeviceBusy));
    }

    #[test]
    fn close_releases_device_for_reopen() {
        let registry = DeviceRegistry::new();
        let mut a = camera(&registry);
        a.open().unwrap();
        a.close();
        a.close();
        assert!(!registry.is_held(0));

        let mut b = camera(&registry);
        b.open().unwrap();
        assert!(b.is_open());
    }

    #[test]
    fn drop_releases_device() {
        let registry = DeviceRegistry::new();
        {
            let mut a = camera(&registry);
            a.open().unwrap();
            assert!(registry.is_held(0));
        }
        assert!(!registry.is_held(0));
    }

    #[test]
    fn closed_camera_reports_stream_closed() {
        let registry = DeviceRegistry::new();
        let mut a = camera(&registry);
        assert_eq!(
            a.next_frame().unwrap_err(),
            CaptureError::DeviceUnavailable(UnavailableReason::StreamClosed)
        );
    }

    #[test]
    fn scripted_open_failure_does_not_take_the_lock() {
        let registry = DeviceRegistry::new();
        let mut a = camera(&registry).failing_with(CaptureError::PermissionDenied);
        assert_eq!(a.open(), Err(CaptureError::PermissionDenied));
        assert!(!registry.is_held(0));
    }

    #[test]
    fn marker_follows_path_then_holds() {
        let registry = DeviceRegistry::new();
        let mut a = camera(&registry);
        a.open().unwrap();
        let f0 = a.next_frame().unwrap();
        let f1 = a.next_frame().unwrap();
        let f2 = a.next_frame().unwrap();
        assert_eq!(f0.sequence(), 0);
        assert_eq!(f0.pixel(10, 10), Some(Rgb([0, 200, 0])));
        assert_eq!(f1.pixel(30, 20), Some(Rgb([0, 200, 0])));
        assert_eq!(f2.pixel(30, 20), Some(Rgb([0, 200, 0])));
        assert_eq!(f1.pixel(10, 10), Some(Rgb([60, 60, 60])));
    }
}
