use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use crate::models::Resolution;

/// Env var naming the JSON settings file the binary loads.
pub const SETTINGS_ENV_VAR: &str = "SPIRAL_CAPTURE_SETTINGS";
const DEFAULT_SETTINGS_FILE: &str = "spiral-capture.json";

/// Settings path from `SPIRAL_CAPTURE_SETTINGS`, or `spiral-capture.json` in the working directory.
pub fn settings_path() -> PathBuf {
    std::env::var_os(SETTINGS_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CameraSettings {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Pause between frame-loop iterations.
    pub frame_interval_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            fps: 30,
            frame_interval_ms: 33,
        }
    }
}

impl CameraSettings {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ColorSettings {
    pub hue_tolerance: u8,
    pub min_saturation: u8,
    pub min_value: u8,
    pub kernel_size: u32,
    pub draw_marker: bool,
}

impl Default for ColorSettings {
    fn default() -> Self {
        Self {
            hue_tolerance: 10,
            min_saturation: 100,
            min_value: 100,
            kernel_size: 5,
            draw_marker: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LandmarkSettings {
    pub fingertip_index: usize,
    pub min_confidence: f32,
    /// Helper program (and arguments) speaking the hand-landmark protocol.
    pub detector_command: Vec<String>,
}

impl Default for LandmarkSettings {
    fn default() -> Self {
        Self {
            fingertip_index: 8,
            min_confidence: 0.7,
            detector_command: vec![".venv/bin/python".into(), "hand_detect.py".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpiralSettings {
    pub turns: f32,
    pub angle_step: f32,
}

impl Default for SpiralSettings {
    fn default() -> Self {
        Self {
            turns: 2.5,
            angle_step: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderSettings {
    pub stroke_width: f32,
    pub guide_width: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            stroke_width: 4.0,
            guide_width: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubmissionSettings {
    /// Program that forwards payloads to the scoring service. Empty disables upload.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 30,
        }
    }
}

impl SubmissionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureSettings {
    pub camera: CameraSettings,
    pub color: ColorSettings,
    pub landmark: LandmarkSettings,
    pub spiral: SpiralSettings,
    pub render: RenderSettings,
    pub submission: SubmissionSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<CaptureSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring malformed settings in {}: {err}",
                    path.display()
                );
                CaptureSettings::default()
            })
        } else {
            CaptureSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn capture(&self) -> CaptureSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: CaptureSettings = serde_json::from_str(&contents)?;
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = data;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("spiral-capture-{}-{name}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = SettingsStore::new(temp_path("missing.json")).unwrap();
        let settings = store.capture();
        assert_eq!(settings.camera.width, 640);
        assert_eq!(settings.color.hue_tolerance, 10);
        assert_eq!(settings.landmark.fingertip_index, 8);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = temp_path("partial.json");
        fs::write(&path, r#"{"color":{"hueTolerance":15},"camera":{"frameIntervalMs":5}}"#)
            .unwrap();
        let store = SettingsStore::new(path.clone()).unwrap();
        let settings = store.capture();
        assert_eq!(settings.color.hue_tolerance, 15);
        assert_eq!(settings.color.min_saturation, 100);
        assert_eq!(settings.camera.frame_interval(), Duration::from_millis(5));
        assert_eq!(settings.spiral.turns, 2.5);
        fs::remove_file(path).ok();
    }

    #[test]
    fn malformed_file_falls_back_and_reload_reports() {
        let path = temp_path("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let store = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(store.capture().render.stroke_width, 4.0);
        assert!(store.reload().is_err());

        fs::write(&path, r#"{"render":{"strokeWidth":6.0}}"#).unwrap();
        store.reload().unwrap();
        assert_eq!(store.capture().render.stroke_width, 6.0);
        fs::remove_file(path).ok();
    }
}
