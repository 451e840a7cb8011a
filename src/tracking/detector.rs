use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::models::Frame;
use crate::settings::LandmarkSettings;

use super::landmark::{HandLandmarks, Landmark};

/// Anything that can find hand keypoints in a frame.
pub trait HandLandmarkDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<HandLandmarks>>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectorStatus {
    Loading,
    Ready,
    Failed(String),
}

type DetectorSlot = Arc<Mutex<Option<Box<dyn HandLandmarkDetector>>>>;

/// Process-wide handle to a lazily loaded hand detector.
///
/// Clones share the same detector, so the model is loaded once no matter how
/// many sessions use it.
#[derive(Clone)]
pub struct LandmarkService {
    detector: DetectorSlot,
    status: watch::Receiver<DetectorStatus>,
}

impl LandmarkService {
    /// Runs `loader` on the blocking pool. Must be called inside a tokio runtime.
    pub fn spawn<F>(loader: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn HandLandmarkDetector>> + Send + 'static,
    {
        let (status_tx, status_rx) = watch::channel(DetectorStatus::Loading);
        let detector: DetectorSlot = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&detector);

        tokio::task::spawn_blocking(move || {
            let status = match loader() {
                Ok(loaded) => {
                    match slot.lock() {
                        Ok(mut guard) => *guard = Some(loaded),
                        Err(poisoned) => *poisoned.into_inner() = Some(loaded),
                    }
                    log::info!("hand detector ready");
                    DetectorStatus::Ready
                }
                Err(err) => {
                    log::error!("hand detector failed to load: {err:#}");
                    DetectorStatus::Failed(format!("{err:#}"))
                }
            };
            let _ = status_tx.send(status);
        });

        Self {
            detector,
            status: status_rx,
        }
    }

    /// Loads the helper process named by `detector_command` in the background.
    pub fn subprocess(settings: &LandmarkSettings) -> Self {
        let command = settings.detector_command.clone();
        Self::spawn(move || {
            let detector = SubprocessHandDetector::spawn(&command)?;
            Ok(Box::new(detector) as Box<dyn HandLandmarkDetector>)
        })
    }

    /// A service around an already loaded detector.
    pub fn ready(detector: Box<dyn HandLandmarkDetector>) -> Self {
        let (_status_tx, status_rx) = watch::channel(DetectorStatus::Ready);
        Self {
            detector: Arc::new(Mutex::new(Some(detector))),
            status: status_rx,
        }
    }

    pub fn status(&self) -> DetectorStatus {
        self.status.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.status.borrow(), DetectorStatus::Ready)
    }

    pub async fn wait_ready(&self) -> Result<()> {
        let mut status = self.status.clone();
        let settled = status
            .wait_for(|s| !matches!(s, DetectorStatus::Loading))
            .await
            .map_err(|_| anyhow!("hand detector loader exited without reporting"))?;
        match &*settled {
            DetectorStatus::Ready => Ok(()),
            DetectorStatus::Failed(msg) => bail!("hand detector failed to load: {msg}"),
            DetectorStatus::Loading => bail!("hand detector still loading"),
        }
    }

    /// `Ok(None)` while the detector is not ready; never waits for loading.
    pub fn detect(&self, frame: &Frame) -> Result<Option<Vec<HandLandmarks>>> {
        if !self.is_ready() {
            return Ok(None);
        }
        let mut guard = self
            .detector
            .lock()
            .map_err(|_| anyhow!("hand detector lock poisoned"))?;
        match guard.as_mut() {
            Some(detector) => detector.detect(frame).map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Deserialize)]
struct HandReply {
    #[serde(default)]
    handedness: String,
    score: f32,
    landmarks: Vec<Landmark>,
}

#[derive(Deserialize)]
struct DetectionReply {
    #[serde(default)]
    hands: Vec<HandReply>,
    #[serde(default)]
    error: Option<String>,
}

/// Talks to a helper process that runs the hand model.
///
/// The helper prints `READY` once loaded. Each request is a little-endian
/// `u32` header (width, height, channels) followed by raw RGB bytes; each
/// reply is one JSON line.
pub struct SubprocessHandDetector {
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl SubprocessHandDetector {
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .context("hand detector command is empty")?;

        log::info!("starting hand detector: {}", command.join(" "));
        let mut process = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to start hand detector {program}"))?;

        let stdin = process.stdin.take().context("hand detector has no stdin")?;
        let stdout = process.stdout.take().context("hand detector has no stdout")?;
        let mut stdout = BufReader::new(stdout);

        let mut ready = String::new();
        stdout
            .read_line(&mut ready)
            .context("hand detector closed before signalling ready")?;
        if ready.trim() != "READY" {
            let _ = process.kill();
            let _ = process.wait();
            bail!("hand detector did not signal ready, got: {}", ready.trim());
        }

        Ok(Self {
            process,
            stdin,
            stdout,
        })
    }
}

impl HandLandmarkDetector for SubprocessHandDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<HandLandmarks>> {
        let mut header = [0u8; 12];
        header[0..4].copy_from_slice(&frame.width().to_le_bytes());
        header[4..8].copy_from_slice(&frame.height().to_le_bytes());
        header[8..12].copy_from_slice(&3u32.to_le_bytes());

        self.stdin
            .write_all(&header)
            .and_then(|_| self.stdin.write_all(frame.image().as_raw()))
            .and_then(|_| self.stdin.flush())
            .context("failed to send frame to hand detector")?;

        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .context("failed to read hand detector reply")?;
        if read == 0 {
            bail!("hand detector exited");
        }
        parse_reply(&line)
    }
}

fn parse_reply(line: &str) -> Result<Vec<HandLandmarks>> {
    let reply: DetectionReply =
        serde_json::from_str(line.trim()).context("malformed hand detector reply")?;
    if let Some(error) = reply.error {
        bail!("hand detector reported: {error}");
    }
    Ok(reply
        .hands
        .into_iter()
        .filter_map(|hand| {
            let count = hand.landmarks.len();
            let parsed = HandLandmarks::new(hand.landmarks, hand.score, hand.handedness);
            if parsed.is_none() {
                log::debug!("skipping hand with {count} landmarks");
            }
            parsed
        })
        .collect())
}

impl Drop for SubprocessHandDetector {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::RgbImage;
    use std::time::Duration;

    struct Nothing;

    impl HandLandmarkDetector for Nothing {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<HandLandmarks>> {
            Ok(Vec::new())
        }
    }

    fn frame() -> Frame {
        Frame::new(RgbImage::new(8, 8), Utc::now(), 0)
    }

    #[tokio::test]
    async fn detect_returns_none_until_loaded() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let service = LandmarkService::spawn(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
            Ok(Box::new(Nothing) as Box<dyn HandLandmarkDetector>)
        });

        assert_eq!(service.status(), DetectorStatus::Loading);
        assert!(service.detect(&frame()).unwrap().is_none());

        release_tx.send(()).unwrap();
        service.wait_ready().await.unwrap();
        assert_eq!(service.status(), DetectorStatus::Ready);
        assert_eq!(service.detect(&frame()).unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn failed_loader_is_reported_to_every_clone() {
        let service = LandmarkService::spawn(|| Err(anyhow!("model file missing")));
        let clone = service.clone();
        assert!(service.wait_ready().await.is_err());
        match clone.status() {
            DetectorStatus::Failed(msg) => assert!(msg.contains("model file missing")),
            other => panic!("unexpected status {other:?}"),
        }
        assert!(clone.detect(&frame()).unwrap().is_none());
    }

    #[test]
    fn reply_parsing_skips_malformed_hands() {
        let tip = r#"{"x":0.5,"y":0.5,"z":0.0}"#;
        let full = vec![tip; 21].join(",");
        let short = vec![tip; 3].join(",");
        let line = format!(
            r#"{{"hands":[{{"handedness":"Left","score":0.9,"landmarks":[{short}]}},{{"handedness":"Right","score":0.8,"landmarks":[{full}]}}],"error":null}}"#
        );
        let hands = parse_reply(&line).unwrap();
        assert_eq!(hands.len(), 1);
        assert_eq!(hands[0].handedness, "Right");
        assert!((hands[0].confidence - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn reply_error_becomes_an_error() {
        assert!(parse_reply(r#"{"hands":[],"error":"camera frame too small"}"#).is_err());
    }

    #[tokio::test]
    async fn missing_helper_program_fails_the_service() {
        let settings = LandmarkSettings {
            detector_command: vec!["./no-such-hand-detector".into()],
            ..LandmarkSettings::default()
        };
        let service = LandmarkService::subprocess(&settings);
        assert!(service.wait_ready().await.is_err());
        assert!(matches!(service.status(), DetectorStatus::Failed(_)));
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(SubprocessHandDetector::spawn(&[]).is_err());
    }
}
