use std::io::Cursor;

use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

/// How the spiral was drawn. The numeric codes are part of the service contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SpiralMethod {
    Paper = 1,
    Webcam = 2,
    AirDraw = 3,
}

impl SpiralMethod {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<SpiralMethod> for u8 {
    fn from(method: SpiralMethod) -> Self {
        method.code()
    }
}

impl TryFrom<u8> for SpiralMethod {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(SpiralMethod::Paper),
            2 => Ok(SpiralMethod::Webcam),
            3 => Ok(SpiralMethod::AirDraw),
            other => Err(format!("unknown spiral method code {other}")),
        }
    }
}

/// Whole seconds between the first stroke and submit, floored and never negative.
pub fn draw_duration_secs(started_at: Option<DateTime<Utc>>, stopped_at: Option<DateTime<Utc>>) -> u64 {
    match (started_at, stopped_at) {
        (Some(start), Some(stop)) => {
            let millis = (stop - start).num_milliseconds();
            if millis <= 0 {
                0
            } else {
                (millis / 1000) as u64
            }
        }
        _ => 0,
    }
}

/// What leaves the pipeline: one PNG plus timing metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    #[serde(skip)]
    pub image_png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub draw_duration_secs: u64,
    pub method: SpiralMethod,
    pub captured_at: DateTime<Utc>,
}

impl SubmissionPayload {
    pub fn encode(
        canvas: &RgbaImage,
        draw_duration_secs: u64,
        method: SpiralMethod,
        captured_at: DateTime<Utc>,
    ) -> Result<Self, CaptureError> {
        if canvas.width() == 0 || canvas.height() == 0 {
            return Err(CaptureError::EncodingFailure(
                "drawing canvas is empty".to_string(),
            ));
        }

        let mut bytes = Cursor::new(Vec::new());
        canvas
            .write_to(&mut bytes, ImageFormat::Png)
            .map_err(|err| CaptureError::EncodingFailure(err.to_string()))?;

        Ok(Self {
            image_png: bytes.into_inner(),
            width: canvas.width(),
            height: canvas.height(),
            draw_duration_secs,
            method,
            captured_at,
        })
    }

    /// A photographed or scanned paper drawing (JPEG or PNG), re-encoded as PNG.
    pub fn paper(
        image: &[u8],
        draw_duration_secs: u64,
        captured_at: DateTime<Utc>,
    ) -> Result<Self, CaptureError> {
        let decoded = image::load_from_memory(image)
            .map_err(|err| CaptureError::EncodingFailure(format!("unreadable image: {err}")))?;
        Self::encode(
            &decoded.to_rgba8(),
            draw_duration_secs,
            SpiralMethod::Paper,
            captured_at,
        )
    }

    pub fn image_len(&self) -> usize {
        self.image_png.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use image::Rgba;

    #[test]
    fn method_codes_match_the_service() {
        assert_eq!(SpiralMethod::Paper.code(), 1);
        assert_eq!(SpiralMethod::Webcam.code(), 2);
        assert_eq!(SpiralMethod::AirDraw.code(), 3);
        assert_eq!(serde_json::to_string(&SpiralMethod::AirDraw).unwrap(), "3");
        assert_eq!(
            serde_json::from_str::<SpiralMethod>("2").unwrap(),
            SpiralMethod::Webcam
        );
        assert!(serde_json::from_str::<SpiralMethod>("4").is_err());
    }

    #[test]
    fn duration_is_floored_and_never_negative() {
        let start = Utc::now();
        let at = |ms| Some(start + Duration::milliseconds(ms));
        assert_eq!(draw_duration_secs(Some(start), at(12_999)), 12);
        assert_eq!(draw_duration_secs(Some(start), at(999)), 0);
        assert_eq!(draw_duration_secs(Some(start), at(-3_000)), 0);
        assert_eq!(draw_duration_secs(None, at(5_000)), 0);
    }

    #[test]
    fn canvas_is_encoded_as_png() {
        let canvas = RgbaImage::from_pixel(16, 8, Rgba([59, 130, 246, 255]));
        let payload =
            SubmissionPayload::encode(&canvas, 7, SpiralMethod::AirDraw, Utc::now()).unwrap();
        assert_eq!(&payload.image_png[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!((payload.width, payload.height), (16, 8));

        let decoded = image::load_from_memory(&payload.image_png).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(3, 3), &Rgba([59, 130, 246, 255]));
    }

    #[test]
    fn empty_canvas_is_an_encoding_failure() {
        let err = SubmissionPayload::encode(&RgbaImage::new(0, 0), 0, SpiralMethod::Webcam, Utc::now())
            .unwrap_err();
        assert!(matches!(err, CaptureError::EncodingFailure(_)));
    }

    #[test]
    fn paper_upload_is_reencoded_as_png() {
        let photo = image::RgbImage::from_pixel(20, 10, image::Rgb([240, 240, 235]));
        let mut jpeg = Cursor::new(Vec::new());
        photo.write_to(&mut jpeg, ImageFormat::Jpeg).unwrap();

        let payload = SubmissionPayload::paper(jpeg.get_ref(), 41, Utc::now()).unwrap();
        assert_eq!(payload.method, SpiralMethod::Paper);
        assert_eq!(payload.draw_duration_secs, 41);
        assert_eq!((payload.width, payload.height), (20, 10));
        assert_eq!(&payload.image_png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn unreadable_paper_upload_is_an_encoding_failure() {
        let err = SubmissionPayload::paper(b"not an image", 3, Utc::now()).unwrap_err();
        assert!(matches!(err, CaptureError::EncodingFailure(_)));
    }
}
