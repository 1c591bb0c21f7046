// ONNX Runtime pose landmarker
// Runs a BlazePose landmark model: 256x256 RGB input in [0, 1], a 39 x 5 landmark
// tensor (x, y, z in input pixels, visibility and presence logits) and a pose flag.

use super::landmarker::PoseLandmarker;
use crate::models::pose::{
    LandmarkerOptions, NormalizedPoint, PoseError, PoseResult, RawPoseResult,
    BODY_LANDMARK_COUNT,
};
use image::RgbImage;
use ndarray::Array4;
use ort::{inputs, session::Session, value::TensorRef};
use std::sync::Mutex;
use tracing::{debug, info};

const INPUT_SIZE: usize = 256;
const VALUES_PER_LANDMARK: usize = 5;
/// Upper bound on landmark rows, to tell the landmark tensor apart from heatmaps
const MAX_LANDMARK_ROWS: usize = 64;
/// Growth applied to the landmark bounding box when tracking
const ROI_SCALE: f32 = 1.25;
/// Tracking state older than this is discarded
const TRACKING_RESET_GAP_MS: i64 = 1000;

/// Square crop of the working image, in pixels. May extend past the edges.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Roi {
    left: f32,
    top: f32,
    size: f32,
}

impl Roi {
    /// Whole image, letterboxed to a square
    fn full_frame(width: u32, height: u32) -> Self {
        let size = width.max(height) as f32;
        Self {
            left: (width as f32 - size) / 2.0,
            top: (height as f32 - size) / 2.0,
            size,
        }
    }

    /// Square around the given pixel positions
    fn around(pixels: &[(f32, f32)]) -> Option<Self> {
        let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
        let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
        for &(x, y) in pixels.iter().filter(|(x, y)| x.is_finite() && y.is_finite()) {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        let size = (max_x - min_x).max(max_y - min_y) * ROI_SCALE;
        if !size.is_finite() || size < 1.0 {
            return None;
        }

        let center_x = (min_x + max_x) / 2.0;
        let center_y = (min_y + max_y) / 2.0;
        Some(Self {
            left: center_x - size / 2.0,
            top: center_y - size / 2.0,
            size,
        })
    }
}

struct TrackingState {
    roi: Roi,
    last_timestamp_ms: i64,
}

struct Detection {
    points: Vec<NormalizedPoint>,
    pixels: Vec<(f32, f32)>,
    score: f32,
}

/// Video-mode pose track. Follows the previous pose's ROI and falls back to
/// full-frame detection when the track is lost or stale.
struct PoseTracker {
    detection_threshold: f32,
    tracking_threshold: f32,
    state: Option<TrackingState>,
}

impl PoseTracker {
    fn new(options: &LandmarkerOptions) -> Self {
        Self {
            detection_threshold: options
                .min_detection_confidence
                .max(options.min_presence_confidence),
            tracking_threshold: options
                .min_tracking_confidence
                .max(options.min_presence_confidence),
            state: None,
        }
    }

    fn reset(&mut self) {
        self.state = None;
    }

    /// Stateless full-frame detection
    fn detect<F>(&self, width: u32, height: u32, mut run_roi: F) -> PoseResult<RawPoseResult>
    where
        F: FnMut(Roi) -> PoseResult<Detection>,
    {
        let detection = run_roi(Roi::full_frame(width, height))?;
        if detection.score >= self.detection_threshold {
            Ok(RawPoseResult::single(detection.points))
        } else {
            Ok(RawPoseResult::empty())
        }
    }

    fn track<F>(
        &mut self,
        width: u32,
        height: u32,
        timestamp_ms: i64,
        mut run_roi: F,
    ) -> PoseResult<RawPoseResult>
    where
        F: FnMut(Roi) -> PoseResult<Detection>,
    {
        if let Some(state) = self.state.as_ref() {
            let gap = timestamp_ms - state.last_timestamp_ms;
            if gap > TRACKING_RESET_GAP_MS {
                debug!("Dropping pose track after {}ms gap", gap);
                self.state = None;
            }
        }

        // Follow the previous pose first
        if let Some(roi) = self.state.as_ref().map(|state| state.roi) {
            let detection = run_roi(roi)?;
            if detection.score >= self.tracking_threshold {
                if let Some(next_roi) = Roi::around(&detection.pixels) {
                    self.state = Some(TrackingState {
                        roi: next_roi,
                        last_timestamp_ms: timestamp_ms,
                    });
                    return Ok(RawPoseResult::single(detection.points));
                }
            }
            debug!("Pose track lost at {}ms", timestamp_ms);
            self.state = None;
        }

        // Fresh full-frame detection
        let detection = run_roi(Roi::full_frame(width, height))?;
        if detection.score < self.detection_threshold {
            return Ok(RawPoseResult::empty());
        }

        self.state = Roi::around(&detection.pixels).map(|roi| TrackingState {
            roi,
            last_timestamp_ms: timestamp_ms,
        });
        Ok(RawPoseResult::single(detection.points))
    }
}

pub struct OnnxPoseLandmarker {
    // Session::run needs &mut, so inference is serialized
    session: Mutex<Option<Session>>,
    input_name: String,
    output_names: Vec<String>,
    options: LandmarkerOptions,
    tracker: Mutex<PoseTracker>,
}

impl OnnxPoseLandmarker {
    fn run_roi(&self, image: &RgbImage, roi: Roi) -> PoseResult<Detection> {
        let input = preprocess(image, roi);
        let (landmarks, flag) = self.infer(&input)?;
        decode(&landmarks, flag, roi, image.width(), image.height())
    }

    fn infer(&self, input: &Array4<f32>) -> PoseResult<(Vec<f32>, f32)> {
        let mut guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let session = guard.as_mut().ok_or(PoseError::NotInitialized)?;

        let tensor_ref = TensorRef::from_array_view(input.view()).map_err(|e| {
            PoseError::InferenceFailed(format!("failed to create tensor ref: {}", e))
        })?;
        let outputs = session
            .run(inputs![self.input_name.as_str() => tensor_ref])
            .map_err(|e| PoseError::InferenceFailed(format!("inference failed: {}", e)))?;

        let mut landmarks = None;
        let mut flag = None;
        for output_name in &self.output_names {
            let array = outputs[output_name.as_str()]
                .try_extract_array::<f32>()
                .map_err(|e| {
                    PoseError::InferenceFailed(format!("output '{}' is not f32: {}", output_name, e))
                })?;

            let len = array.len();
            let is_landmarks = len % VALUES_PER_LANDMARK == 0
                && (BODY_LANDMARK_COUNT * VALUES_PER_LANDMARK..=MAX_LANDMARK_ROWS * VALUES_PER_LANDMARK)
                    .contains(&len);

            if landmarks.is_none() && is_landmarks {
                landmarks = Some(array.iter().copied().collect::<Vec<f32>>());
            } else if flag.is_none() && len == 1 {
                flag = array.iter().next().copied();
            }
        }

        match (landmarks, flag) {
            (Some(landmarks), Some(flag)) => Ok((landmarks, flag)),
            _ => Err(PoseError::InferenceFailed(format!(
                "model outputs {:?} do not include landmarks and a pose flag",
                self.output_names
            ))),
        }
    }
}

impl PoseLandmarker for OnnxPoseLandmarker {
    fn create(options: &LandmarkerOptions) -> PoseResult<Self> {
        options.validate()?;
        if !options.model_path.is_file() {
            return Err(PoseError::ModelLoadFailed(format!(
                "model file not found: {}",
                options.model_path.display()
            )));
        }

        let builder = Session::builder().map_err(|e| {
            PoseError::ModelLoadFailed(format!("failed to create session builder: {}", e))
        })?;
        let session = builder.commit_from_file(&options.model_path).map_err(|e| {
            PoseError::ModelLoadFailed(format!(
                "failed to load model from {}: {}",
                options.model_path.display(),
                e
            ))
        })?;

        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or_else(|| PoseError::ModelLoadFailed("model has no inputs".to_string()))?;
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|output| output.name().to_string())
            .collect();

        info!(
            "Loaded pose landmark model {:?} (input '{}', outputs {:?}, {} mode)",
            options.model_path, input_name, output_names, options.running_mode
        );

        Ok(Self {
            session: Mutex::new(Some(session)),
            input_name,
            output_names,
            options: options.clone(),
            tracker: Mutex::new(PoseTracker::new(options)),
        })
    }

    fn detect(&self, image: &RgbImage) -> PoseResult<RawPoseResult> {
        let tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
        tracker.detect(image.width(), image.height(), |roi| self.run_roi(image, roi))
    }

    fn detect_for_video(&self, image: &RgbImage, timestamp_ms: i64) -> PoseResult<RawPoseResult> {
        let mut tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
        tracker.track(image.width(), image.height(), timestamp_ms, |roi| {
            self.run_roi(image, roi)
        })
    }

    fn close(&self) {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.tracker.lock().unwrap_or_else(|e| e.into_inner()).reset();
    }

    fn model_info(&self) -> String {
        format!(
            "ONNX Runtime BlazePose landmarker ({})",
            self.options.model_path.display()
        )
    }
}

/// Sample the ROI into a [1, 256, 256, 3] tensor; outside the image is black
fn preprocess(image: &RgbImage, roi: Roi) -> Array4<f32> {
    let scale = roi.size / INPUT_SIZE as f32;
    let (width, height) = (image.width() as f32, image.height() as f32);

    Array4::from_shape_fn((1, INPUT_SIZE, INPUT_SIZE, 3), |(_, y, x, c)| {
        let src_x = roi.left + (x as f32 + 0.5) * scale;
        let src_y = roi.top + (y as f32 + 0.5) * scale;
        if src_x < 0.0 || src_y < 0.0 || src_x >= width || src_y >= height {
            return 0.0;
        }
        image.get_pixel(src_x as u32, src_y as u32)[c] as f32 / 255.0
    })
}

/// Map model output back to the working image
fn decode(raw: &[f32], flag: f32, roi: Roi, width: u32, height: u32) -> PoseResult<Detection> {
    if raw.len() < BODY_LANDMARK_COUNT * VALUES_PER_LANDMARK {
        return Err(PoseError::InferenceFailed(format!(
            "landmark tensor has {} values",
            raw.len()
        )));
    }

    let scale = roi.size / INPUT_SIZE as f32;
    let (width, height) = (width as f32, height as f32);
    let mut points = Vec::with_capacity(BODY_LANDMARK_COUNT);
    let mut pixels = Vec::with_capacity(BODY_LANDMARK_COUNT);

    for row in raw.chunks_exact(VALUES_PER_LANDMARK).take(BODY_LANDMARK_COUNT) {
        let px = roi.left + row[0] * scale;
        let py = roi.top + row[1] * scale;
        let z = row[2] * scale / width;

        pixels.push((px, py));
        points.push(
            NormalizedPoint::new(px / width, py / height, z)
                .with_scores(sigmoid(row[3]), sigmoid(row[4])),
        );
    }

    // Some exports emit the flag as a logit
    let score = if (0.0..=1.0).contains(&flag) { flag } else { sigmoid(flag) };

    Ok(Detection {
        points,
        pixels,
        score,
    })
}

fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}
