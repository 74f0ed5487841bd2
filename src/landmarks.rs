//! Landmark feature geometry
//!
//! Turns 2D face landmarks into the per-frame [`FeatureRecord`] consumed by the
//! pipeline. Landmark detection and perspective-n-point solving happen upstream;
//! this module only does the arithmetic on their results.

use crate::types::{FeatureRecord, FrameQuality, DEFAULT_DISTANCE_CM};
use serde::{Deserialize, Serialize};

/// Spans at or below this length (px) are treated as degenerate
pub const MIN_SPAN_PX: f64 = 1e-6;
/// Inter-pupil distances at or below this length (px) are ignored
pub const MIN_IPD_PX: f64 = 1e-3;
/// Distance model: `distance_cm = DISTANCE_SCALE / ipd_px`
pub const DISTANCE_SCALE: f64 = 6000.0;
/// Viewing distance (cm) at or below which the frame counts as near work
pub const NEAR_WORK_CM: f64 = 40.0;
/// Pitch (degrees) that maps to a normalized forward-head angle of 1.0
pub const FHP_FULL_SCALE_DEG: f64 = 40.0;
/// Roll (degrees) above which neck twist adds to the posture angle
pub const ROLL_TWIST_DEG: f64 = 15.0;
/// Roll (degrees) that adds a full 1.0 to the posture angle
pub const ROLL_FULL_SCALE_DEG: f64 = 60.0;
/// Confidence assigned to the landmark proxy pose
pub const PROXY_CONFIDENCE: f64 = 0.5;
/// Posture angle reported when only the proxy pose is available
pub const PROXY_FHP_ANGLE: f64 = 0.5;
/// Brightness assumed when the frame was not measured
pub const DEFAULT_BRIGHTNESS: f64 = 128.0;
/// Frame rate reported until the capture loop supplies a measurement
pub const DEFAULT_EXTRACTOR_FPS: f64 = 30.0;

/// A 2D point
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Eye aspect ratio from six pixel-space points
/// ordered `[outer, top1, top2, inner, bottom1, bottom2]`
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> f64 {
    let [p1, p2, p3, p4, p5, p6] = eye;
    let vertical = p2.distance(p6) + p3.distance(p5);
    let horizontal = 2.0 * p1.distance(p4);
    if horizontal > MIN_SPAN_PX {
        vertical / horizontal
    } else {
        0.0
    }
}

/// Mouth aspect ratio: lip gap over mouth width
pub fn mouth_aspect_ratio(top: Point, bottom: Point, left: Point, right: Point) -> f64 {
    let width = left.distance(&right);
    if width > MIN_SPAN_PX {
        top.distance(&bottom) / width
    } else {
        0.0
    }
}

/// Viewing distance from the inter-pupil distance in pixels
pub fn estimate_distance_cm(ipd_px: Option<f64>) -> f64 {
    match ipd_px {
        Some(ipd) if ipd > MIN_IPD_PX => DISTANCE_SCALE / ipd,
        _ => DEFAULT_DISTANCE_CM,
    }
}

pub fn is_near_work(distance_cm: f64) -> bool {
    distance_cm <= NEAR_WORK_CM
}

/// Rough roll and pitch (radians) from normalized eye-corner and nose positions
pub fn roll_pitch_proxy(left_eye: Point, right_eye: Point, nose: Point) -> (f64, f64) {
    let center_y = (left_eye.y + right_eye.y) / 2.0;
    let roll = (right_eye.y - left_eye.y).atan2(right_eye.x - left_eye.x + 1e-6);
    let pitch = (nose.y - center_y).atan2(0.5);
    (roll, pitch)
}

/// Forward-head posture classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostureSeverity {
    Normal,
    Mild,
    Moderate,
    Severe,
    /// Pose came from the proxy and cannot be classified
    Unknown,
}

impl PostureSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostureSeverity::Normal => "normal",
            PostureSeverity::Mild => "mild",
            PostureSeverity::Moderate => "moderate",
            PostureSeverity::Severe => "severe",
            PostureSeverity::Unknown => "unknown",
        }
    }
}

/// Normalized forward-head angle with its severity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeckPosture {
    /// 0-1
    pub fhp_angle: f64,
    pub severity: PostureSeverity,
}

/// Classify neck posture from head pitch and roll in degrees
pub fn neck_posture(pitch_deg: f64, roll_deg: f64) -> NeckPosture {
    let pitch = pitch_deg.abs();
    let roll = roll_deg.abs();

    let severity = if pitch < 15.0 {
        PostureSeverity::Normal
    } else if pitch < 25.0 {
        PostureSeverity::Mild
    } else if pitch < 35.0 {
        PostureSeverity::Moderate
    } else {
        PostureSeverity::Severe
    };
    let mut posture = NeckPosture {
        fhp_angle: (pitch / FHP_FULL_SCALE_DEG).min(1.0),
        severity,
    };

    if roll > ROLL_TWIST_DEG {
        posture.fhp_angle = (posture.fhp_angle + roll / ROLL_FULL_SCALE_DEG).min(1.0);
        if posture.severity == PostureSeverity::Normal {
            posture.severity = PostureSeverity::Mild;
        }
    }
    posture
}

/// How a head pose was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseMethod {
    Pnp,
    Proxy,
}

/// Result of an upstream perspective-n-point solve (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PnpSolution {
    pub pitch_deg: f64,
    pub yaw_deg: f64,
    pub roll_deg: f64,
    /// 0-1, from reprojection error
    pub confidence: f64,
}

/// Head orientation in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
    pub confidence: f64,
    pub method: PoseMethod,
}

impl HeadPose {
    /// Use the solved pose when there is one, otherwise fall back to the landmark proxy.
    ///
    /// The proxy carries no posture classification, so it reports a fixed
    /// mid-scale angle with unknown severity.
    pub fn resolve(pnp: Option<PnpSolution>, face: &FaceGeometry) -> (HeadPose, NeckPosture) {
        match pnp {
            Some(solved) => (
                HeadPose {
                    pitch: solved.pitch_deg,
                    yaw: solved.yaw_deg,
                    roll: solved.roll_deg,
                    confidence: solved.confidence,
                    method: PoseMethod::Pnp,
                },
                neck_posture(solved.pitch_deg, solved.roll_deg),
            ),
            None => {
                let (roll, pitch) =
                    roll_pitch_proxy(face.left_eye_corner, face.right_eye_corner, face.nose_tip);
                (
                    HeadPose {
                        pitch: pitch.to_degrees(),
                        yaw: 0.0,
                        roll: roll.to_degrees(),
                        confidence: PROXY_CONFIDENCE,
                        method: PoseMethod::Proxy,
                    },
                    NeckPosture {
                        fhp_angle: PROXY_FHP_ANGLE,
                        severity: PostureSeverity::Unknown,
                    },
                )
            }
        }
    }
}

/// Lighting label derived from mean brightness (0-255)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightingQuality {
    TooDark,
    Dim,
    Good,
    Bright,
    TooBright,
}

impl LightingQuality {
    pub fn from_brightness(brightness: f64) -> Self {
        if brightness < 30.0 {
            LightingQuality::TooDark
        } else if brightness < 80.0 {
            LightingQuality::Dim
        } else if brightness > 220.0 {
            LightingQuality::TooBright
        } else if brightness > 180.0 {
            LightingQuality::Bright
        } else {
            LightingQuality::Good
        }
    }
}

/// Landmarks of the tracked face, in normalized (0-1) image coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceGeometry {
    pub image_width: f64,
    pub image_height: f64,
    /// `[outer, top1, top2, inner, bottom1, bottom2]`
    pub left_eye: [Point; 6],
    pub right_eye: [Point; 6],
    pub mouth_top: Point,
    pub mouth_bottom: Point,
    pub mouth_left: Point,
    pub mouth_right: Point,
    pub left_eye_corner: Point,
    pub right_eye_corner: Point,
    pub nose_tip: Point,
    /// Distance measured upstream (e.g. by a face tracker); overrides the IPD estimate
    #[serde(default)]
    pub target_distance_cm: Option<f64>,
}

impl FaceGeometry {
    fn to_px(&self, p: Point) -> Point {
        Point::new(p.x * self.image_width, p.y * self.image_height)
    }

    /// Mean eye aspect ratio of both eyes
    pub fn ear(&self) -> f64 {
        let left = eye_aspect_ratio(&self.left_eye.map(|p| self.to_px(p)));
        let right = eye_aspect_ratio(&self.right_eye.map(|p| self.to_px(p)));
        (left + right) / 2.0
    }

    pub fn mar(&self) -> f64 {
        mouth_aspect_ratio(
            self.to_px(self.mouth_top),
            self.to_px(self.mouth_bottom),
            self.to_px(self.mouth_left),
            self.to_px(self.mouth_right),
        )
    }

    /// Distance between the outer eye corners in pixels
    pub fn interpupil_px(&self) -> f64 {
        self.to_px(self.left_eye_corner)
            .distance(&self.to_px(self.right_eye_corner))
    }

    pub fn distance_cm(&self) -> f64 {
        self.target_distance_cm
            .unwrap_or_else(|| estimate_distance_cm(Some(self.interpupil_px())))
    }
}

/// Everything derived from one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub record: FeatureRecord,
    pub head_pose: Option<HeadPose>,
    pub neck: Option<NeckPosture>,
    pub brightness: f64,
    pub lighting_quality: LightingQuality,
}

/// Per-frame feature extraction
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    fps: f64,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_EXTRACTOR_FPS)
    }
}

impl FeatureExtractor {
    pub fn new(fps: f64) -> Self {
        Self { fps }
    }

    /// Update the measured capture frame rate
    pub fn set_fps(&mut self, fps: f64) {
        self.fps = fps;
    }

    /// Feature record for one frame
    pub fn extract(
        &self,
        face: Option<&FaceGeometry>,
        pnp: Option<PnpSolution>,
        brightness: Option<f64>,
    ) -> FeatureRecord {
        self.analyze(face, pnp, brightness).record
    }

    /// Feature record plus pose, posture and lighting details.
    ///
    /// Without a face, eye and mouth ratios are left unset so downstream
    /// stages skip them, and occlusion is 1.
    pub fn analyze(
        &self,
        face: Option<&FaceGeometry>,
        pnp: Option<PnpSolution>,
        brightness: Option<f64>,
    ) -> FrameAnalysis {
        let brightness = brightness.unwrap_or(DEFAULT_BRIGHTNESS);
        let quality = FrameQuality {
            fps: self.fps,
            occlusion: if face.is_some() { 0.0 } else { 1.0 },
            lighting: brightness / 255.0,
        };

        let mut record = FeatureRecord {
            quality,
            ..Default::default()
        };
        let mut head_pose = None;
        let mut neck = None;

        if let Some(face) = face {
            let (pose, posture) = HeadPose::resolve(pnp, face);
            let distance_cm = face.distance_cm();
            record.ear = Some(face.ear());
            record.mar = Some(face.mar());
            record.posture_angle_norm = posture.fhp_angle;
            record.distance_cm = distance_cm;
            record.near_work = if is_near_work(distance_cm) { 1.0 } else { 0.0 };
            head_pose = Some(pose);
            neck = Some(posture);
        }

        FrameAnalysis {
            record,
            head_pose,
            neck,
            brightness,
            lighting_quality: LightingQuality::from_brightness(brightness),
        }
    }
}
