use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::iter::{IntoParallelIterator, IntoParallelRefIterator, ParallelIterator};

use crate::error::{ConfigError, DetectError};
use crate::family::{ConfigMap, FamilyId, FamilySet};
use crate::registry::{PluginRegistry, RegistryState};
use crate::types::Fiducial;

use super::dedup::deduplicate;
use super::image::ImageU8;
use super::pose::{PoseConfig, PoseEstimator};
use super::region::{Region, RegionProposer, ProposerConfig};

/// Detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    pub proposer: ProposerConfig,
    pub pose: PoseConfig,
    /// Side length of the markers in world units; scales key point marker positions.
    pub marker_size: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            proposer: ProposerConfig::default(),
            pose: PoseConfig::default(),
            marker_size: 1.0,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.proposer.validate().map_err(ConfigError::Detector)?;
        if !(self.marker_size.is_finite() && self.marker_size > 0.0) {
            return Err(ConfigError::Detector(format!(
                "marker_size must be positive, got {}",
                self.marker_size
            )));
        }
        if let Some(k) = self.pose.intrinsics {
            if !(k.fx > 0.0 && k.fy > 0.0) {
                return Err(ConfigError::Detector(format!(
                    "focal lengths must be positive, got fx={} fy={}",
                    k.fx, k.fy
                )));
            }
        }
        Ok(())
    }

    /// Parse a TOML document holding the fields of this struct.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(parse_error)?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_error(e: toml::de::Error) -> ConfigError {
    ConfigError::Parse(e.message().to_string())
}

/// Cooperative cancellation flag shared with a running detection call.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Finds and decodes fiducial markers in frames.
///
/// A detection call moves through proposing, decoding, deduplicating and
/// posing; nothing but the plugin registry outlives a call.
#[derive(Debug, Default)]
pub struct FiducialDetector {
    pub config: DetectorConfig,
    pub registry: PluginRegistry,
}

impl FiducialDetector {
    /// A detector with all families registered with default parameters.
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            registry: PluginRegistry::default(),
        }
    }

    /// Build a detector from a TOML document with an optional `[detector]`
    /// table and one optional `[plugins.<family>]` table per family.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let mut doc: toml::Table = toml::from_str(s).map_err(parse_error)?;

        let config = match doc.remove("detector") {
            Some(value) => {
                let config: DetectorConfig = value.try_into().map_err(parse_error)?;
                config.validate()?;
                config
            }
            None => DetectorConfig::default(),
        };
        let detector = Self::new(config);

        if let Some(plugins) = doc.remove("plugins") {
            let toml::Value::Table(plugins) = plugins else {
                return Err(ConfigError::Parse("'plugins' must be a table".into()));
            };
            for (name, params) in plugins {
                let family: FamilyId = name.parse()?;
                let toml::Value::Table(map) = params else {
                    return Err(ConfigError::Parse(format!("'plugins.{name}' must be a table")));
                };
                detector.registry.configure(family, &map)?;
            }
        }
        if let Some(key) = doc.keys().next() {
            return Err(ConfigError::Parse(format!("unknown section '{key}'")));
        }
        Ok(detector)
    }

    /// Configure one family's decoder. See [`PluginRegistry::configure`].
    pub fn configure(&self, family: FamilyId, map: &ConfigMap) -> Result<(), ConfigError> {
        self.registry.configure(family, map)
    }

    /// Detect markers of the `active` families in a frame.
    pub fn detect(&self, frame: &ImageU8, active: FamilySet) -> Result<Vec<Fiducial>, DetectError> {
        self.detect_with_cancel(frame, active, &CancelToken::new())
    }

    /// Like [`detect`](Self::detect), stopping early once `cancel` fires.
    ///
    /// Regions not yet decoded when the token is observed are skipped; the
    /// fiducials decoded so far are still deduplicated and posed.
    pub fn detect_with_cancel(
        &self,
        frame: &ImageU8,
        active: FamilySet,
        cancel: &CancelToken,
    ) -> Result<Vec<Fiducial>, DetectError> {
        if frame.is_empty() {
            return Err(DetectError::InvalidInput(format!(
                "frame is {}x{}",
                frame.width, frame.height
            )));
        }
        let needed = frame.stride as usize * frame.height as usize;
        if frame.stride < frame.width || frame.buf.len() < needed {
            return Err(DetectError::InvalidInput(format!(
                "buffer of {} bytes with stride {} does not cover a {}x{} frame",
                frame.buf.len(),
                frame.stride,
                frame.width,
                frame.height
            )));
        }
        if active.is_empty() {
            return Ok(Vec::new());
        }

        // Configuration changes made during this call do not apply to it.
        let registry = self.registry.snapshot();

        // Stage 1: Propose
        let regions = RegionProposer::new(self.config.proposer.clone()).propose(frame);
        log::debug!("proposed {} regions", regions.len());

        // Stage 2: Decode
        let fiducials = decode_regions(&regions, cancel, |region| {
            registry.dispatch(region, frame, active)
        });
        if cancel.is_cancelled() {
            log::debug!("cancelled with {} decodes", fiducials.len());
        } else {
            log::debug!("decoded {} candidates", fiducials.len());
        }

        Ok(self.finish(&registry, fiducials))
    }

    /// Deduplicate and pose decoded candidates.
    fn finish(&self, registry: &RegistryState, mut fiducials: Vec<Fiducial>) -> Vec<Fiducial> {
        // Stage 3: Deduplicate
        deduplicate(&mut fiducials, |f| registry.rank(f));
        fiducials.sort_by(|a, b| {
            registry
                .rank(a.family)
                .cmp(&registry.rank(b.family))
                .then(a.id.cmp(&b.id))
                .then(a.inverted.cmp(&b.inverted))
        });
        log::debug!("{} fiducials after deduplication", fiducials.len());

        // Stage 4: Pose
        let estimator = PoseEstimator::new(self.config.pose.clone());
        let marker_size = self.config.marker_size;
        let drop_on_failure = self.config.pose.drop_on_failure;
        let pose_one = |mut f: Fiducial| -> Option<Fiducial> {
            if f.key_points.is_empty() {
                return Some(f);
            }
            for kp in &mut f.key_points {
                kp.marker_pos = [kp.marker_pos[0] * marker_size, kp.marker_pos[1] * marker_size];
            }
            match estimator.estimate(&f.key_points) {
                Ok(pose) => f.pose = Some(pose),
                Err(e) => {
                    log::debug!("no pose for {} id {}: {e}", f.family, f.id);
                    if drop_on_failure {
                        return None;
                    }
                }
            }
            Some(f)
        };

        #[cfg(feature = "parallel")]
        let fiducials: Vec<Fiducial> = fiducials.into_par_iter().filter_map(pose_one).collect();

        #[cfg(not(feature = "parallel"))]
        let fiducials: Vec<Fiducial> = fiducials.into_iter().filter_map(pose_one).collect();

        fiducials
    }
}

/// Decode every region, skipping those reached after `cancel` fired.
fn decode_regions<F>(regions: &[Region], cancel: &CancelToken, decode: F) -> Vec<Fiducial>
where
    F: Fn(&Region) -> Vec<Fiducial> + Sync,
{
    let decode_one = |region: &Region| -> Vec<Fiducial> {
        if cancel.is_cancelled() {
            return Vec::new();
        }
        decode(region)
    };

    #[cfg(feature = "parallel")]
    return regions.par_iter().flat_map(decode_one).collect();

    #[cfg(not(feature = "parallel"))]
    regions.iter().flat_map(decode_one).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::pose::Transform;
    use crate::render::{paint, MarkerPattern};
    use crate::types::quad_key_points;

    fn frame_with(pattern: &MarkerPattern, corners: &[[f64; 2]; 4]) -> ImageU8 {
        let mut frame = ImageU8::filled(320, 240, 255);
        paint(&mut frame, pattern, corners);
        frame
    }

    const QUAD: [[f64; 2]; 4] = [[100.0, 60.0], [220.0, 60.0], [220.0, 180.0], [100.0, 180.0]];

    #[test]
    fn empty_frame_is_invalid_input() {
        let detector = FiducialDetector::default();
        let err = detector.detect(&ImageU8::new(0, 0), FamilySet::all()).unwrap_err();
        assert!(matches!(err, DetectError::InvalidInput(_)));

        let short = ImageU8 {
            width: 10,
            height: 10,
            stride: 10,
            buf: vec![0; 50],
        };
        assert!(detector.detect(&short, FamilySet::all()).is_err());
    }

    #[test]
    fn uniform_frames_yield_nothing() {
        let detector = FiducialDetector::default();
        for v in [0, 128, 255] {
            let frame = ImageU8::filled(64, 48, v);
            assert!(detector.detect(&frame, FamilySet::all()).unwrap().is_empty());
        }
    }

    #[test]
    fn detects_bch_with_homography_pose() {
        let frame = frame_with(&MarkerPattern::bch(7).unwrap(), &QUAD);
        let detector = FiducialDetector::default();
        let found = detector.detect(&frame, FamilySet::all()).unwrap();
        assert_eq!(found.len(), 1, "{found:?}");
        let f = &found[0];
        assert_eq!((f.family, f.id), (FamilyId::Bch, 7));
        let pose = f.pose.as_ref().unwrap();
        match &pose.transform {
            Transform::Homography(h) => {
                let c = h.project([0.0, 0.0]);
                assert!((c[0] - 160.0).abs() < 1.0 && (c[1] - 120.0).abs() < 1.0, "{c:?}");
            }
            other => panic!("expected a homography, got {other:?}"),
        }
        assert!(pose.reprojection_error < 1e-6);
    }

    #[test]
    fn inactive_families_are_skipped() {
        let frame = frame_with(&MarkerPattern::bch(7).unwrap(), &QUAD);
        let detector = FiducialDetector::default();
        let others: FamilySet = "forquads,icl1".parse().unwrap();
        assert!(detector.detect(&frame, others).unwrap().is_empty());
        assert!(detector.detect(&frame, FamilySet::empty()).unwrap().is_empty());
    }

    #[test]
    fn cancelled_call_returns_nothing_decoded() {
        let frame = frame_with(&MarkerPattern::bch(7).unwrap(), &QUAD);
        let detector = FiducialDetector::default();
        let token = CancelToken::new();
        token.cancel();
        let found = detector.detect_with_cancel(&frame, FamilySet::all(), &token).unwrap();
        assert!(found.is_empty());
    }

    #[cfg(not(feature = "parallel"))]
    #[test]
    fn cancelling_mid_frame_keeps_earlier_decodes() {
        let regions: Vec<Region> = (0..4)
            .map(|i| {
                let x = 20.0 + 70.0 * i as f64;
                Region::from_corners(&[[x, 20.0], [x + 60.0, 20.0], [x + 60.0, 80.0], [x, 80.0]])
            })
            .collect();
        let token = CancelToken::new();
        let decoded = decode_regions(&regions, &token, |region| {
            let corners = region.quad().unwrap();
            let id = (corners[0][0] / 70.0) as u32;
            if id == 1 {
                token.cancel();
            }
            vec![Fiducial::new(id, FamilyId::Bch, corners.to_vec(), 1.0)
                .with_key_points(quad_key_points(&corners, 0))]
        });
        let ids: Vec<u32> = decoded.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![0, 1]);

        // What was decoded before the cancel is still posed.
        let detector = FiducialDetector::default();
        let found = detector.finish(&detector.registry.snapshot(), decoded);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|f| f.pose.is_some()));
    }

    #[test]
    fn marker_size_scales_key_points() {
        let frame = frame_with(&MarkerPattern::bch(7).unwrap(), &QUAD);
        let detector = FiducialDetector::new(DetectorConfig {
            marker_size: 0.2,
            ..DetectorConfig::default()
        });
        let found = detector.detect(&frame, FamilySet::all()).unwrap();
        assert_eq!(found[0].key_points[0].marker_pos, [-0.1, -0.1]);
    }

    #[test]
    fn config_from_toml() {
        let cfg = DetectorConfig::from_toml_str(
            "marker_size = 0.05\n[pose]\nrefine = false\n[pose.intrinsics]\nfx = 600.0\nfy = 600.0\ncx = 320.0\ncy = 240.0\n",
        )
        .unwrap();
        assert_eq!(cfg.marker_size, 0.05);
        assert!(!cfg.pose.refine);
        assert_eq!(cfg.pose.intrinsics.unwrap().fx, 600.0);

        assert!(DetectorConfig::from_toml_str("marker_size = -1.0").is_err());
        assert!(DetectorConfig::from_toml_str("speed = 3").is_err());
    }

    #[test]
    fn detector_from_toml_configures_plugins() {
        let detector = FiducialDetector::from_toml_str(
            "[detector]\nmarker_size = 2.0\n\n[plugins.bch]\nmax_errors = 1\n\n[plugins.hierarchical]\nmax_depth = 3\n",
        )
        .unwrap();
        assert_eq!(detector.config.marker_size, 2.0);
        match detector.registry.snapshot().config(FamilyId::Bch) {
            Some(crate::family::PluginConfig::Bch(c)) => assert_eq!(c.max_errors, 1),
            other => panic!("unexpected {other:?}"),
        }

        assert!(FiducialDetector::from_toml_str("[plugins.tag36h11]\nx = 1\n").is_err());
        assert!(FiducialDetector::from_toml_str("[plugins.bch]\nmax_errors = 7\n").is_err());
        assert!(FiducialDetector::from_toml_str("[extra]\n").is_err());
    }
}
