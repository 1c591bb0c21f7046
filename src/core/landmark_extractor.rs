use crate::models::pose::{
    landmark_name, Landmark, NormalizedPoint, RawPoseResult, BODY_LANDMARK_COUNT,
};
use tracing::warn;

/// Landmarks of the first detected pose, or None when there is no usable pose.
///
/// Missing scores default to 1.0. `x`, `y` and the scores are clamped to [0, 1];
/// `z` is passed through. Poses shorter than the body table are rejected and
/// extra points are ignored.
pub fn extract(raw: &RawPoseResult) -> Option<Vec<Landmark>> {
    let pose = raw.first_pose()?;

    if pose.len() < BODY_LANDMARK_COUNT {
        warn!(
            "Discarding malformed pose with {} of {} landmarks",
            pose.len(),
            BODY_LANDMARK_COUNT
        );
        return None;
    }

    Some(
        pose.iter()
            .take(BODY_LANDMARK_COUNT)
            .enumerate()
            .map(|(index, point)| to_landmark(index, point))
            .collect(),
    )
}

fn to_landmark(index: usize, point: &NormalizedPoint) -> Landmark {
    Landmark {
        name: landmark_name(index).into_owned(),
        x: unit(point.x),
        y: unit(point.y),
        z: point.z,
        visibility: point.visibility.map(unit).unwrap_or(1.0),
        presence: point.presence.map(unit).unwrap_or(1.0),
    }
}

fn unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pose::BodyLandmark;

    fn pose(len: usize) -> Vec<NormalizedPoint> {
        (0..len)
            .map(|i| NormalizedPoint::new(i as f32 / 40.0, 0.5, -0.1))
            .collect()
    }

    #[test]
    fn test_no_pose() {
        assert!(extract(&RawPoseResult::empty()).is_none());
    }

    #[test]
    fn test_names_and_order() {
        let landmarks = extract(&RawPoseResult::single(pose(33))).unwrap();

        assert_eq!(landmarks.len(), 33);
        for (landmark, expected) in landmarks.iter().zip(BodyLandmark::ALL) {
            assert_eq!(landmark.name, expected.name());
        }
        assert_eq!(landmarks[0].name, "NOSE");
        assert_eq!(landmarks[32].name, "RIGHT_FOOT_INDEX");
    }

    #[test]
    fn test_missing_scores_default_to_one() {
        let landmarks = extract(&RawPoseResult::single(pose(33))).unwrap();
        assert!(landmarks.iter().all(|l| l.visibility == 1.0 && l.presence == 1.0));
        assert_eq!(landmarks[0].z, -0.1);
    }

    #[test]
    fn test_scores_are_kept() {
        let mut points = pose(33);
        points[5] = points[5].with_scores(0.25, 0.75);

        let landmarks = extract(&RawPoseResult::single(points)).unwrap();
        assert_eq!(landmarks[5].visibility, 0.25);
        assert_eq!(landmarks[5].presence, 0.75);
    }

    #[test]
    fn test_coordinates_are_clamped() {
        let mut points = pose(33);
        points[15] = NormalizedPoint::new(1.3, -0.2, 0.4).with_scores(1.2, f32::NAN);

        let landmarks = extract(&RawPoseResult::single(points)).unwrap();
        assert_eq!(landmarks[15].x, 1.0);
        assert_eq!(landmarks[15].y, 0.0);
        assert_eq!(landmarks[15].z, 0.4);
        assert_eq!(landmarks[15].visibility, 1.0);
        assert_eq!(landmarks[15].presence, 0.0);
    }

    #[test]
    fn test_only_first_pose_is_used() {
        let first = pose(33);
        let second: Vec<_> = (0..33).map(|_| NormalizedPoint::new(0.9, 0.9, 0.0)).collect();
        let raw = RawPoseResult { poses: vec![first, second] };

        let landmarks = extract(&raw).unwrap();
        assert_eq!(landmarks[0].x, 0.0);
        assert_eq!(landmarks[1].x, 1.0 / 40.0);
    }

    #[test]
    fn test_malformed_pose_is_rejected() {
        assert!(extract(&RawPoseResult::single(pose(20))).is_none());
    }

    #[test]
    fn test_extra_points_are_ignored() {
        let landmarks = extract(&RawPoseResult::single(pose(39))).unwrap();
        assert_eq!(landmarks.len(), 33);
        assert!(landmarks.iter().all(|l| !l.name.starts_with("UNKNOWN_")));
    }
}
