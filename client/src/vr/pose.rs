//! Head pose and the rotation math the latency probe needs.

/// Rigid pose: orientation quaternion (x, y, z, w) and position in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub orientation: [f32; 4],
    pub position: [f32; 3],
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            orientation: [0.0, 0.0, 0.0, 1.0],
            position: [0.0, 0.0, 0.0],
        }
    }
}

impl Pose {
    /// Pose rotated `degrees` about +Y (yaw), at `position`.
    pub fn from_yaw_degrees(degrees: f32, position: [f32; 3]) -> Self {
        let half = degrees.to_radians() * 0.5;
        Self {
            orientation: [0.0, half.sin(), 0.0, half.cos()],
            position,
        }
    }

    /// Rotation about the Y axis in radians, from the pitch-yaw-roll
    /// Euler decomposition.  Range is [-pi/2, pi/2].
    pub fn yaw(&self) -> f32 {
        let [x, y, z, w] = self.orientation;
        (-2.0 * (x * z - w * y)).clamp(-1.0, 1.0).asin()
    }
}

/// Signed yaw difference between the pose a frame was rendered with and
/// the pose tracked when it was displayed, in degrees.
pub fn angular_delta_degrees(rendered: &Pose, tracked: &Pose) -> f32 {
    (rendered.yaw() - tracked.yaw()).to_degrees()
}
