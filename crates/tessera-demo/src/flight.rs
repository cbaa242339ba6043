//! A scripted camera: a long descent across the map followed by a low orbit.

use glam::{DMat4, DVec3};
use tessera_terrain::Extent;

const START_ALTITUDE_M: f64 = 80_000.0;
const ORBIT_ALTITUDE_M: f64 = 3_000.0;

/// One camera pose.
#[derive(Clone, Copy, Debug)]
pub struct View {
    pub eye: DVec3,
    pub target: DVec3,
}

impl View {
    /// OpenGL-style view-projection for this pose.
    pub fn view_projection(&self, aspect: f64, vertical_fov: f64) -> DMat4 {
        let near = 10.0;
        let far = self.eye.z.max(1.0) * 100.0;
        DMat4::perspective_rh_gl(vertical_fov, aspect, near, far)
            * DMat4::look_at_rh(self.eye, self.target, DVec3::Z)
    }
}

pub struct Flight {
    extent: Extent,
}

impl Flight {
    pub fn new(extent: Extent) -> Self {
        Self { extent }
    }

    /// The pose at `frame` of a flight lasting `frames` frames.
    pub fn view(&self, frame: u64, frames: u64) -> View {
        let t = frame as f64 / frames.max(1) as f64;
        let (cx, cy) = self.extent.center();
        let reach = self.extent.width().min(self.extent.height()) * 0.35;

        if t < 0.5 {
            // diagonal descent from the north-west towards the centre
            let s = t / 0.5;
            let start = DVec3::new(cx - reach, cy + reach, START_ALTITUDE_M);
            let end = DVec3::new(cx, cy, ORBIT_ALTITUDE_M);
            let eye = start.lerp(end, s);
            let target = DVec3::new(eye.x + reach * 0.1, eye.y - reach * 0.1, 0.0);
            View { eye, target }
        } else {
            let angle = (t - 0.5) / 0.5 * std::f64::consts::TAU;
            let radius = reach * 0.25;
            let eye = DVec3::new(cx + radius * angle.sin(), cy + radius * (angle.cos() - 1.0), ORBIT_ALTITUDE_M);
            let heading = DVec3::new(angle.cos(), -angle.sin(), 0.0);
            View {
                eye,
                target: DVec3::new(eye.x, eye.y, 0.0) + heading * 10_000.0,
            }
        }
    }
}
