//! Cube face enumeration and per-face sampling basis.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// One face of a cubemap, in API layer order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum CubeFace {
    PositiveX = 0,
    NegativeX = 1,
    PositiveY = 2,
    NegativeY = 3,
    PositiveZ = 4,
    NegativeZ = 5,
}

impl CubeFace {
    /// All faces in layer order.
    pub const ALL: [Self; 6] = [
        Self::PositiveX,
        Self::NegativeX,
        Self::PositiveY,
        Self::NegativeY,
        Self::PositiveZ,
        Self::NegativeZ,
    ];

    /// Array layer of this face within a single cubemap
    #[inline]
    pub const fn index(self) -> u32 {
        self as u32
    }

    /// Sampling basis for this face.
    ///
    /// Axes follow the Vulkan cube map face selection table: `u_axis` is the
    /// direction of increasing `s`, `v_axis` the direction of increasing `t`.
    pub const fn basis(self) -> FaceBasis {
        let (forward, u_axis, v_axis) = match self {
            Self::PositiveX => (Vec3::X, Vec3::NEG_Z, Vec3::NEG_Y),
            Self::NegativeX => (Vec3::NEG_X, Vec3::Z, Vec3::NEG_Y),
            Self::PositiveY => (Vec3::Y, Vec3::X, Vec3::Z),
            Self::NegativeY => (Vec3::NEG_Y, Vec3::X, Vec3::NEG_Z),
            Self::PositiveZ => (Vec3::Z, Vec3::X, Vec3::NEG_Y),
            Self::NegativeZ => (Vec3::NEG_Z, Vec3::NEG_X, Vec3::NEG_Y),
        };
        FaceBasis {
            forward,
            u_axis,
            v_axis,
        }
    }
}

/// Orthonormal frame used to turn face UVs into sample directions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceBasis {
    /// Face normal (major axis)
    pub forward: Vec3,
    /// Direction of increasing `u`
    pub u_axis: Vec3,
    /// Direction of increasing `v`
    pub v_axis: Vec3,
}

impl FaceBasis {
    /// Unnormalized sample direction for face UV in `[0, 1]^2`.
    #[inline]
    pub fn direction(&self, u: f32, v: f32) -> Vec3 {
        self.forward + self.u_axis * (2.0 * u - 1.0) + self.v_axis * (2.0 * v - 1.0)
    }
}
