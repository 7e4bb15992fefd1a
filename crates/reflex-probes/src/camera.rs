//! Camera utilities

use glam::{Mat4, Vec3};

/// Camera data for rendering
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Camera {
    /// Combined view-projection matrix
    pub view_proj: Mat4,
    /// Camera position in world space
    pub position: Vec3,
    /// Elapsed time in seconds
    pub time: f32,
}

impl Camera {
    /// Camera rendering one face of a cube map captured at `position`
    pub fn cube_face(position: Vec3, face: CubeFace, near: f32, far: f32) -> Self {
        Self {
            view_proj: CubeFace::projection(near, far) * face.view(position),
            position,
            time: 0.0,
        }
    }
}

/// One face of a cube map, in array-layer order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    /// Texture array layer of this face
    pub fn layer(self) -> u32 {
        self as u32
    }

    pub fn forward(self) -> Vec3 {
        match self {
            CubeFace::PositiveX => Vec3::X,
            CubeFace::NegativeX => Vec3::NEG_X,
            CubeFace::PositiveY => Vec3::Y,
            CubeFace::NegativeY => Vec3::NEG_Y,
            CubeFace::PositiveZ => Vec3::Z,
            CubeFace::NegativeZ => Vec3::NEG_Z,
        }
    }

    /// Up vector before the projection's vertical flip.
    pub fn up(self) -> Vec3 {
        match self {
            CubeFace::PositiveY => Vec3::Z,
            CubeFace::NegativeY => Vec3::NEG_Z,
            _ => Vec3::NEG_Y,
        }
    }

    pub fn view(self, position: Vec3) -> Mat4 {
        Mat4::look_at_rh(position, position + self.forward(), self.up())
    }

    /// 90 degree projection with Y flipped so rendered rows land where cube
    /// sampling expects them. The flip reverses triangle winding, see
    /// [`CubeFace::front_face`].
    pub fn projection(near: f32, far: f32) -> Mat4 {
        Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
            * Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, near, far)
    }

    /// Front face winding for pipelines drawing into a capture face.
    pub fn front_face() -> wgpu::FrontFace {
        wgpu::FrontFace::Cw
    }

    /// Direction sampled at `uv` on this face, following the cube sampling
    /// convention (`v` grows downward). Not normalized.
    pub fn direction_at(self, u: f32, v: f32) -> Vec3 {
        let sc = 2.0 * u - 1.0;
        let tc = 2.0 * v - 1.0;
        match self {
            CubeFace::PositiveX => Vec3::new(1.0, -tc, -sc),
            CubeFace::NegativeX => Vec3::new(-1.0, -tc, sc),
            CubeFace::PositiveY => Vec3::new(sc, 1.0, tc),
            CubeFace::NegativeY => Vec3::new(sc, -1.0, -tc),
            CubeFace::PositiveZ => Vec3::new(sc, -tc, 1.0),
            CubeFace::NegativeZ => Vec3::new(-sc, -tc, -1.0),
        }
    }
}
