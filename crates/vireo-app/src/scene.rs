// SPDX-License-Identifier: CEPL-1.0
//! Built-in scene: a textured unit cube and an orbiting camera.

use glam::{Mat4, Vec3};
use vireo_render::{RenderSize, Vertex};

/// (outward normal, u axis, v axis) with `u x v == normal`, so corners
/// walked as below are counter-clockwise seen from outside.
const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
    ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
    ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
    ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
    ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
    ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
];

const FACE_COLORS: [[f32; 3]; 6] = [
    [1.0, 0.55, 0.55],
    [0.55, 1.0, 0.55],
    [0.55, 0.55, 1.0],
    [1.0, 1.0, 0.55],
    [0.55, 1.0, 1.0],
    [1.0, 0.55, 1.0],
];

/// 24 vertices (four per face, so each face gets its own uv square) and
/// 36 indices.
pub fn cube() -> (Vec<Vertex>, Vec<u16>) {
    let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
    let uvs = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (face, &(n, u, v)) in FACES.iter().enumerate() {
        let (n, u, v) = (Vec3::from(n), Vec3::from(u), Vec3::from(v));
        let base = vertices.len() as u16;
        for (&(su, sv), &uv) in corners.iter().zip(&uvs) {
            let pos = (n + u * su + v * sv) * 0.5;
            vertices.push(Vertex {
                pos: pos.to_array(),
                color: FACE_COLORS[face],
                uv,
            });
        }
        indices.extend([0, 1, 2, 2, 3, 0].map(|i| base + i));
    }
    (vertices, indices)
}

/// Two-tone RGBA8 checkerboard, `size` x `size` texels in `cells` squares
/// per side.
pub fn checkerboard(size: u32, cells: u32) -> Vec<u8> {
    let cell = (size / cells.max(1)).max(1);
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            let c = if light { 235 } else { 70 };
            pixels.extend_from_slice(&[c, c, c, 255]);
        }
    }
    pixels
}

#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub spin_degrees_per_second: f32,
}

impl Camera {
    const EYE: Vec3 = Vec3::new(0.0, 1.2, 2.6);
    const FOV_Y_DEGREES: f32 = 45.0;
    const NEAR: f32 = 0.1;
    const FAR: f32 = 10.0;

    pub fn model(&self, elapsed_secs: f32) -> Mat4 {
        Mat4::from_rotation_y((self.spin_degrees_per_second * elapsed_secs).to_radians())
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(Self::EYE, Vec3::ZERO, Vec3::Y)
    }

    /// Right-handed, depth 0..1, Y flipped for Vulkan clip space. The
    /// aspect follows the swapchain extent.
    pub fn projection(&self, extent: RenderSize) -> Mat4 {
        let aspect = if extent.is_empty() {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };
        let mut proj = Mat4::perspective_rh(
            Self::FOV_Y_DEGREES.to_radians(),
            aspect,
            Self::NEAR,
            Self::FAR,
        );
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn mvp(&self, elapsed_secs: f32, extent: RenderSize) -> [[f32; 4]; 4] {
        (self.projection(extent) * self.view() * self.model(elapsed_secs)).to_cols_array_2d()
    }
}
