//! Demo scene: a spinning textured cube in front of a gradient sky, and a
//! frame statistics readout.

use std::f32::consts::FRAC_PI_4;

use glam::{Mat4, Vec2, Vec3, Vec4};

use ember_renderer::strategies::{MeshStrategy, MeshUniforms, SkyboxStrategy, SkyboxUniforms};
use ember_renderer::{
    Application, GraphicsPipelineSlot, MeshId, PipelineHandle, PipelineRegistry, RendererResult,
    TextBatch, TextItem,
};
use ember_resources::{MeshData, ResourceResult};
use ember_rhi::vertex::MeshVertex;

/// Seconds between statistics text refreshes.
const STATS_INTERVAL: f32 = 0.5;
const SPIN_RATE: f32 = 0.8;

/// Outward normal, then two edge directions with `u x v = normal`.
const FACES: [(Vec3, Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Z, Vec3::Y),
    (Vec3::NEG_X, Vec3::Z, Vec3::Y),
    (Vec3::Y, Vec3::X, Vec3::NEG_Z),
    (Vec3::NEG_Y, Vec3::X, Vec3::Z),
    (Vec3::Z, Vec3::X, Vec3::Y),
    (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
];

/// Unit cube centered on the origin, counter-clockwise from outside.
pub fn cube() -> ResourceResult<MeshData<MeshVertex>> {
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in FACES {
        let base = vertices.len() as u32;
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
        for (su, sv) in corners {
            let position = (normal + u * su + v * sv) * 0.5;
            let uv = Vec2::new((su + 1.0) * 0.5, (1.0 - sv) * 0.5);
            vertices.push(MeshVertex::new(position, normal, uv));
        }
        indices.extend([0, 1, 2, 2, 3, 0].map(|i| base + i));
    }
    MeshData::new("cube", vertices, indices)
}

const ZENITH: Vec3 = Vec3::new(0.18, 0.36, 0.78);
const HORIZON: Vec3 = Vec3::new(0.78, 0.84, 0.92);
const GROUND: Vec3 = Vec3::new(0.16, 0.14, 0.13);

/// Direction through texel `(u, v)` in -1..1 of cubemap `face`, using the
/// Vulkan face orientation.
fn face_direction(face: usize, u: f32, v: f32) -> Vec3 {
    match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        _ => Vec3::new(-u, -v, -1.0),
    }
}

fn sky_color(direction: Vec3) -> Vec3 {
    let y = direction.normalize().y;
    if y >= 0.0 {
        HORIZON.lerp(ZENITH, y.sqrt())
    } else {
        HORIZON.lerp(GROUND, (-y * 4.0).min(1.0))
    }
}

/// RGBA8 faces of a vertical sky gradient, `size` texels square.
pub fn sky_faces(size: u32) -> [Vec<u8>; 6] {
    std::array::from_fn(|face| {
        let mut pixels = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let u = (x as f32 + 0.5) / size as f32 * 2.0 - 1.0;
                let v = (y as f32 + 0.5) / size as f32 * 2.0 - 1.0;
                let color = sky_color(face_direction(face, u, v)) * 255.0;
                pixels.extend([color.x as u8, color.y as u8, color.z as u8, 255]);
            }
        }
        pixels
    })
}

/// Vulkan clip space: y down, depth 0..1.
fn projection(aspect: f32) -> Mat4 {
    let mut proj = Mat4::perspective_rh(FRAC_PI_4, aspect, 0.1, 100.0);
    proj.y_axis.y *= -1.0;
    proj
}

fn camera_view() -> Mat4 {
    Mat4::look_at_rh(Vec3::new(0.0, 1.2, 3.0), Vec3::ZERO, Vec3::Y)
}

/// Pipelines and meshes the scene drives each frame.
pub struct SceneHandles {
    pub meshes: PipelineHandle<GraphicsPipelineSlot<MeshStrategy>>,
    pub cube: MeshId,
    pub sky: PipelineHandle<GraphicsPipelineSlot<SkyboxStrategy>>,
    pub sky_box: MeshId,
    pub hud: PipelineHandle<TextBatch>,
}

pub struct DemoScene {
    handles: SceneHandles,
    angle: f32,
    aspect: f32,
    stats_elapsed: f32,
    stats_frames: u32,
}

impl DemoScene {
    pub fn new(handles: SceneHandles, width: u32, height: u32) -> Self {
        let mut scene = Self {
            handles,
            angle: 0.0,
            aspect: 1.0,
            stats_elapsed: 0.0,
            stats_frames: 0,
        };
        scene.resize(width, height);
        scene
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    fn uniforms(&self) -> MeshUniforms {
        MeshUniforms {
            model: Mat4::from_rotation_y(self.angle) * Mat4::from_rotation_x(self.angle * 0.5),
            view_proj: projection(self.aspect) * camera_view(),
            light_dir: Vec3::new(0.4, 1.0, 0.6).normalize().extend(0.0),
            tint: Vec4::new(1.0, 0.55, 0.2, 1.0),
        }
    }
}

impl Application for DemoScene {
    fn run(&mut self, pipelines: &mut PipelineRegistry, dt: f32, _frame_index: usize) -> RendererResult<()> {
        self.angle = (self.angle + dt * SPIN_RATE) % std::f32::consts::TAU;
        let handles = &self.handles;
        pipelines.update_uniform(handles.meshes, handles.cube, &self.uniforms())?;
        let sky = SkyboxUniforms::from_view_proj(camera_view(), projection(self.aspect));
        pipelines.update_uniform(handles.sky, handles.sky_box, &sky)?;

        self.stats_elapsed += dt;
        self.stats_frames += 1;
        if self.stats_elapsed >= STATS_INTERVAL {
            let fps = self.stats_frames as f32 / self.stats_elapsed;
            let line = format!("{:.0} FPS  {:.2} MS", fps, 1000.0 / fps);
            pipelines.get_mut(self.handles.hud)?.set_text(vec![
                TextItem::new(line, Vec2::new(16.0, 40.0))
                    .scale(4.0)
                    .color(Vec4::new(1.0, 1.0, 0.3, 1.0)),
            ])?;
            self.stats_elapsed = 0.0;
            self.stats_frames = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_is_a_valid_mesh() {
        let cube = cube().unwrap();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
    }

    #[test]
    fn test_cube_faces_wind_outward() {
        let cube = cube().unwrap();
        for triangle in cube.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| cube.vertices[triangle[i] as usize]);
            let winding = (b.position - a.position).cross(c.position - a.position);
            assert!(winding.dot(a.normal) > 0.0);
        }
    }

    #[test]
    fn test_sky_faces_are_full_rgba() {
        let faces = sky_faces(8);
        for face in &faces {
            assert_eq!(face.len(), 8 * 8 * 4);
            assert!(face.chunks(4).all(|texel| texel[3] == 255));
        }
    }

    #[test]
    fn test_sky_is_blue_overhead_and_dark_below() {
        let faces = sky_faces(4);
        let center = |face: usize| {
            let i = (2 * 4 + 2) * 4;
            [faces[face][i], faces[face][i + 1], faces[face][i + 2]]
        };
        let [r, _, b] = center(2);
        assert!(b > r);
        assert!(center(3)[2] < center(2)[2]);
    }

    #[test]
    fn test_face_directions_point_outward() {
        let axes = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
        for (face, axis) in axes.into_iter().enumerate() {
            assert_eq!(face_direction(face, 0.0, 0.0), axis);
        }
    }

    #[test]
    fn test_projection_flips_y() {
        let proj = projection(1.0);
        let up = proj.project_point3(Vec3::new(0.0, 1.0, -5.0));
        assert!(up.y < 0.0);
    }
}
