use crate::camera::{Camera3D, Viewport};
use crate::scene_graph::{LayerMask, SceneGraph};
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use glam::{Vec2, Vec3};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

const MAX_MEDIA_DIMENSION: u32 = 4096;

#[derive(Debug, Clone, PartialEq)]
pub struct MediaRequest {
    pub position: Vec3,
    pub target: Vec3,
    pub width: u32,
    pub height: u32,
    pub layers: LayerMask,
    pub background: [u8; 3],
}

/// Off-screen renderer producing an image of the scene from an arbitrary pose.
pub trait MediaGenerator {
    /// Returns the rendered image as a data URI.
    fn generate(&mut self, graph: &SceneGraph, request: &MediaRequest) -> Result<String>;
}

/// Flat-shaded bounding-box preview. Each visible node with geometry is drawn as the
/// screen rectangle around its projected world bounds, far nodes first.
#[derive(Debug, Clone)]
pub struct PreviewRenderer {
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for PreviewRenderer {
    fn default() -> Self {
        Self { fov_y_radians: 50.0_f32.to_radians(), near: 0.1, far: 1000.0 }
    }
}

struct ScreenRect {
    min: Vec2,
    max: Vec2,
    depth: f32,
    color: Rgba<u8>,
}

impl PreviewRenderer {
    pub fn render(&self, graph: &SceneGraph, request: &MediaRequest) -> Result<RgbaImage> {
        if request.width == 0 || request.height == 0 {
            bail!("media size {}x{} is empty", request.width, request.height);
        }
        if request.width > MAX_MEDIA_DIMENSION || request.height > MAX_MEDIA_DIMENSION {
            bail!("media size {}x{} exceeds {MAX_MEDIA_DIMENSION}px", request.width, request.height);
        }
        let viewport = Viewport::new(request.width, request.height);
        let camera = Camera3D::new(request.position, request.target, self.fov_y_radians, self.near, self.far);
        let [r, g, b] = request.background;
        let mut image = RgbaImage::from_pixel(request.width, request.height, Rgba([r, g, b, 255]));

        let mut rects: Vec<ScreenRect> = graph
            .renderables(request.layers)
            .into_iter()
            .filter_map(|(_, bounds, shade)| {
                let projected: Vec<(Vec2, f32)> =
                    bounds.corners().iter().filter_map(|corner| camera.project_point(*corner, viewport)).collect();
                if projected.is_empty() {
                    return None;
                }
                let (min, max, depth) = projected.iter().fold(
                    (Vec2::splat(f32::INFINITY), Vec2::splat(f32::NEG_INFINITY), f32::INFINITY),
                    |(min, max, depth), (point, d)| (min.min(*point), max.max(*point), depth.min(*d)),
                );
                let rgb = (shade.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();
                Some(ScreenRect { min, max, depth, color: Rgba([rgb.x as u8, rgb.y as u8, rgb.z as u8, 255]) })
            })
            .collect();
        rects.sort_by(|a, b| b.depth.total_cmp(&a.depth));

        let limit = Vec2::new(request.width as f32, request.height as f32);
        for rect in rects {
            let min = rect.min.clamp(Vec2::ZERO, limit);
            let max = rect.max.clamp(Vec2::ZERO, limit);
            for y in min.y.floor() as u32..max.y.ceil() as u32 {
                for x in min.x.floor() as u32..max.x.ceil() as u32 {
                    image.put_pixel(x, y, rect.color);
                }
            }
        }
        Ok(image)
    }
}

impl MediaGenerator for PreviewRenderer {
    fn generate(&mut self, graph: &SceneGraph, request: &MediaRequest) -> Result<String> {
        let image = self.render(graph, request)?;
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("encoding preview png")?;
        tracing::debug!(
            target: "media",
            width = request.width,
            height = request.height,
            bytes = bytes.len(),
            "preview rendered"
        );
        Ok(to_data_uri("image/png", &bytes))
    }
}

pub fn to_data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}
