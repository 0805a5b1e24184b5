//! CPU renderer for recorded scenes.
//!
//! Walks the command sequence once, maintaining a stack of transform/clip
//! states and a stack of offscreen layer pixmaps. `Save`/`SaveLayer` push,
//! `Restore` pops; a popped layer has its paint's image filter and color
//! filter applied, then is composited onto the parent target with the
//! paint's alpha and blend mode. Rasterization is tiny-skia; blurs and
//! clip-mask combination are integer pixel loops over premultiplied RGBA8.
//!
//! Malformed nesting is tolerated the same way the optimizer tolerates it:
//! an unmatched `Restore` is skipped with a warning, and scopes still open
//! at the end of the sequence are drained (open layers composite as if a
//! `Restore` had followed).

use tiny_skia::{
    BlendMode as SkBlendMode, Color as SkColor, FillRule, GradientStop as SkGradientStop,
    LinearGradient, Mask, MaskType, Paint as SkPaint, PathBuilder, Pixmap, PixmapPaint,
    Point as SkPoint, RadialGradient, SpreadMode, Transform,
};

use crate::{
    blur::blur_premul_in_place,
    core::{Affine, BezPath, Canvas, Rect, Rgba8},
    error::{LayerfoldError, LayerfoldResult},
    model::{BlendMode, ColorFilter, Command, ImageFilter, MaskFilter, Paint, Scene, Shader},
};

#[derive(Clone, Debug)]
/// Rendered pixels: tightly packed premultiplied RGBA8, row-major.
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub premultiplied: bool,
}

/// Renders a scene to a full-canvas frame. The caller is expected to have
/// validated the scene; geometry errors found while walking (degenerate
/// rectangles, unparseable path data) surface as `Render` errors.
#[tracing::instrument(skip(scene))]
pub fn render_scene(scene: &Scene) -> LayerfoldResult<Frame> {
    let mut renderer = Renderer::new(&scene.canvas)?;
    for (index, cmd) in scene.commands.iter().enumerate() {
        renderer.exec(index, cmd)?;
    }
    renderer.finish()
}

#[derive(Clone)]
struct RenderState {
    transform: Transform,
    /// Accumulated clip coverage in the alpha channel, plus the mask built
    /// from it. Both change together; `None` means unclipped.
    clip_pixmap: Option<Pixmap>,
    clip_mask: Option<Mask>,
}

struct LayerScope {
    pixmap: Pixmap,
    paint: Option<Paint>,
}

struct StackEntry {
    prev: RenderState,
    opened_layer: bool,
}

struct Renderer {
    width: u32,
    height: u32,
    base: Pixmap,
    layers: Vec<LayerScope>,
    stack: Vec<StackEntry>,
    state: RenderState,
}

impl Renderer {
    fn new(canvas: &Canvas) -> LayerfoldResult<Self> {
        let base = Pixmap::new(canvas.width, canvas.height)
            .ok_or_else(|| LayerfoldError::render("canvas width/height must be > 0"))?;
        Ok(Self {
            width: canvas.width,
            height: canvas.height,
            base,
            layers: Vec::new(),
            stack: Vec::new(),
            state: RenderState {
                transform: Transform::identity(),
                clip_pixmap: None,
                clip_mask: None,
            },
        })
    }

    fn exec(&mut self, index: usize, cmd: &Command) -> LayerfoldResult<()> {
        match cmd {
            Command::Save => {
                self.stack.push(StackEntry {
                    prev: self.state.clone(),
                    opened_layer: false,
                });
            }
            Command::SaveLayer { bounds, paint } => {
                self.stack.push(StackEntry {
                    prev: self.state.clone(),
                    opened_layer: true,
                });
                let pixmap = Pixmap::new(self.width, self.height)
                    .ok_or_else(|| LayerfoldError::render("layer allocation failed"))?;
                self.layers.push(LayerScope {
                    pixmap,
                    paint: paint.clone(),
                });
                if let Some(bounds) = bounds {
                    self.intersect_clip_rect(*bounds)?;
                }
            }
            Command::Restore => match self.stack.pop() {
                Some(entry) => {
                    if entry.opened_layer {
                        self.pop_layer_scope()?;
                    }
                    self.state = entry.prev;
                }
                None => {
                    tracing::warn!(index, "restore without a matching save; skipping");
                }
            },
            Command::Concat { matrix } => {
                self.state.transform = self.state.transform.pre_concat(affine_to_sk(*matrix));
            }
            Command::ClipRect { rect } => self.intersect_clip_rect(*rect)?,
            Command::DrawRect { rect, paint } => {
                let path = rect_path(*rect)?;
                self.draw_path(&path, paint)?;
            }
            Command::DrawOval { rect, paint } => {
                let r = sk_rect(*rect)?;
                let path = PathBuilder::from_oval(r)
                    .ok_or_else(|| LayerfoldError::render("degenerate oval rectangle"))?;
                self.draw_path(&path, paint)?;
            }
            Command::DrawPath { d, paint } => {
                let bez = BezPath::from_svg(d)
                    .map_err(|e| LayerfoldError::render(format!("invalid path data: {e}")))?;
                let path = bezpath_to_sk(&bez)?;
                self.draw_path(&path, paint)?;
            }
        }
        Ok(())
    }

    fn finish(mut self) -> LayerfoldResult<Frame> {
        while let Some(entry) = self.stack.pop() {
            if entry.opened_layer {
                self.pop_layer_scope()?;
            }
            self.state = entry.prev;
        }
        Ok(Frame {
            width: self.width,
            height: self.height,
            data: self.base.take(),
            premultiplied: true,
        })
    }

    /// Composites the innermost layer onto its parent. Contents were already
    /// drawn through the clip, so the composite itself is a 1:1 device-space
    /// blit. Layer paints honor alpha, blend mode, color and image filters;
    /// a shader or mask filter on a layer paint has no effect here.
    fn pop_layer_scope(&mut self) -> LayerfoldResult<()> {
        let mut layer = self
            .layers
            .pop()
            .ok_or_else(|| LayerfoldError::render("layer stack underflow"))?;

        let mut pixmap_paint = PixmapPaint::default();
        if let Some(paint) = &layer.paint {
            if let Some(ImageFilter::Blur { sigma }) = &paint.image_filter {
                blur_premul_in_place(layer.pixmap.data_mut(), self.width, self.height, *sigma)?;
            }
            if let Some(filter) = &paint.color_filter {
                apply_color_filter(layer.pixmap.data_mut(), filter);
            }
            pixmap_paint.opacity = paint.alpha();
            pixmap_paint.blend_mode = blend_to_sk(paint.blend);
        }

        let target = match self.layers.last_mut() {
            Some(parent) => &mut parent.pixmap,
            None => &mut self.base,
        };
        target.draw_pixmap(
            0,
            0,
            layer.pixmap.as_ref(),
            &pixmap_paint,
            Transform::identity(),
            None,
        );
        Ok(())
    }

    fn draw_path(&mut self, path: &tiny_skia::Path, paint: &Paint) -> LayerfoldResult<()> {
        let mut sk_paint = build_paint(paint)?;
        let transform = self.state.transform;

        if paint.mask_filter.is_some() || paint.image_filter.is_some() {
            // Filtered draws rasterize into a scratch buffer first; the blend
            // mode applies when the filtered result meets the destination.
            let mut scratch = Pixmap::new(self.width, self.height)
                .ok_or_else(|| LayerfoldError::render("scratch allocation failed"))?;
            sk_paint.blend_mode = SkBlendMode::SourceOver;
            scratch.fill_path(
                path,
                &sk_paint,
                FillRule::Winding,
                transform,
                self.state.clip_mask.as_ref(),
            );

            if let Some(MaskFilter::Blur { sigma }) = &paint.mask_filter {
                blur_premul_in_place(scratch.data_mut(), self.width, self.height, *sigma)?;
            }
            if let Some(ImageFilter::Blur { sigma }) = &paint.image_filter {
                blur_premul_in_place(scratch.data_mut(), self.width, self.height, *sigma)?;
            }

            let mut pixmap_paint = PixmapPaint::default();
            pixmap_paint.blend_mode = blend_to_sk(paint.blend);
            let target = match self.layers.last_mut() {
                Some(layer) => &mut layer.pixmap,
                None => &mut self.base,
            };
            target.draw_pixmap(
                0,
                0,
                scratch.as_ref(),
                &pixmap_paint,
                Transform::identity(),
                None,
            );
        } else {
            sk_paint.blend_mode = blend_to_sk(paint.blend);
            let clip = self.state.clip_mask.clone();
            let target = match self.layers.last_mut() {
                Some(layer) => &mut layer.pixmap,
                None => &mut self.base,
            };
            target.fill_path(path, &sk_paint, FillRule::Winding, transform, clip.as_ref());
        }
        Ok(())
    }

    fn intersect_clip_rect(&mut self, rect: Rect) -> LayerfoldResult<()> {
        let mut coverage = Pixmap::new(self.width, self.height)
            .ok_or_else(|| LayerfoldError::render("clip allocation failed"))?;
        let path = rect_path(rect)?;
        let mut paint = SkPaint::default();
        paint.anti_alias = true;
        paint.set_color_rgba8(255, 255, 255, 255);
        coverage.fill_path(
            &path,
            &paint,
            FillRule::Winding,
            self.state.transform,
            None,
        );

        if let Some(old) = &self.state.clip_pixmap {
            intersect_coverage(coverage.data_mut(), old.data());
        }

        self.state.clip_mask = Some(Mask::from_pixmap(coverage.as_ref(), MaskType::Alpha));
        self.state.clip_pixmap = Some(coverage);
        Ok(())
    }
}

/// Per-pixel intersection of two coverage buffers (alpha channel only; the
/// mask ignores color).
fn intersect_coverage(dst: &mut [u8], old: &[u8]) {
    for (d, o) in dst.chunks_exact_mut(4).zip(old.chunks_exact(4)) {
        d[3] = mul_div255(d[3], o[3]);
    }
}

fn mul_div255(x: u8, y: u8) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

fn apply_color_filter(data: &mut [u8], filter: &ColorFilter) {
    for px in data.chunks_exact_mut(4) {
        let straight = Rgba8::from_premul([px[0], px[1], px[2], px[3]]);
        let premul = filter.apply(straight).to_premul();
        px.copy_from_slice(&premul);
    }
}

fn build_paint(paint: &Paint) -> LayerfoldResult<SkPaint<'static>> {
    let mut sk_paint = SkPaint::default();
    sk_paint.anti_alias = true;

    match &paint.shader {
        None => {
            let c = filtered_color(paint, paint.color);
            sk_paint.set_color_rgba8(c.r, c.g, c.b, c.a);
        }
        Some(Shader::LinearGradient { start, end, stops }) => {
            sk_paint.shader = LinearGradient::new(
                sk_point(start.x, start.y),
                sk_point(end.x, end.y),
                sk_stops(paint, stops),
                SpreadMode::Pad,
                Transform::identity(),
            )
            .ok_or_else(|| LayerfoldError::render("degenerate linear gradient"))?;
        }
        Some(Shader::RadialGradient {
            center,
            radius,
            stops,
        }) => {
            sk_paint.shader = RadialGradient::new(
                sk_point(center.x, center.y),
                sk_point(center.x, center.y),
                *radius as f32,
                sk_stops(paint, stops),
                SpreadMode::Pad,
                Transform::identity(),
            )
            .ok_or_else(|| LayerfoldError::render("degenerate radial gradient"))?;
        }
    }

    Ok(sk_paint)
}

fn filtered_color(paint: &Paint, color: Rgba8) -> Rgba8 {
    match &paint.color_filter {
        Some(filter) => filter.apply(color),
        None => color,
    }
}

/// Gradient stops with the paint's color filter and alpha folded in: the
/// paint alpha scales every stop, matching how a flat color carries it.
fn sk_stops(paint: &Paint, stops: &[crate::model::GradientStop]) -> Vec<SkGradientStop> {
    stops
        .iter()
        .map(|stop| {
            let c = filtered_color(paint, stop.color);
            let a = mul_div255(c.a, paint.color.a);
            SkGradientStop::new(stop.offset, SkColor::from_rgba8(c.r, c.g, c.b, a))
        })
        .collect()
}

fn blend_to_sk(blend: BlendMode) -> SkBlendMode {
    match blend {
        BlendMode::Clear => SkBlendMode::Clear,
        BlendMode::Src => SkBlendMode::Source,
        BlendMode::Dst => SkBlendMode::Destination,
        BlendMode::SrcOver => SkBlendMode::SourceOver,
        BlendMode::DstOver => SkBlendMode::DestinationOver,
        BlendMode::SrcIn => SkBlendMode::SourceIn,
        BlendMode::DstIn => SkBlendMode::DestinationIn,
        BlendMode::SrcOut => SkBlendMode::SourceOut,
        BlendMode::DstOut => SkBlendMode::DestinationOut,
        BlendMode::SrcAtop => SkBlendMode::SourceAtop,
        BlendMode::DstAtop => SkBlendMode::DestinationAtop,
        BlendMode::Xor => SkBlendMode::Xor,
        BlendMode::Plus => SkBlendMode::Plus,
        BlendMode::Modulate => SkBlendMode::Modulate,
        BlendMode::Multiply => SkBlendMode::Multiply,
        BlendMode::Screen => SkBlendMode::Screen,
        BlendMode::Overlay => SkBlendMode::Overlay,
        BlendMode::Darken => SkBlendMode::Darken,
        BlendMode::Lighten => SkBlendMode::Lighten,
        BlendMode::ColorDodge => SkBlendMode::ColorDodge,
        BlendMode::ColorBurn => SkBlendMode::ColorBurn,
        BlendMode::HardLight => SkBlendMode::HardLight,
        BlendMode::SoftLight => SkBlendMode::SoftLight,
        BlendMode::Difference => SkBlendMode::Difference,
        BlendMode::Exclusion => SkBlendMode::Exclusion,
    }
}

fn affine_to_sk(a: Affine) -> Transform {
    let c = a.as_coeffs();
    Transform::from_row(
        c[0] as f32,
        c[1] as f32,
        c[2] as f32,
        c[3] as f32,
        c[4] as f32,
        c[5] as f32,
    )
}

fn sk_point(x: f64, y: f64) -> SkPoint {
    SkPoint::from_xy(x as f32, y as f32)
}

fn sk_rect(rect: Rect) -> LayerfoldResult<tiny_skia::Rect> {
    tiny_skia::Rect::from_ltrb(
        rect.x0 as f32,
        rect.y0 as f32,
        rect.x1 as f32,
        rect.y1 as f32,
    )
    .ok_or_else(|| LayerfoldError::render("empty or non-finite rectangle"))
}

fn rect_path(rect: Rect) -> LayerfoldResult<tiny_skia::Path> {
    Ok(PathBuilder::from_rect(sk_rect(rect)?))
}

fn bezpath_to_sk(path: &BezPath) -> LayerfoldResult<tiny_skia::Path> {
    use kurbo::PathEl;

    let mut pb = PathBuilder::new();
    for el in path.elements() {
        match *el {
            PathEl::MoveTo(p) => pb.move_to(p.x as f32, p.y as f32),
            PathEl::LineTo(p) => pb.line_to(p.x as f32, p.y as f32),
            PathEl::QuadTo(p1, p2) => {
                pb.quad_to(p1.x as f32, p1.y as f32, p2.x as f32, p2.y as f32)
            }
            PathEl::CurveTo(p1, p2, p3) => pb.cubic_to(
                p1.x as f32,
                p1.y as f32,
                p2.x as f32,
                p2.y as f32,
                p3.x as f32,
                p3.y as f32,
            ),
            PathEl::ClosePath => pb.close(),
        }
    }
    pb.finish()
        .ok_or_else(|| LayerfoldError::render("empty path"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collapse::collapse_layers;
    use crate::core::{Canvas, Point, Rgba8};
    use crate::model::GradientStop;

    fn scene(commands: Vec<Command>) -> Scene {
        Scene {
            canvas: Canvas {
                width: 16,
                height: 16,
            },
            commands,
        }
    }

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * frame.width + x) * 4) as usize;
        [
            frame.data[idx],
            frame.data[idx + 1],
            frame.data[idx + 2],
            frame.data[idx + 3],
        ]
    }

    fn full_rect() -> Rect {
        Rect::new(0.0, 0.0, 16.0, 16.0)
    }

    #[test]
    fn opaque_rect_fills_pixels() {
        let frame = render_scene(&scene(vec![Command::DrawRect {
            rect: full_rect(),
            paint: Paint::solid(Rgba8::rgb(255, 0, 0)),
        }]))
        .unwrap();

        assert_eq!(pixel(&frame, 8, 8), [255, 0, 0, 255]);
    }

    #[test]
    fn clip_rect_restricts_drawing() {
        let frame = render_scene(&scene(vec![
            Command::Save,
            Command::ClipRect {
                rect: Rect::new(0.0, 0.0, 8.0, 16.0),
            },
            Command::DrawRect {
                rect: full_rect(),
                paint: Paint::solid(Rgba8::rgb(0, 255, 0)),
            },
            Command::Restore,
        ]))
        .unwrap();

        assert_eq!(pixel(&frame, 2, 8)[1], 255);
        assert_eq!(pixel(&frame, 14, 8), [0, 0, 0, 0]);
    }

    #[test]
    fn restore_unwinds_transform_state() {
        let frame = render_scene(&scene(vec![
            Command::Save,
            Command::Concat {
                matrix: Affine::translate((8.0, 0.0)),
            },
            Command::Restore,
            Command::DrawRect {
                rect: Rect::new(0.0, 0.0, 4.0, 4.0),
                paint: Paint::solid(Rgba8::rgb(0, 0, 255)),
            },
        ]))
        .unwrap();

        // Translation was popped before the draw.
        assert_eq!(pixel(&frame, 2, 2), [0, 0, 255, 255]);
        assert_eq!(pixel(&frame, 10, 2), [0, 0, 0, 0]);
    }

    #[test]
    fn translucent_layer_scales_content_alpha() {
        let frame = render_scene(&scene(vec![
            Command::SaveLayer {
                bounds: None,
                paint: Some(Paint::solid(Rgba8::new(0, 0, 0, 128))),
            },
            Command::DrawRect {
                rect: full_rect(),
                paint: Paint::solid(Rgba8::rgb(255, 255, 255)),
            },
            Command::Restore,
        ]))
        .unwrap();

        let px = pixel(&frame, 8, 8);
        assert!(px[3].abs_diff(128) <= 1, "alpha was {}", px[3]);
    }

    #[test]
    fn layer_bounds_clip_layer_content() {
        let frame = render_scene(&scene(vec![
            Command::SaveLayer {
                bounds: Some(Rect::new(0.0, 0.0, 8.0, 16.0)),
                paint: None,
            },
            Command::DrawRect {
                rect: full_rect(),
                paint: Paint::solid(Rgba8::rgb(255, 0, 255)),
            },
            Command::Restore,
        ]))
        .unwrap();

        assert_eq!(pixel(&frame, 2, 8)[3], 255);
        assert_eq!(pixel(&frame, 14, 8), [0, 0, 0, 0]);
    }

    #[test]
    fn unmatched_restore_is_skipped() {
        let frame = render_scene(&scene(vec![
            Command::Restore,
            Command::DrawRect {
                rect: full_rect(),
                paint: Paint::solid(Rgba8::rgb(10, 20, 30)),
            },
        ]))
        .unwrap();

        assert_eq!(pixel(&frame, 1, 1), [10, 20, 30, 255]);
    }

    #[test]
    fn unclosed_layer_is_drained_at_end() {
        let frame = render_scene(&scene(vec![
            Command::SaveLayer {
                bounds: None,
                paint: None,
            },
            Command::DrawRect {
                rect: full_rect(),
                paint: Paint::solid(Rgba8::rgb(40, 50, 60)),
            },
        ]))
        .unwrap();

        assert_eq!(pixel(&frame, 8, 8), [40, 50, 60, 255]);
    }

    #[test]
    fn linear_gradient_interpolates_endpoints() {
        let frame = render_scene(&scene(vec![Command::DrawRect {
            rect: full_rect(),
            paint: Paint {
                shader: Some(Shader::LinearGradient {
                    start: Point::new(0.0, 0.0),
                    end: Point::new(16.0, 0.0),
                    stops: vec![
                        GradientStop {
                            offset: 0.0,
                            color: Rgba8::rgb(255, 0, 0),
                        },
                        GradientStop {
                            offset: 1.0,
                            color: Rgba8::rgb(0, 0, 255),
                        },
                    ],
                }),
                ..Paint::default()
            },
        }]))
        .unwrap();

        let left = pixel(&frame, 0, 8);
        let right = pixel(&frame, 15, 8);
        assert!(left[0] > 200 && left[2] < 60);
        assert!(right[2] > 200 && right[0] < 60);
    }

    #[test]
    fn collapse_preserves_rendering_of_plain_layers() {
        let commands = vec![
            Command::DrawRect {
                rect: full_rect(),
                paint: Paint::solid(Rgba8::rgb(30, 30, 30)),
            },
            Command::SaveLayer {
                bounds: None,
                paint: None,
            },
            Command::Concat {
                matrix: Affine::translate((2.0, 2.0)),
            },
            Command::DrawRect {
                rect: Rect::new(0.0, 0.0, 8.0, 8.0),
                paint: Paint::solid(Rgba8::rgb(200, 120, 10)),
            },
            Command::Restore,
        ];

        let before = render_scene(&scene(commands.clone())).unwrap();

        let mut optimized = commands;
        let log = collapse_layers(&mut optimized);
        assert_eq!(log.len(), 1);

        let after = render_scene(&scene(optimized)).unwrap();
        assert_eq!(before.data, after.data);
    }

    #[test]
    fn collapse_preserves_rendering_with_translucent_inner_draws() {
        let commands = vec![
            Command::DrawRect {
                rect: full_rect(),
                paint: Paint::solid(Rgba8::rgb(0, 80, 160)),
            },
            Command::SaveLayer {
                bounds: None,
                paint: None,
            },
            Command::DrawRect {
                rect: Rect::new(4.0, 4.0, 12.0, 12.0),
                paint: Paint::solid(Rgba8::new(255, 255, 255, 100)),
            },
            Command::Restore,
        ];

        let before = render_scene(&scene(commands.clone())).unwrap();

        let mut optimized = commands;
        assert_eq!(collapse_layers(&mut optimized).len(), 1);
        let after = render_scene(&scene(optimized)).unwrap();

        // Source-over is associative; only u8 rounding may differ.
        for (b, a) in before.data.iter().zip(&after.data) {
            assert!(b.abs_diff(*a) <= 2, "pixels diverged: {b} vs {a}");
        }
    }

    #[test]
    fn multiply_draw_inside_layer_pins_it() {
        // A multiply draw inside a layer over an empty backdrop: the layer
        // isolates it (multiply against transparent black), so collapsing
        // would change pixels. The optimizer must leave it alone.
        let commands = vec![
            Command::DrawRect {
                rect: full_rect(),
                paint: Paint::solid(Rgba8::rgb(200, 200, 200)),
            },
            Command::SaveLayer {
                bounds: None,
                paint: None,
            },
            Command::DrawRect {
                rect: Rect::new(0.0, 0.0, 8.0, 8.0),
                paint: Paint {
                    blend: BlendMode::Multiply,
                    ..Paint::solid(Rgba8::rgb(100, 100, 100))
                },
            },
            Command::Restore,
        ];

        let mut optimized = commands.clone();
        let log = collapse_layers(&mut optimized);
        assert!(log.is_empty());
        assert_eq!(optimized, commands);
    }

    #[test]
    fn zero_canvas_errors() {
        let bad = Scene {
            canvas: Canvas {
                width: 0,
                height: 16,
            },
            commands: vec![],
        };
        assert!(render_scene(&bad).is_err());
    }
}
