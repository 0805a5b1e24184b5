use std::fmt;

use crate::{
    core::{Affine, BezPath, Canvas, Point, Rect, Rgba8},
    error::{LayerfoldError, LayerfoldResult},
};

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
/// A recorded drawing command sequence plus the canvas it targets.
///
/// A scene is a pure data model that can be:
/// - built programmatically
/// - serialized/deserialized via Serde (JSON)
///
/// Scenes are consumed by the optimizer passes ([`crate::collapse_layers`],
/// [`crate::strip_noops`]) and by the CPU renderer ([`crate::render_scene`]).
pub struct Scene {
    /// Output canvas dimensions.
    pub canvas: Canvas,
    /// Ordered command sequence, addressed `0..N-1`.
    pub commands: Vec<Command>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
/// One element of the recorded command sequence.
///
/// `Save`/`SaveLayer` and `Restore` are expected to be correctly nested;
/// consumers tolerate an unmatched `Restore` rather than fail.
pub enum Command {
    /// Plain state save: snapshots transform and clip, no offscreen buffer.
    Save,
    /// Compositing scope: contents render into an offscreen buffer that is
    /// blended onto the destination as a unit at the matching [`Command::Restore`].
    /// An absent paint is fully neutral.
    SaveLayer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bounds: Option<Rect>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        paint: Option<Paint>,
    },
    /// Closes the innermost open `Save` or `SaveLayer`, whichever it is.
    Restore,
    /// Concatenates an affine matrix onto the current transform.
    Concat { matrix: Affine },
    /// Intersects the current clip with a rectangle (in local coordinates).
    ClipRect { rect: Rect },
    /// Fills a rectangle.
    DrawRect { rect: Rect, paint: Paint },
    /// Fills the oval inscribed in a rectangle.
    DrawOval { rect: Rect, paint: Paint },
    /// Fills a path given as SVG path data.
    DrawPath { d: String, paint: Paint },
}

impl Command {
    /// Paint of a leaf drawing command, if this is one.
    pub fn draw_paint(&self) -> Option<&Paint> {
        match self {
            Command::DrawRect { paint, .. }
            | Command::DrawOval { paint, .. }
            | Command::DrawPath { paint, .. } => Some(paint),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Save => "Save",
            Command::SaveLayer { .. } => "SaveLayer",
            Command::Restore => "Restore",
            Command::Concat { .. } => "Concat",
            Command::ClipRect { .. } => "ClipRect",
            Command::DrawRect { .. } => "DrawRect",
            Command::DrawOval { .. } => "DrawOval",
            Command::DrawPath { .. } => "DrawPath",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Save => write!(f, "Save"),
            Command::SaveLayer { bounds, paint } => {
                write!(f, "SaveLayer(")?;
                match paint {
                    Some(p) => write!(f, "{p}")?,
                    None => write!(f, "no paint")?,
                }
                if let Some(b) = bounds {
                    write!(f, ", bounds={}", fmt_rect(b))?;
                }
                write!(f, ")")
            }
            Command::Restore => write!(f, "Restore"),
            Command::Concat { matrix } => {
                let c = matrix.as_coeffs();
                write!(
                    f,
                    "Concat([{}, {}, {}, {}, {}, {}])",
                    c[0], c[1], c[2], c[3], c[4], c[5]
                )
            }
            Command::ClipRect { rect } => write!(f, "ClipRect({})", fmt_rect(rect)),
            Command::DrawRect { rect, paint } => {
                write!(f, "DrawRect({}, {paint})", fmt_rect(rect))
            }
            Command::DrawOval { rect, paint } => {
                write!(f, "DrawOval({}, {paint})", fmt_rect(rect))
            }
            Command::DrawPath { d, paint } => write!(f, "DrawPath(\"{d}\", {paint})"),
        }
    }
}

fn fmt_rect(r: &Rect) -> String {
    format!("[{}, {}, {}, {}]", r.x0, r.y0, r.x1, r.y1)
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
/// The effects descriptor attached to drawing and layer-opening commands:
/// color (carrying the paint alpha), blend mode, and the optional modifiers.
pub struct Paint {
    #[serde(default)]
    pub color: Rgba8,
    #[serde(default)]
    pub blend: BlendMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shader: Option<Shader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_filter: Option<ColorFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_filter: Option<ImageFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_filter: Option<MaskFilter>,
}

impl Default for Paint {
    fn default() -> Self {
        Self {
            color: Rgba8::BLACK,
            blend: BlendMode::SrcOver,
            shader: None,
            color_filter: None,
            image_filter: None,
            mask_filter: None,
        }
    }
}

impl Paint {
    pub fn solid(color: Rgba8) -> Self {
        Self {
            color,
            ..Self::default()
        }
    }

    /// Paint alpha in `[0, 1]`.
    pub fn alpha(&self) -> f32 {
        f32::from(self.color.a) / 255.0
    }

    pub fn is_opaque(&self) -> bool {
        self.color.is_opaque()
    }

    pub(crate) fn validate(&self) -> LayerfoldResult<()> {
        if let Some(shader) = &self.shader {
            shader.validate()?;
        }
        if let Some(ImageFilter::Blur { sigma }) = &self.image_filter {
            validate_sigma(*sigma, "image_filter")?;
        }
        if let Some(MaskFilter::Blur { sigma }) = &self.mask_filter {
            validate_sigma(*sigma, "mask_filter")?;
        }
        if let Some(ColorFilter::Tint { strength, .. }) = &self.color_filter {
            if !strength.is_finite() || !(0.0..=1.0).contains(strength) {
                return Err(LayerfoldError::validation(
                    "Tint.strength must be finite and in [0, 1]",
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Paint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:02x}{:02x}{:02x}{:02x} {:?}",
            self.color.r, self.color.g, self.color.b, self.color.a, self.blend
        )?;
        if self.shader.is_some() {
            write!(f, " +shader")?;
        }
        if self.color_filter.is_some() {
            write!(f, " +color-filter")?;
        }
        if self.image_filter.is_some() {
            write!(f, " +image-filter")?;
        }
        if self.mask_filter.is_some() {
            write!(f, " +mask-filter")?;
        }
        Ok(())
    }
}

fn validate_sigma(sigma: f32, what: &str) -> LayerfoldResult<()> {
    if !sigma.is_finite() || sigma <= 0.0 || sigma > 100.0 {
        return Err(LayerfoldError::validation(format!(
            "{what} blur sigma must be finite and in (0, 100]"
        )));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
/// Porter-Duff and separable blend modes, Skia naming.
pub enum BlendMode {
    Clear,
    Src,
    Dst,
    #[default]
    SrcOver,
    DstOver,
    SrcIn,
    DstIn,
    SrcOut,
    DstOut,
    SrcAtop,
    DstAtop,
    Xor,
    Plus,
    Modulate,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
}

impl BlendMode {
    /// Ordinary source-over compositing with no special behavior.
    pub fn is_src_over(self) -> bool {
        self == BlendMode::SrcOver
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
/// Source-color generator replacing the paint's flat color.
pub enum Shader {
    LinearGradient {
        start: Point,
        end: Point,
        stops: Vec<GradientStop>,
    },
    RadialGradient {
        center: Point,
        radius: f64,
        stops: Vec<GradientStop>,
    },
}

impl Shader {
    fn validate(&self) -> LayerfoldResult<()> {
        let stops = match self {
            Shader::LinearGradient { stops, .. } => stops,
            Shader::RadialGradient { radius, stops, .. } => {
                if !radius.is_finite() || *radius <= 0.0 {
                    return Err(LayerfoldError::validation(
                        "RadialGradient.radius must be finite and > 0",
                    ));
                }
                stops
            }
        };
        if stops.len() < 2 {
            return Err(LayerfoldError::validation(
                "gradient needs at least 2 stops",
            ));
        }
        for stop in stops {
            if !stop.offset.is_finite() || !(0.0..=1.0).contains(&stop.offset) {
                return Err(LayerfoldError::validation(
                    "gradient stop offset must be finite and in [0, 1]",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GradientStop {
    pub offset: f32,
    pub color: Rgba8,
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
/// Per-pixel transform of the source color, applied before compositing.
pub enum ColorFilter {
    Grayscale,
    Invert,
    Tint { color: Rgba8, strength: f32 },
}

impl ColorFilter {
    pub fn apply(&self, c: Rgba8) -> Rgba8 {
        match *self {
            ColorFilter::Grayscale => {
                let l = (u32::from(c.r) * 299 + u32::from(c.g) * 587 + u32::from(c.b) * 114 + 500)
                    / 1000;
                Rgba8::new(l as u8, l as u8, l as u8, c.a)
            }
            ColorFilter::Invert => Rgba8::new(255 - c.r, 255 - c.g, 255 - c.b, c.a),
            ColorFilter::Tint { color, strength } => {
                let t = strength.clamp(0.0, 1.0);
                let mix = |a: u8, b: u8| -> u8 {
                    (f32::from(a) + (f32::from(b) - f32::from(a)) * t).round() as u8
                };
                Rgba8::new(mix(c.r, color.r), mix(c.g, color.g), mix(c.b, color.b), c.a)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
/// Filter over the rasterized pixels of a draw or layer.
pub enum ImageFilter {
    Blur { sigma: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
/// Filter over the coverage of a draw before the paint is applied.
pub enum MaskFilter {
    Blur { sigma: f32 },
}

impl Scene {
    pub fn validate(&self) -> LayerfoldResult<()> {
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(LayerfoldError::validation(
                "canvas width/height must be > 0",
            ));
        }

        for (index, cmd) in self.commands.iter().enumerate() {
            let err_at = |err: LayerfoldError| {
                LayerfoldError::validation(format!("command {index} ({}): {err}", cmd.name()))
            };

            match cmd {
                Command::SaveLayer {
                    paint: Some(paint), ..
                } => paint.validate().map_err(err_at)?,
                Command::DrawPath { d, paint } => {
                    BezPath::from_svg(d).map_err(|e| {
                        LayerfoldError::validation(format!(
                            "command {index} (DrawPath): invalid path data: {e}"
                        ))
                    })?;
                    paint.validate().map_err(err_at)?;
                }
                Command::DrawRect { paint, .. } | Command::DrawOval { paint, .. } => {
                    paint.validate().map_err(err_at)?;
                }
                _ => {}
            }
        }

        Ok(())
    }
}
