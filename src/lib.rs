//! layerfold rewrites recorded 2D drawing command sequences to eliminate
//! unnecessary compositing layers.
//!
//! A scene is an ordered list of commands (`Save`/`SaveLayer`/`Restore`
//! brackets, transforms, clips, leaf draws). The core pass,
//! [`collapse_layers`], downgrades `SaveLayer` brackets that provably don't
//! need their offscreen buffer into plain `Save`s; [`strip_noops`] is a
//! sibling peephole cleanup selectable from the same front end.
//!
//! # Pipeline overview
//!
//! 1. **Decode**: JSON scene file -> [`Scene`] ([`read_scene_json`])
//! 2. **Optimize**: in-place command rewrite ([`collapse_layers`] /
//!    [`strip_noops`]) producing a structured log
//! 3. **Render** (optional): `Scene -> Frame` on the CPU ([`render_scene`])
//! 4. **Encode** (optional): frame to PNG ([`write_frame_png`]), log and
//!    listings to an HTML report ([`ReportData`])
//!
//! Key design constraints:
//!
//! - **No unsafe**: `unsafe` is forbidden in this crate.
//! - **Deterministic**: the optimizer passes are pure functions of the input
//!   sequence; no IO happens outside `io`/`encode_png`.
//! - **Tolerant of malformed nesting**: an unmatched `Restore` is a no-op
//!   everywhere, never an error.
#![forbid(unsafe_code)]

pub mod blur;
pub mod collapse;
pub mod core;
pub mod encode_png;
pub mod error;
pub mod io;
pub mod model;
pub mod peephole;
pub mod render;
pub mod report;

pub use crate::collapse::{CollapseLog, CollapsedScope, collapse_layers, paint_is_plain};
pub use crate::core::{Affine, BezPath, Canvas, Point, Rect, Rgba8, Vec2};
pub use crate::encode_png::write_frame_png;
pub use crate::error::{LayerfoldError, LayerfoldResult};
pub use crate::io::{read_scene_json, write_scene_json};
pub use crate::model::{
    BlendMode, ColorFilter, Command, GradientStop, ImageFilter, MaskFilter, Paint, Scene, Shader,
};
pub use crate::peephole::{PeepholeStats, strip_noops};
pub use crate::render::{Frame, render_scene};
pub use crate::report::{ReportData, command_listing};
