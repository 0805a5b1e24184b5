use std::path::Path;

use crate::{
    core::Rgba8,
    error::{LayerfoldError, LayerfoldResult},
    render::Frame,
};

/// Writes a frame as a PNG, unpremultiplying first when needed.
pub fn write_frame_png(frame: &Frame, path: &Path) -> LayerfoldResult<()> {
    let straight;
    let data: &[u8] = if frame.premultiplied {
        straight = unpremultiply(&frame.data);
        &straight
    } else {
        &frame.data
    };

    image::save_buffer_with_format(
        path,
        data,
        frame.width,
        frame.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .map_err(|e| LayerfoldError::encode(format!("write png '{}': {e}", path.display())))
}

fn unpremultiply(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for px in data.chunks_exact(4) {
        let c = Rgba8::from_premul([px[0], px[1], px[2], px[3]]);
        out.extend_from_slice(&[c.r, c.g, c.b, c.a]);
    }
    out
}
