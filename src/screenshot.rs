//! Dumps the canvas to a 24-bit RGB PNG.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::info;

use crate::canvas::Canvas;

pub fn write_png(canvas: &Canvas, path: &Path) -> Result<()> {
    let (w, h) = (canvas.width() as u32, canvas.height() as u32);
    let image = image::RgbImage::from_raw(w, h, canvas.data().to_vec())
        .ok_or_else(|| anyhow!("canvas buffer does not match {}x{}", w, h))?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("cannot write {:?}", path))?;
    info!("wrote {}x{} screenshot to {:?}", w, h, path);
    Ok(())
}
