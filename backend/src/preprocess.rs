//! Image preprocessing
//!
//! Turns an uploaded image into the NHWC float tensor the model expects:
//! resized to a fixed square, RGB, values scaled into `[0, 1]`.

use image::{imageops::FilterType, DynamicImage};
use tract_onnx::prelude::tract_ndarray::{Array4, Axis};

use crate::error::PredictError;

/// Decode `bytes` (format guessed from content) and preprocess.
pub fn preprocess_bytes(bytes: &[u8], size: u32) -> Result<Array4<f32>, PredictError> {
    if bytes.is_empty() {
        return Err(PredictError::Decode("empty upload".to_string()));
    }
    let image = image::load_from_memory(bytes)?;
    Ok(preprocess_image(&image, size))
}

/// Resize to `size`×`size` and scale to `[1, size, size, 3]` in `[0, 1]`.
pub fn preprocess_image(image: &DynamicImage, size: u32) -> Array4<f32> {
    let rgb = image
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();
    let side = size as usize;

    Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
        rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

/// Stack `batch` copies of a single-image tensor along the batch axis.
///
/// Only needed for artifacts exported with a fixed batch dimension; with a
/// batch of one the input is returned unchanged.
pub fn replicate_batch(image: Array4<f32>, batch: usize) -> Result<Array4<f32>, PredictError> {
    let (n, h, w, c) = image.dim();
    if n != 1 {
        return Err(PredictError::ShapeMismatch {
            expected: vec![1, h, w, c],
            actual: vec![n, h, w, c],
        });
    }
    if batch == 1 {
        return Ok(image);
    }
    let tiled = image
        .broadcast((batch, h, w, c))
        .ok_or_else(|| PredictError::ShapeMismatch {
            expected: vec![batch, h, w, c],
            actual: vec![n, h, w, c],
        })?
        .to_owned();
    debug_assert_eq!(tiled.len_of(Axis(0)), batch);
    Ok(tiled)
}
