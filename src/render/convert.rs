//! sRGB boundary conversions and reference-image preparation.
//!
//! Training and rendering both work in linear RGB; sRGB appears only when
//! decoding reference images and when writing rendered output. The transfer
//! function is the piecewise sRGB curve, not a gamma 2.2 approximation.

use image::RgbImage;

/// sRGB u8 to linear f32.
pub fn srgb_u8_to_linear_f32(u: u8) -> f32 {
    let cs = (u as f32) / 255.0;
    if cs <= 0.04045 {
        cs / 12.92
    } else {
        ((cs + 0.055) / 1.055).powf(2.4)
    }
}

/// Linear f32 to sRGB u8, clamped.
pub fn linear_to_srgb_u8(x: f32) -> u8 {
    let x = x.clamp(0.0, 1.0);
    let cs = if x <= 0.0031308 {
        12.92 * x
    } else {
        1.055 * x.powf(1.0 / 2.4) - 0.055
    };
    (cs * 255.0).round() as u8
}

/// Decode an image to a flat linear RGBA float buffer (alpha 1.0),
/// row-major.
pub fn image_to_linear_rgba(img: &RgbImage) -> Vec<f32> {
    let mut out = Vec::with_capacity((img.width() * img.height() * 4) as usize);
    for pixel in img.pixels() {
        out.push(srgb_u8_to_linear_f32(pixel[0]));
        out.push(srgb_u8_to_linear_f32(pixel[1]));
        out.push(srgb_u8_to_linear_f32(pixel[2]));
        out.push(1.0);
    }
    out
}

/// Nearest-neighbor downsample straight into a linear RGBA float buffer.
///
/// Reference images are downsampled to the training resolution once per
/// resolution change and cached, so there is no need for a filtered resize.
pub fn downsample_to_linear_rgba(img: &RgbImage, width: u32, height: u32) -> Vec<f32> {
    assert!(width > 0 && height > 0);
    let (src_w, src_h) = (img.width(), img.height());
    let mut out = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        let sy = ((y as u64 * src_h as u64) / height as u64).min(src_h as u64 - 1) as u32;
        for x in 0..width {
            let sx = ((x as u64 * src_w as u64) / width as u64).min(src_w as u64 - 1) as u32;
            let pixel = img.get_pixel(sx, sy);
            out.push(srgb_u8_to_linear_f32(pixel[0]));
            out.push(srgb_u8_to_linear_f32(pixel[1]));
            out.push(srgb_u8_to_linear_f32(pixel[2]));
            out.push(1.0);
        }
    }
    out
}

/// Encode a flat linear RGBA buffer (as produced by the renderer) to an sRGB
/// image, dropping the transmittance channel.
pub fn linear_rgba_to_image(pixels: &[f32], width: u32, height: u32) -> RgbImage {
    assert_eq!(pixels.len(), (width * height * 4) as usize);
    RgbImage::from_fn(width, height, |x, y| {
        let i = ((y * width + x) * 4) as usize;
        image::Rgb([
            linear_to_srgb_u8(pixels[i]),
            linear_to_srgb_u8(pixels[i + 1]),
            linear_to_srgb_u8(pixels[i + 2]),
        ])
    })
}
