use image::{GrayImage, Luma, RgbaImage};

use crate::automation::config::RelativeRect;

/// Converts image to binary by keeping only bright pixels.
///
/// Pixels where R > threshold AND G > threshold AND B > threshold become black (text).
/// All other pixels become white (background).
///
/// The round counter and map names are drawn in white with a dark outline,
/// so this isolates the glyphs from the map behind them.
pub fn threshold_bright_pixels(img: &RgbaImage, threshold: u8) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut output = GrayImage::new(width, height);

    for (x, y, pixel) in img.enumerate_pixels() {
        let [r, g, b, _] = pixel.0;
        let value = if r > threshold && g > threshold && b > threshold {
            0u8
        } else {
            255u8
        };
        output.put_pixel(x, y, Luma([value]));
    }

    output
}

/// 3x3 median filter. Removes isolated specks left by thresholding.
/// Edge pixels use the clamped neighbourhood.
pub fn median_filter_3x3(img: &GrayImage) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut output = GrayImage::new(width, height);
    let mut window = Vec::with_capacity(9);

    for y in 0..height {
        for x in 0..width {
            window.clear();
            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    window.push(img.get_pixel(nx, ny)[0]);
                }
            }
            window.sort_unstable();
            output.put_pixel(x, y, Luma([window[window.len() / 2]]));
        }
    }

    output
}

/// Crops a sub-region from an image using relative coordinates.
///
/// Converts the relative rect (0.0–1.0) to absolute pixel coordinates,
/// clamps to image bounds, and returns the cropped sub-image.
pub fn crop_region(img: &RgbaImage, region: &RelativeRect) -> RgbaImage {
    let (w, h) = img.dimensions();

    let x0 = ((region.x * w as f32) as u32).min(w);
    let y0 = ((region.y * h as f32) as u32).min(h);
    let rw = ((region.width * w as f32) as u32).min(w - x0);
    let rh = ((region.height * h as f32) as u32).min(h - y0);

    image::imageops::crop_imm(img, x0, y0, rw, rh).to_image()
}

/// Prepares one text region for OCR: cropped and binarized, then despeckled.
pub fn prepare_region(img: &RgbaImage, region: &RelativeRect, threshold: u8) -> GrayImage {
    let cropped = crop_region(img, region);
    median_filter_3x3(&threshold_bright_pixels(&cropped, threshold))
}
