//! 8-bit greyscale PNG for quantized spectrograms.
//!
//! Array row `r` is image row `y = r` and array column `t` is `x = t`, so the
//! lowest frequency sits on the top line of the file.

use std::path::Path;

use image::{GrayImage, ImageFormat, Luma};
use melcanvas_core::QuantizedImage;
use ndarray::Array2;

use crate::Result;

pub fn to_gray_image(image: &QuantizedImage) -> GrayImage {
    let pixels = image.pixels();
    GrayImage::from_fn(image.width() as u32, image.height() as u32, |x, y| {
        Luma([pixels[[y as usize, x as usize]]])
    })
}

pub fn from_gray_image(gray: &GrayImage) -> Array2<u8> {
    let (width, height) = gray.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(r, c)| {
        gray.get_pixel(c as u32, r as u32)[0]
    })
}

pub fn write_png(path: &Path, image: &QuantizedImage) -> Result<()> {
    to_gray_image(image).save_with_format(path, ImageFormat::Png)?;
    log::info!(
        "wrote {} ({}x{})",
        path.display(),
        image.width(),
        image.height()
    );
    Ok(())
}

/// Reads any PNG; colour images are converted to luma.
pub fn read_png(path: &Path) -> Result<Array2<u8>> {
    let gray = image::open(path)?.into_luma8();
    log::debug!("read {} ({}x{})", path.display(), gray.width(), gray.height());
    Ok(from_gray_image(&gray))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use melcanvas_core::DbBounds;

    #[test]
    fn png_round_trip_keeps_orientation() {
        let pixels = Array2::from_shape_fn((3, 5), |(r, c)| (r * 50 + c) as u8);
        let image = QuantizedImage::new(
            pixels.clone(),
            DbBounds {
                min_db: -80.0,
                max_db: 0.0,
            },
        );
        let gray = to_gray_image(&image);
        assert_eq!(gray.dimensions(), (5, 3));
        assert_eq!(gray.get_pixel(4, 2)[0], pixels[[2, 4]]);

        let path = std::env::temp_dir().join(format!("melcanvas_png_{}.png", std::process::id()));
        write_png(&path, &image).unwrap();
        let back = read_png(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back, pixels);
    }

    #[test]
    fn colour_png_is_read_as_luma() {
        let path =
            std::env::temp_dir().join(format!("melcanvas_rgb_png_{}.png", std::process::id()));
        RgbImage::from_pixel(4, 2, Rgb([200, 200, 200]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        let back = read_png(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back.dim(), (2, 4));
        assert!(back.iter().all(|&v| v == 200));
    }
}
