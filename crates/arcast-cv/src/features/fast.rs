//! FAST-9 corner detection with 3x3 non-maximum suppression.

use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::suppress::local_maxima;

pub use imageproc::corners::Corner;

/// Detect corners at least `border` pixels from every edge.
///
/// Suppression runs before the border cut so a corner just inside the
/// border still loses to a stronger neighbor outside it. Equal scores are
/// resolved by position, so the result is deterministic.
pub fn detect(image: &GrayImage, threshold: u8, border: u32) -> Vec<Corner> {
    let (width, height) = image.dimensions();
    let border = border.max(3);
    if width <= 2 * border || height <= 2 * border {
        return Vec::new();
    }

    let corners = corners_fast9(image, threshold);
    local_maxima(&corners, 1)
        .into_iter()
        .filter(|c| {
            c.x >= border && c.y >= border && c.x < width - border && c.y < height - border
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_flat_image_has_no_corners() {
        let image = GrayImage::from_pixel(64, 64, Luma([128]));
        assert!(detect(&image, 20, 8).is_empty());
    }

    #[test]
    fn test_bright_square_corners() {
        let mut image = GrayImage::from_pixel(64, 64, Luma([20]));
        for y in 20..44 {
            for x in 20..44 {
                image.put_pixel(x, y, Luma([220]));
            }
        }

        let corners = detect(&image, 20, 8);
        assert!(!corners.is_empty());
        // Every corner sits near one of the four square corners.
        for c in &corners {
            let near_x = (c.x as i32 - 20).abs() <= 3 || (c.x as i32 - 43).abs() <= 3;
            let near_y = (c.y as i32 - 20).abs() <= 3 || (c.y as i32 - 43).abs() <= 3;
            assert!(near_x && near_y, "unexpected corner at ({}, {})", c.x, c.y);
        }
    }

    #[test]
    fn test_adjacent_corners_are_suppressed() {
        let mut image = GrayImage::from_pixel(64, 64, Luma([20]));
        for y in 20..44 {
            for x in 20..44 {
                image.put_pixel(x, y, Luma([220]));
            }
        }

        let corners = detect(&image, 20, 8);
        for (i, a) in corners.iter().enumerate() {
            for b in &corners[i + 1..] {
                let apart = a.x.abs_diff(b.x) > 1 || a.y.abs_diff(b.y) > 1;
                assert!(apart, "({}, {}) next to ({}, {})", a.x, a.y, b.x, b.y);
            }
        }
    }

    #[test]
    fn test_border_is_respected() {
        let mut image = GrayImage::from_pixel(40, 40, Luma([20]));
        image.put_pixel(5, 5, Luma([250]));
        image.put_pixel(20, 20, Luma([250]));

        let corners = detect(&image, 20, 10);
        assert!(corners.iter().all(|c| c.x >= 10 && c.y >= 10 && c.x < 30 && c.y < 30));
        assert!(corners.iter().any(|c| c.x == 20 && c.y == 20));
    }
}
