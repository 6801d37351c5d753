pub mod cache;

pub use cache::DecodedImageCache;

use image::DynamicImage;

/// Decode raw clipboard/blob bytes into a renderable image
///
/// Returns None for malformed bytes; callers fall back to textual
/// content for the entry rather than failing.
pub fn decode_image(bytes: &[u8]) -> Option<DynamicImage> {
    match image::load_from_memory(bytes) {
        Ok(img) => Some(img),
        Err(e) => {
            log::warn!("Failed to decode {} byte image: {}", bytes.len(), e);
            None
        }
    }
}

/// Estimated memory cost of a decoded image: four bytes per pixel
pub fn decoded_cost(img: &DynamicImage) -> usize {
    (img.width() as usize) * (img.height() as usize) * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_fixture(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgba8(width, height);
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
        bytes
    }

    #[test]
    fn test_decode_valid_png() {
        let bytes = png_fixture(4, 2);
        let img = decode_image(&bytes).unwrap();
        assert_eq!(img.width(), 4);
        assert_eq!(img.height(), 2);
    }

    #[test]
    fn test_decode_garbage_is_none() {
        assert!(decode_image(b"definitely not an image").is_none());
    }

    #[test]
    fn test_decoded_cost_is_pixel_bytes() {
        let img = DynamicImage::new_rgba8(10, 5);
        assert_eq!(decoded_cost(&img), 10 * 5 * 4);
    }
}
