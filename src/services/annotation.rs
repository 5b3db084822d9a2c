// Box and label overlay rendering for the annotated response image

use crate::core::errors::{AnnotationError, AnnotationResult};
use crate::core::types::Detection;
use base64::{engine::general_purpose, Engine};
use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    text::Text,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use tracing::debug;

const BOX_COLOR: [u8; 3] = [0, 255, 0];
const LABEL_COLOR: [u8; 3] = [255, 0, 0];
const BOX_THICKNESS: i32 = 2;

/// Draw detections onto a copy of the source image and return it as a
/// JPEG data URI. Drawing and encoding are CPU-bound, so the whole
/// thing runs on the blocking thread pool.
pub async fn annotate_to_data_uri_async(
    img: &DynamicImage,
    detections: &[Detection],
) -> AnnotationResult<String> {
    let frame = img.to_rgb8();
    let detections = detections.to_vec();

    tokio::task::spawn_blocking(move || {
        let annotated = draw_detections(frame, &detections);
        let jpeg = encode_jpeg(&annotated)?;
        Ok(to_data_uri(&jpeg))
    })
    .await
    .map_err(|e| AnnotationError::TaskJoinFailed(e.to_string()))?
}

/// Draw a rectangle and a "label confidence" tag for every detection
pub fn draw_detections(mut frame: RgbImage, detections: &[Detection]) -> RgbImage {
    for detection in detections {
        let [x1, y1, x2, y2] = detection.bbox;
        draw_rect(&mut frame, x1, y1, x2, y2, BOX_COLOR);

        let tag = format!("{} {:.2}", detection.label, detection.confidence);
        // Tag sits just above the box, clamped so it stays on-canvas
        draw_text(&mut frame, &tag, (x1, (y1 - 10).max(10)), LABEL_COLOR);
    }

    debug!("✓ Annotated {} detections", detections.len());
    frame
}

pub fn encode_jpeg(frame: &RgbImage) -> AnnotationResult<Vec<u8>> {
    let mut jpeg_bytes = Vec::new();
    let mut cursor = Cursor::new(&mut jpeg_bytes);
    frame.write_to(&mut cursor, ImageFormat::Jpeg)?;
    Ok(jpeg_bytes)
}

pub fn to_data_uri(jpeg_bytes: &[u8]) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        general_purpose::STANDARD.encode(jpeg_bytes)
    )
}

fn draw_rect(frame: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: [u8; 3]) {
    for t in 0..BOX_THICKNESS {
        let (ax1, ay1, ax2, ay2) = (x1 + t, y1 + t, x2 - t, y2 - t);
        if ax2 <= ax1 || ay2 <= ay1 {
            break;
        }
        for x in ax1..=ax2 {
            set_pixel_safe(frame, x, ay1, color);
            set_pixel_safe(frame, x, ay2, color);
        }
        for y in ay1..=ay2 {
            set_pixel_safe(frame, ax1, y, color);
            set_pixel_safe(frame, ax2, y, color);
        }
    }
}

fn set_pixel_safe(frame: &mut RgbImage, x: i32, y: i32, color: [u8; 3]) {
    if x >= 0 && y >= 0 && x < frame.width() as i32 && y < frame.height() as i32 {
        frame.put_pixel(x as u32, y as u32, Rgb(color));
    }
}

fn draw_text(frame: &mut RgbImage, text: &str, pos: (i32, i32), color: [u8; 3]) {
    let style = MonoTextStyle::new(&FONT_6X10, Rgb888::new(color[0], color[1], color[2]));
    let mut target = ImageDrawTarget::new(frame);
    let _ = Text::new(text, Point::new(pos.0, pos.1), style).draw(&mut target);
}

/// embedded-graphics draw target backed by an image buffer
struct ImageDrawTarget<'a> {
    image: &'a mut RgbImage,
}

impl<'a> ImageDrawTarget<'a> {
    fn new(image: &'a mut RgbImage) -> Self {
        Self { image }
    }
}

impl OriginDimensions for ImageDrawTarget<'_> {
    fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }
}

impl DrawTarget for ImageDrawTarget<'_> {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let width = self.image.width() as i32;
        let height = self.image.height() as i32;
        for Pixel(coord, color) in pixels {
            if coord.x < 0 || coord.y < 0 || coord.x >= width || coord.y >= height {
                continue;
            }
            let pixel = self.image.get_pixel_mut(coord.x as u32, coord.y as u32);
            *pixel = Rgb([color.r(), color.g(), color.b()]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_detection(bbox: [i32; 4]) -> Detection {
        Detection {
            label: "cat".to_string(),
            confidence: 0.421,
            bbox,
        }
    }

    #[test]
    fn test_draw_sets_box_pixels() {
        let frame = RgbImage::from_pixel(64, 48, Rgb([0, 0, 255]));
        let annotated = draw_detections(frame, &[test_detection([8, 20, 40, 40])]);

        assert_eq!(annotated.get_pixel(8, 20), &Rgb(BOX_COLOR));
        assert_eq!(annotated.get_pixel(40, 40), &Rgb(BOX_COLOR));
        // Box interior is untouched
        assert_eq!(annotated.get_pixel(24, 30), &Rgb([0, 0, 255]));
    }

    #[test]
    fn test_draw_near_top_edge_does_not_panic() {
        let frame = RgbImage::from_pixel(64, 48, Rgb([0, 0, 255]));
        let annotated = draw_detections(frame, &[test_detection([0, 0, 64, 48])]);
        assert_eq!(annotated.dimensions(), (64, 48));
    }

    #[test]
    fn test_data_uri_round_trip() {
        let frame = RgbImage::from_pixel(64, 48, Rgb([200, 10, 10]));
        let annotated = draw_detections(frame, &[test_detection([8, 20, 40, 40])]);
        let jpeg = encode_jpeg(&annotated).unwrap();
        let uri = to_data_uri(&jpeg);

        let payload = uri
            .strip_prefix("data:image/jpeg;base64,")
            .expect("data URI header");
        let decoded_bytes = general_purpose::STANDARD.decode(payload).unwrap();
        let decoded = image::load_from_memory(&decoded_bytes).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
        assert_eq!(
            image::guess_format(&decoded_bytes).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_empty_detections_still_encode() {
        let frame = RgbImage::from_pixel(32, 32, Rgb([7, 7, 7]));
        let annotated = draw_detections(frame, &[]);
        let jpeg = encode_jpeg(&annotated).unwrap();
        assert!(!jpeg.is_empty());
    }
}
