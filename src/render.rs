//! Rendering stage: annotated detection image and blue mask overlay

use crate::{
    error::{MedsegError, Result},
    mask::BinaryMask,
    types::{BoundingBox, Detection},
};
use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::path::{Path, PathBuf};

/// Box, label and overlay colour
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
/// Box outline thickness in pixels
pub const BOX_THICKNESS: i32 = 2;
/// Label baseline offset above the box top edge
pub const LABEL_OFFSET: i32 = 10;
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_STROKE: i32 = 2;

/// DejaVu Sans, see `assets/fonts/LICENSE-DejaVu.txt`
static EMBEDDED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

/// TrueType font used for detection labels
#[derive(Clone)]
pub struct LabelFont {
    font: FontArc,
    scale: PxScale,
    /// `None` for the embedded font
    source: Option<PathBuf>,
}

impl LabelFont {
    /// The bundled DejaVu Sans at the fixed label scale
    ///
    /// # Errors
    /// `Internal` if the bundled font data fails to parse
    pub fn embedded() -> Result<Self> {
        let font = FontArc::try_from_slice(EMBEDDED_FONT)
            .map_err(|e| MedsegError::internal(format!("Embedded label font is invalid: {e}")))?;
        Ok(Self {
            font,
            scale: PxScale::from(LABEL_FONT_SIZE),
            source: None,
        })
    }

    /// Parse a font file
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    /// - `InvalidConfig` if it is not a usable TrueType/OpenType font
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data =
            std::fs::read(path).map_err(|e| MedsegError::file_io_error("read font", path, &e))?;
        let font = FontArc::try_from_vec(data).map_err(|e| {
            MedsegError::invalid_config(format!("Invalid label font '{}': {e}", path.display()))
        })?;
        Ok(Self {
            font,
            scale: PxScale::from(LABEL_FONT_SIZE),
            source: Some(path.to_path_buf()),
        })
    }

    /// Load the configured font, or fall back to the embedded one
    ///
    /// # Errors
    /// A configured font that cannot be loaded
    pub fn load(configured: Option<&Path>) -> Result<Self> {
        let font = match configured {
            Some(path) => Self::from_file(path)?,
            None => Self::embedded()?,
        };
        tracing::debug!(font = ?font.source, "label font loaded");
        Ok(font)
    }

    /// Font file path; `None` for the embedded font
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

impl std::fmt::Debug for LabelFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelFont")
            .field("source", &self.source)
            .field("scale", &self.scale)
            .finish_non_exhaustive()
    }
}

/// Copy of `image` with every detection's box and label drawn in blue
///
/// Labels read `"<class> <confidence>%"` with the baseline `LABEL_OFFSET`
/// pixels above the box, clamped to the top edge. Without a font only boxes
/// are drawn.
#[must_use]
pub fn render_detections(
    image: &RgbImage,
    detections: &[Detection],
    font: Option<&LabelFont>,
) -> RgbImage {
    let mut canvas = image.clone();
    for detection in detections {
        let (x1, y1, _, _) = normalized(&detection.bbox);
        draw_box(&mut canvas, &detection.bbox);
        if let Some(font) = font {
            let baseline = y1.saturating_sub(LABEL_OFFSET).max(0);
            draw_label(&mut canvas, &detection.label(), x1, baseline, font);
        }
    }
    canvas
}

/// Corners ordered so that `x1 <= x2` and `y1 <= y2`
fn normalized(b: &BoundingBox) -> (i32, i32, i32, i32) {
    (b.x1.min(b.x2), b.y1.min(b.y2), b.x1.max(b.x2), b.y1.max(b.y2))
}

/// Outline in `BOX_THICKNESS` nested one-pixel rectangles
///
/// The stroke grows inward from the box edges rather than being centred on
/// them. Spans are clipped to the canvas before drawing.
fn draw_box(canvas: &mut RgbImage, bbox: &BoundingBox) {
    let (x1, y1, x2, y2) = normalized(bbox);
    for t in 0..BOX_THICKNESS {
        let (left, top) = (x1.saturating_add(t), y1.saturating_add(t));
        let (right, bottom) = (x2.saturating_sub(t), y2.saturating_sub(t));
        if left > right || top > bottom {
            break;
        }
        draw_hline(canvas, top, left, right);
        draw_hline(canvas, bottom, left, right);
        draw_vline(canvas, left, top, bottom);
        draw_vline(canvas, right, top, bottom);
    }
}

fn draw_hline(canvas: &mut RgbImage, y: i32, from: i32, to: i32) {
    let (width, height) = (canvas.width() as i32, canvas.height() as i32);
    if !(0..height).contains(&y) {
        return;
    }
    for x in from.max(0)..=to.min(width - 1) {
        canvas.put_pixel(x as u32, y as u32, BOX_COLOR);
    }
}

fn draw_vline(canvas: &mut RgbImage, x: i32, from: i32, to: i32) {
    let (width, height) = (canvas.width() as i32, canvas.height() as i32);
    if !(0..width).contains(&x) {
        return;
    }
    for y in from.max(0)..=to.min(height - 1) {
        canvas.put_pixel(x as u32, y as u32, BOX_COLOR);
    }
}

fn draw_label(canvas: &mut RgbImage, text: &str, x: i32, baseline: i32, font: &LabelFont) {
    let (text_width, text_height) = text_size(font.scale, &font.font, text);
    let top = baseline.saturating_sub(text_height as i32).max(0);
    // Far off-canvas anchors stay off-canvas without overflowing glyph offsets
    let x = x.clamp(-(text_width as i32) - LABEL_STROKE, canvas.width() as i32);
    for stroke in 0..LABEL_STROKE {
        draw_text_mut(
            canvas,
            BOX_COLOR,
            x + stroke,
            top,
            font.scale,
            &font.font,
            text,
        );
    }
}

/// Composite `mask` onto a copy of `image` as an additive blue tint
///
/// Masked pixels keep red and green; blue becomes
/// `clamp(round(b + opacity * 255), 0, 255)` with ties rounded to even.
/// Unmasked pixels are copied unchanged.
///
/// # Errors
/// `Internal` if the mask and image dimensions differ
pub fn render_overlay(image: &RgbImage, mask: &BinaryMask, opacity: f64) -> Result<RgbImage> {
    if mask.dimensions() != image.dimensions() {
        return Err(MedsegError::internal(format!(
            "Overlay mask is {:?} but image is {:?}",
            mask.dimensions(),
            image.dimensions()
        )));
    }

    let tint = opacity * f64::from(BOX_COLOR.0[2]);
    let mut overlay = image.clone();
    for (pixel, &m) in overlay.pixels_mut().zip(mask.as_raw()) {
        if m != 0 {
            let blue = (f64::from(pixel.0[2]) + tint).round_ties_even();
            pixel.0[2] = blue.clamp(0.0, 255.0) as u8;
        }
    }
    Ok(overlay)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            class_id: 1,
            class_name: "glioma".to_string(),
            confidence: 0.875,
        }
    }

    #[test]
    fn test_no_detections_returns_identical_copy() {
        let image = RgbImage::from_fn(16, 9, |x, y| Rgb([x as u8, y as u8, 7]));
        assert_eq!(render_detections(&image, &[], None), image);
    }

    #[test]
    fn test_box_is_blue_and_two_pixels_thick() {
        let image = RgbImage::from_pixel(40, 40, Rgb([200, 200, 200]));
        let out = render_detections(&image, &[detection(10, 10, 30, 30)], None);

        assert_eq!(*out.get_pixel(10, 20), BOX_COLOR);
        assert_eq!(*out.get_pixel(11, 20), BOX_COLOR);
        assert_eq!(*out.get_pixel(12, 20), Rgb([200, 200, 200]));
        assert_eq!(*out.get_pixel(20, 30), BOX_COLOR);
        assert_eq!(*out.get_pixel(20, 29), BOX_COLOR);
        assert_eq!(*out.get_pixel(20, 20), Rgb([200, 200, 200]));
        // source untouched
        assert_eq!(*image.get_pixel(10, 20), Rgb([200, 200, 200]));
    }

    #[test]
    fn test_boxes_outside_image_are_clipped() {
        let image = RgbImage::new(10, 10);
        let out = render_detections(
            &image,
            &[detection(-5, -5, 50, 50), detection(3, 3, 3, 3)],
            None,
        );
        assert_eq!(out.dimensions(), (10, 10));
        assert_eq!(*out.get_pixel(3, 3), BOX_COLOR);
        assert_eq!(*out.get_pixel(5, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_inverted_box_is_normalized() {
        let image = RgbImage::new(10, 10);
        let inverted = render_detections(&image, &[detection(8, 6, 4, 2)], None);
        let ordered = render_detections(&image, &[detection(4, 2, 8, 6)], None);

        assert_eq!(inverted, ordered);
        assert_eq!(*inverted.get_pixel(4, 4), BOX_COLOR);
        assert_eq!(*inverted.get_pixel(8, 4), BOX_COLOR);
    }

    #[test]
    fn test_saturated_box_edges_are_clipped_not_walked() {
        let image = RgbImage::new(10, 10);
        let wide = Detection {
            bbox: BoundingBox::from_xyxy_truncated([f32::MIN, 2.0, f32::MAX, 6.0]),
            ..detection(0, 0, 0, 0)
        };
        let out = render_detections(&image, &[wide], None);

        for x in 0..10 {
            assert_eq!(*out.get_pixel(x, 2), BOX_COLOR);
            assert_eq!(*out.get_pixel(x, 6), BOX_COLOR);
        }
        assert_eq!(*out.get_pixel(5, 4), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_label_for_saturated_top_edge() {
        let font = LabelFont::embedded().unwrap();
        let image = RgbImage::new(12, 12);
        let extreme = Detection {
            bbox: BoundingBox::from_xyxy_truncated([0.0, f32::MIN, 4.0, 4.0]),
            ..detection(0, 0, 0, 0)
        };
        let far_left = Detection {
            bbox: BoundingBox::new(i32::MIN, 0, i32::MIN + 5, 4),
            ..detection(0, 0, 0, 0)
        };

        let out = render_detections(&image, &[extreme, far_left], Some(&font));
        assert_eq!(*out.get_pixel(4, 4), BOX_COLOR);
    }

    #[test]
    fn test_overlay_zero_mask_is_identity() {
        let image = RgbImage::from_fn(8, 6, |x, y| Rgb([x as u8 * 10, y as u8 * 20, 33]));
        let mask = BinaryMask::zeros(8, 6);
        assert_eq!(render_overlay(&image, &mask, 0.9).unwrap(), image);
    }

    #[test]
    fn test_overlay_full_mask_adds_blue() {
        let image = RgbImage::from_fn(4, 1, |x, _| Rgb([17, 42, [0, 1, 25, 100][x as usize]]));
        let mask = BinaryMask::from_fn(4, 1, |_, _| true);
        let out = render_overlay(&image, &mask, 0.9).unwrap();

        // b + 229.5, ties to even, saturated
        assert_eq!(out.get_pixel(0, 0).0, [17, 42, 230]);
        assert_eq!(out.get_pixel(1, 0).0, [17, 42, 230]);
        assert_eq!(out.get_pixel(2, 0).0, [17, 42, 254]);
        assert_eq!(out.get_pixel(3, 0).0, [17, 42, 255]);
    }

    #[test]
    fn test_overlay_only_touches_masked_pixels() {
        let image = RgbImage::from_pixel(3, 3, Rgb([5, 6, 7]));
        let mut mask = BinaryMask::zeros(3, 3);
        mask.set(1, 1, true);
        let out = render_overlay(&image, &mask, 0.5).unwrap();

        assert_eq!(out.get_pixel(1, 1).0, [5, 6, 134]);
        assert_eq!(out.get_pixel(0, 0).0, [5, 6, 7]);
    }

    #[test]
    fn test_overlay_dimension_mismatch() {
        let image = RgbImage::new(4, 4);
        let mask = BinaryMask::zeros(4, 3);
        assert!(matches!(
            render_overlay(&image, &mask, 0.9),
            Err(MedsegError::Internal(_))
        ));
    }

    #[test]
    fn test_missing_configured_font_is_error() {
        let err = LabelFont::load(Some(Path::new("/definitely/not/a/font.ttf"))).unwrap_err();
        assert!(matches!(err, MedsegError::Io(_)));
    }

    #[test]
    fn test_embedded_font_is_default() {
        let font = LabelFont::load(None).unwrap();
        assert!(font.source().is_none());
    }

    /// Pixels that differ from `image`, outside the outline of `bbox`
    fn label_pixels(out: &RgbImage, image: &RgbImage, bbox: BoundingBox) -> Vec<(u32, u32)> {
        let on_outline = |x: i32, y: i32| {
            let within = |v: i32, lo: i32, hi: i32| (lo..=hi).contains(&v);
            let near = |v: i32, edge: i32| within(v, edge - 1, edge + 1);
            (within(x, bbox.x1, bbox.x2) && (near(y, bbox.y1 + 1) || near(y, bbox.y2 - 1)))
                || (within(y, bbox.y1, bbox.y2) && (near(x, bbox.x1 + 1) || near(x, bbox.x2 - 1)))
        };
        out.enumerate_pixels()
            .filter(|&(x, y, p)| p != image.get_pixel(x, y) && !on_outline(x as i32, y as i32))
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    #[test]
    fn test_label_sits_above_box() {
        let font = LabelFont::embedded().unwrap();
        let image = RgbImage::from_pixel(160, 90, Rgb([255, 255, 255]));
        let det = detection(10, 50, 150, 85);
        let (text_width, text_height) = text_size(font.scale, &font.font, &det.label());
        let out = render_detections(&image, &[det.clone()], Some(&font));

        let pixels = label_pixels(&out, &image, det.bbox);
        assert!(!pixels.is_empty());
        let baseline = (50 - LABEL_OFFSET) as u32;
        for &(x, y) in &pixels {
            assert!(y <= baseline + 1, "label ink at row {y} below the baseline");
            assert!(y + 1 >= baseline - text_height, "label ink at row {y} above the text box");
            assert!(x >= 10 && x <= 10 + text_width + LABEL_STROKE as u32);
        }
    }

    #[test]
    fn test_label_clamped_to_top_edge() {
        let font = LabelFont::embedded().unwrap();
        let image = RgbImage::from_pixel(160, 90, Rgb([255, 255, 255]));
        let det = detection(10, 4, 150, 85);
        let (_, text_height) = text_size(font.scale, &font.font, &det.label());
        let out = render_detections(&image, &[det.clone()], Some(&font));

        // Unclamped, the text would sit entirely above row 0 and be invisible
        let pixels = label_pixels(&out, &image, det.bbox);
        assert!(!pixels.is_empty());
        assert!(pixels.iter().all(|&(_, y)| y <= text_height + 1));
    }
}
