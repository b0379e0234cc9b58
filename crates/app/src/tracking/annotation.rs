//! CPU drawing of landmark overlays onto RGB frames.
//!
//! Every call returns a fresh image; the input frame is never touched. Several
//! variants compose by feeding the output of one call into the next.

use image::{Rgb, RgbImage};
use ml_core::{DetectionResult, DetectorVariant, Landmark, LandmarkSet};

/// How the points of one landmark are coloured.
#[derive(Clone, Copy, Debug)]
pub enum PointColors {
    /// No point markers are drawn.
    None,
    /// Colour chosen from the landmark index.
    ByIndex(fn(usize) -> Rgb<u8>),
}

#[derive(Clone, Copy, Debug)]
pub struct LabelStyle {
    pub color: Rgb<u8>,
    /// Glyph cell multiplier over the 5x7 base font.
    pub scale: u32,
    /// Gap in pixels between the bounding box top and the label.
    pub margin: i32,
}

#[derive(Clone, Copy, Debug)]
pub struct AnnotationStyle {
    pub connection_color: Rgb<u8>,
    pub connection_thickness: u32,
    pub points: PointColors,
    pub point_radius: u32,
    /// Side label drawn above each instance; only hands carry one.
    pub label: Option<LabelStyle>,
}

const WHITE: Rgb<u8> = Rgb([224, 224, 224]);

fn hand_point_color(index: usize) -> Rgb<u8> {
    match index {
        0 | 1 | 5 | 9 | 13 | 17 => Rgb([255, 48, 48]),
        2..=4 => Rgb([255, 229, 180]),
        6..=8 => Rgb([128, 64, 128]),
        10..=12 => Rgb([255, 204, 0]),
        14..=16 => Rgb([48, 255, 48]),
        _ => Rgb([21, 101, 192]),
    }
}

fn pose_point_color(index: usize) -> Rgb<u8> {
    let name = DetectorVariant::Pose
        .landmark_names()
        .get(index)
        .copied()
        .unwrap_or("");
    if name.contains("LEFT") {
        Rgb([255, 138, 0])
    } else if name.contains("RIGHT") {
        Rgb([0, 217, 231])
    } else {
        WHITE
    }
}

pub const HAND_STYLE: AnnotationStyle = AnnotationStyle {
    connection_color: WHITE,
    connection_thickness: 2,
    points: PointColors::ByIndex(hand_point_color),
    point_radius: 4,
    label: Some(LabelStyle {
        color: Rgb([54, 205, 88]),
        scale: 3,
        margin: 10,
    }),
};

pub const FACE_STYLE: AnnotationStyle = AnnotationStyle {
    connection_color: Rgb([255, 204, 0]),
    connection_thickness: 1,
    points: PointColors::None,
    point_radius: 0,
    label: None,
};

pub const POSE_STYLE: AnnotationStyle = AnnotationStyle {
    connection_color: WHITE,
    connection_thickness: 2,
    points: PointColors::ByIndex(pose_point_color),
    point_radius: 3,
    label: None,
};

/// Drawing style of `variant`, resolved once per detector slot.
pub fn style_for(variant: DetectorVariant) -> &'static AnnotationStyle {
    match variant {
        DetectorVariant::Hands => &HAND_STYLE,
        DetectorVariant::Face => &FACE_STYLE,
        DetectorVariant::Pose => &POSE_STYLE,
    }
}

/// Draw `result` over a copy of `base` with the variant's default style.
pub fn annotate(base: &RgbImage, result: &DetectionResult) -> RgbImage {
    annotate_with(base, result, style_for(result.variant))
}

pub fn annotate_with(
    base: &RgbImage,
    result: &DetectionResult,
    style: &AnnotationStyle,
) -> RgbImage {
    let mut image = base.clone();
    let connections = result.variant.connections();
    for set in &result.sets {
        draw_set(&mut image, set, connections, style);
    }
    image
}

fn to_pixel(point: &Landmark, width: u32, height: u32) -> Option<(i32, i32)> {
    if !point.in_frame() {
        return None;
    }
    let x = (point.x * width as f32).floor().min(width.saturating_sub(1) as f32);
    let y = (point.y * height as f32).floor().min(height.saturating_sub(1) as f32);
    Some((x as i32, y as i32))
}

fn draw_set(
    image: &mut RgbImage,
    set: &LandmarkSet,
    connections: &[(usize, usize)],
    style: &AnnotationStyle,
) {
    let (width, height) = image.dimensions();
    let pixels: Vec<Option<(i32, i32)>> = set
        .image
        .iter()
        .map(|point| to_pixel(point, width, height))
        .collect();

    for &(start, end) in connections {
        if let (Some(Some(a)), Some(Some(b))) = (pixels.get(start), pixels.get(end)) {
            draw_line(image, *a, *b, style.connection_color, style.connection_thickness);
        }
    }

    if style.point_radius > 0 {
        for (index, pixel) in pixels.iter().enumerate() {
            let Some((x, y)) = *pixel else { continue };
            let color = match style.points {
                PointColors::None => continue,
                PointColors::ByIndex(pick) => pick(index),
            };
            fill_circle(image, x, y, style.point_radius as i32, color);
        }
    }

    if let (Some(label), Some(side)) = (style.label, set.side) {
        if let Some((min_x, min_y, _, _)) = set.bounding_box() {
            let x = (min_x * width as f32) as i32;
            let glyph_height = 7 * label.scale as i32;
            let y = (min_y * height as f32) as i32 - label.margin - glyph_height;
            draw_label(image, x, y, side.label(), label.color, label.scale);
        }
    }
}

fn put_pixel(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

fn fill_circle(image: &mut RgbImage, cx: i32, cy: i32, radius: i32, color: Rgb<u8>) {
    let r2 = radius * radius;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= r2 {
                put_pixel(image, cx + dx, cy + dy, color);
            }
        }
    }
}

/// Bresenham line; thicker lines stamp a disc at every step.
fn draw_line(image: &mut RgbImage, from: (i32, i32), to: (i32, i32), color: Rgb<u8>, thickness: u32) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness as i32) / 2;

    loop {
        if radius == 0 {
            put_pixel(image, x, y, color);
        } else {
            fill_circle(image, x, y, radius, color);
        }
        if (x, y) == to {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>, scale: u32) {
    let scale = scale.max(1) as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col * scale;
                        let py = y + row as i32 * scale;
                        for sy in 0..scale {
                            for sx in 0..scale {
                                put_pixel(image, px + sx, py + sy, color);
                            }
                        }
                    }
                }
            }
        }
        x += 6 * scale;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'E' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'F' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000,
        ]),
        'G' => Some([
            0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111,
        ]),
        'H' => Some([
            0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'I' => Some([
            0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        'L' => Some([
            0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'R' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001,
        ]),
        'T' => Some([
            0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        ' ' => Some([0; 7]),
        _ => None,
    }
}
