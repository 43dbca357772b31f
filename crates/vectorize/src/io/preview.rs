use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};

use crate::types::{ArcShape, DetectionResult, PixelBuffer, PixelFormat};

const LINE_COLOR: Rgba<u8> = Rgba([220, 30, 30, 255]);
const CIRCLE_COLOR: Rgba<u8> = Rgba([30, 90, 220, 255]);
const ARC_COLOR: Rgba<u8> = Rgba([20, 160, 60, 255]);
const ELLIPSE_SAMPLES: usize = 72;

/// Source raster washed out to half intensity with the detected primitives
/// drawn on top: lines red, circles blue, ellipses and polylines green.
pub fn render_preview(buffer: &PixelBuffer, result: &DetectionResult) -> RgbaImage {
    let mut canvas = washed_out(buffer);

    for line in &result.lines {
        draw_polyline(&mut canvas, &[line.start, line.end], false, LINE_COLOR);
    }
    for circle in &result.circles {
        if circle.center.iter().all(|v| v.is_finite()) && circle.radius.is_finite() {
            draw_hollow_circle_mut(
                &mut canvas,
                (circle.center[0].round() as i32, circle.center[1].round() as i32),
                circle.radius.round().max(1.0) as i32,
                CIRCLE_COLOR,
            );
        }
    }
    for arc in &result.arcs {
        match arc {
            ArcShape::Ellipse(e) if e.is_valid() => {
                draw_polyline(&mut canvas, &e.sample_points(ELLIPSE_SAMPLES), true, ARC_COLOR)
            }
            ArcShape::Ellipse(_) => {}
            ArcShape::Polyline(p) => draw_polyline(&mut canvas, &p.points, p.closed, ARC_COLOR),
        }
    }

    canvas
}

fn washed_out(buffer: &PixelBuffer) -> RgbaImage {
    let lighten = |v: u8| 128 + v / 2;
    let pixels: Vec<u8> = match buffer.format() {
        PixelFormat::Gray => buffer
            .as_raw()
            .iter()
            .flat_map(|&v| {
                let l = lighten(v);
                [l, l, l, 255]
            })
            .collect(),
        PixelFormat::Rgba => buffer
            .as_raw()
            .chunks_exact(4)
            .flat_map(|px| [lighten(px[0]), lighten(px[1]), lighten(px[2]), 255])
            .collect(),
    };
    RgbaImage::from_raw(buffer.width(), buffer.height(), pixels)
        .unwrap_or_else(|| RgbaImage::new(buffer.width(), buffer.height()))
}

fn draw_polyline(canvas: &mut RgbaImage, points: &[[f64; 2]], closed: bool, color: Rgba<u8>) {
    if points.iter().any(|p| !p[0].is_finite() || !p[1].is_finite()) {
        return;
    }
    let as_f32 = |p: [f64; 2]| (p[0] as f32, p[1] as f32);
    for pair in points.windows(2) {
        draw_line_segment_mut(canvas, as_f32(pair[0]), as_f32(pair[1]), color);
    }
    if closed && points.len() > 2 {
        if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
            draw_line_segment_mut(canvas, as_f32(last), as_f32(first), color);
        }
    }
}
