//! Shared fixtures for the Scribble benchmarks.

use scribble_protocol::{Draft, DraftStyle, LineShape, Shape};

/// A line shape with `pairs` points.
#[must_use]
pub fn line(id: &str, pairs: usize) -> Shape {
    let points = (0..pairs)
        .flat_map(|i| {
            let t = i as f64;
            [t, (t * 0.1).sin() * 50.0]
        })
        .collect();

    Shape::Line(LineShape {
        id: id.to_string(),
        x: 0.0,
        y: 0.0,
        width: pairs as f64,
        height: 100.0,
        rotation: 0.0,
        points,
        stroke: "#1971c2".to_string(),
        stroke_width: 5.0,
        tension: 0.5,
        is_eraser: false,
    })
}

/// A draft with `pairs` points.
#[must_use]
pub fn draft(id: &str, pairs: usize) -> Draft {
    let points = (0..pairs * 2).map(|i| i as f64).collect();
    Draft::new(
        id,
        points,
        DraftStyle {
            stroke: "#2f9e44".to_string(),
            stroke_width: 3.0,
        },
    )
}
