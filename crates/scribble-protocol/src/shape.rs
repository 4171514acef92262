//! Shape and draft payloads.
//!
//! Shapes are the committed entities of a room's history. The core only
//! relies on a shape's `id`; geometry and style travel through untouched.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a shape or draft identifier.
pub const MAX_ID_LENGTH: usize = 64;

/// Maximum number of coordinates (not pairs) in a line or draft.
pub const MAX_POINTS: usize = 20_000;

/// Maximum text length in bytes.
pub const MAX_TEXT_LENGTH: usize = 16 * 1024;

/// A shape identifier.
pub type ShapeId = String;

/// A draft identifier. Drafts are finalized into shapes with the same id.
pub type DraftId = String;

/// Validation failures for shapes and drafts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("id cannot be empty")]
    EmptyId,

    #[error("id length {0} exceeds maximum {MAX_ID_LENGTH}")]
    IdTooLong(usize),

    #[error("field `{0}` is not a finite number")]
    NonFinite(&'static str),

    #[error("points must be x,y pairs (got {0} values)")]
    OddPoints(usize),

    #[error("{0} points exceeds maximum {MAX_POINTS}")]
    TooManyPoints(usize),

    #[error("text length {0} exceeds maximum {MAX_TEXT_LENGTH}")]
    TextTooLong(usize),

    #[error("field `{0}` cannot be negative")]
    Negative(&'static str),
}

fn validate_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(ValidationError::IdTooLong(id.len()));
    }
    Ok(())
}

fn validate_finite(name: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFinite(name))
    }
}

fn validate_points(points: &[f64]) -> Result<(), ValidationError> {
    if points.len() > MAX_POINTS {
        return Err(ValidationError::TooManyPoints(points.len()));
    }
    if points.len() % 2 != 0 {
        return Err(ValidationError::OddPoints(points.len()));
    }
    if points.iter().any(|p| !p.is_finite()) {
        return Err(ValidationError::NonFinite("points"));
    }
    Ok(())
}

fn validate_stroke_width(value: f64) -> Result<(), ValidationError> {
    validate_finite("strokeWidth", value)?;
    if value < 0.0 {
        return Err(ValidationError::Negative("strokeWidth"));
    }
    Ok(())
}

/// Discriminant of a [`Shape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    Line,
    Text,
}

impl ShapeKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeKind::Line => "line",
            ShapeKind::Text => "text",
        }
    }
}

/// A freehand stroke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineShape {
    pub id: ShapeId,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub rotation: f64,
    /// Flat list of x,y coordinates relative to `x`/`y`.
    pub points: Vec<f64>,
    pub stroke: String,
    pub stroke_width: f64,
    #[serde(default)]
    pub tension: f64,
    #[serde(default)]
    pub is_eraser: bool,
}

/// A text element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextShape {
    pub id: ShapeId,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub rotation: f64,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// A committed drawable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    Line(LineShape),
    Text(TextShape),
}

impl Shape {
    /// Get the shape identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Shape::Line(line) => &line.id,
            Shape::Text(text) => &text.id,
        }
    }

    /// Get the shape kind.
    #[must_use]
    pub fn kind(&self) -> ShapeKind {
        match self {
            Shape::Line(_) => ShapeKind::Line,
            Shape::Text(_) => ShapeKind::Text,
        }
    }

    /// Check that the shape is well formed before it enters a room's history.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_id(self.id())?;

        let (x, y, width, height, rotation) = match self {
            Shape::Line(l) => (l.x, l.y, l.width, l.height, l.rotation),
            Shape::Text(t) => (t.x, t.y, t.width, t.height, t.rotation),
        };
        validate_finite("x", x)?;
        validate_finite("y", y)?;
        validate_finite("width", width)?;
        validate_finite("height", height)?;
        validate_finite("rotation", rotation)?;

        match self {
            Shape::Line(line) => {
                validate_points(&line.points)?;
                validate_stroke_width(line.stroke_width)?;
                validate_finite("tension", line.tension)?;
            }
            Shape::Text(text) => {
                if text.value.len() > MAX_TEXT_LENGTH {
                    return Err(ValidationError::TextTooLong(text.value.len()));
                }
                if let Some(size) = text.font_size {
                    validate_finite("fontSize", size)?;
                }
                if let Some(height) = text.line_height {
                    validate_finite("lineHeight", height)?;
                }
            }
        }

        Ok(())
    }
}

impl From<LineShape> for Shape {
    fn from(line: LineShape) -> Self {
        Shape::Line(line)
    }
}

impl From<TextShape> for Shape {
    fn from(text: TextShape) -> Self {
        Shape::Text(text)
    }
}

/// Stroke style of an in-progress draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftStyle {
    pub stroke: String,
    pub stroke_width: f64,
}

/// An in-progress stroke preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: DraftId,
    pub points: Vec<f64>,
    pub style: DraftStyle,
}

impl Draft {
    /// Create a new draft.
    #[must_use]
    pub fn new(id: impl Into<DraftId>, points: Vec<f64>, style: DraftStyle) -> Self {
        Self {
            id: id.into(),
            points,
            style,
        }
    }

    /// Check that the draft is well formed before it is relayed.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_id(&self.id)?;
        validate_points(&self.points)?;
        validate_stroke_width(self.style.stroke_width)
    }
}
