//! Page geometry: normalized dimensions, scale, and margins for PDF capture.
//!
//! Callers supply CSS-pixel dimensions and CSS length margins; the print
//! command of the rendering engine wants inches, so everything normalizes
//! through the 96 px/in CSS reference pixel.

use serde::Deserialize;
use thiserror::Error;

/// CSS reference pixels per inch.
const PX_PER_INCH: f64 = 96.0;

/// Fallback page edge in CSS pixels when a dimension is absent or falsy.
pub const DEFAULT_PAGE_EDGE_PX: f64 = 1200.0;

/// Scale bounds accepted by the rendering engine's print command.
pub const MIN_SCALE: f64 = 0.1;
pub const MAX_SCALE: f64 = 2.0;

const DEFAULT_MARGIN_TOP: &str = "25px";
const DEFAULT_MARGIN_LEFT: &str = "10px";
const DEFAULT_MARGIN_RIGHT: &str = "10px";

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("invalid margin `{field}`: {reason}")]
    Margin { field: &'static str, reason: String },
}

/// Margins requested on the wire: CSS length strings, top/left/right only.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MarginSpec {
    pub top: Option<String>,
    pub left: Option<String>,
    pub right: Option<String>,
}

/// Normalized margins in inches. The bottom edge is not part of the wire
/// contract and always renders as zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub top: f64,
    pub left: f64,
    pub right: f64,
}

/// Fully-normalized page geometry, ready to pass to the print command.
#[derive(Debug, Clone, PartialEq)]
pub struct PageGeometry {
    width_px: f64,
    height_px: f64,
    scale: f64,
    margins: Margins,
}

impl PageGeometry {
    /// Normalize raw request fields into a valid geometry.
    ///
    /// Absent, zero, negative, or non-finite width/height resolve to
    /// [`DEFAULT_PAGE_EDGE_PX`]; absent or falsy scale resolves to 1.0 and is
    /// otherwise clamped into `[MIN_SCALE, MAX_SCALE]`; absent margins take
    /// the fixed defaults.
    pub fn resolve(
        width: Option<f64>,
        height: Option<f64>,
        scale: Option<f64>,
        margin: Option<MarginSpec>,
    ) -> Result<Self, GeometryError> {
        let width_px = resolve_edge(width);
        let height_px = resolve_edge(height);
        let scale = resolve_scale(scale);

        let spec = margin.unwrap_or_default();
        let margins = Margins {
            top: resolve_margin(spec.top.as_deref(), DEFAULT_MARGIN_TOP, "top")?,
            left: resolve_margin(spec.left.as_deref(), DEFAULT_MARGIN_LEFT, "left")?,
            right: resolve_margin(spec.right.as_deref(), DEFAULT_MARGIN_RIGHT, "right")?,
        };

        Ok(Self {
            width_px,
            height_px,
            scale,
            margins,
        })
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn paper_width_inches(&self) -> f64 {
        self.width_px / PX_PER_INCH
    }

    pub fn paper_height_inches(&self) -> f64 {
        self.height_px / PX_PER_INCH
    }

    pub fn margins(&self) -> Margins {
        self.margins
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self {
            width_px: DEFAULT_PAGE_EDGE_PX,
            height_px: DEFAULT_PAGE_EDGE_PX,
            scale: 1.0,
            margins: Margins {
                top: 25.0 / PX_PER_INCH,
                left: 10.0 / PX_PER_INCH,
                right: 10.0 / PX_PER_INCH,
            },
        }
    }
}

fn resolve_edge(value: Option<f64>) -> f64 {
    match value {
        Some(edge) if edge.is_finite() && edge > 0.0 => edge,
        _ => DEFAULT_PAGE_EDGE_PX,
    }
}

fn resolve_scale(value: Option<f64>) -> f64 {
    match value {
        Some(scale) if scale.is_finite() && scale != 0.0 => scale.clamp(MIN_SCALE, MAX_SCALE),
        _ => 1.0,
    }
}

fn resolve_margin(
    value: Option<&str>,
    fallback: &str,
    field: &'static str,
) -> Result<f64, GeometryError> {
    let raw = value.unwrap_or(fallback);
    parse_css_length(raw).map_err(|reason| GeometryError::Margin { field, reason })
}

/// Parse a CSS length into inches. Bare numbers are pixels; `px`, `in`, `cm`,
/// and `mm` suffixes are accepted. Negative lengths are rejected.
fn parse_css_length(raw: &str) -> Result<f64, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("length must not be empty".to_string());
    }

    let (magnitude, per_inch) = match trimmed {
        value if value.ends_with("px") => (&value[..value.len() - 2], PX_PER_INCH),
        value if value.ends_with("in") => (&value[..value.len() - 2], 1.0),
        value if value.ends_with("cm") => (&value[..value.len() - 2], 2.54),
        value if value.ends_with("mm") => (&value[..value.len() - 2], 25.4),
        value => (value, PX_PER_INCH),
    };

    let parsed: f64 = magnitude
        .trim()
        .parse()
        .map_err(|_| format!("`{trimmed}` is not a valid length"))?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err(format!("`{trimmed}` must be a non-negative length"));
    }

    Ok(parsed / per_inch)
}
