//! Palettes and the value-to-color relief table built from them.

use std::fmt::Write as _;
use std::str::FromStr;

use crate::error::{ParamError, ParamResult};

/// An opaque RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl FromStr for Color {
    type Err = ParamError;

    /// Accepts `#RGB`, `#RRGGBB`, `#RRGGBBAA` (the `#` is optional) and any
    /// CSS color: the full named-color set plus `rgb()`/`hsl()` notation.
    /// Alpha is dropped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        parse_hex_color(trimmed)
            .or_else(|| css_color(trimmed))
            .ok_or_else(|| ParamError::InvalidColor(s.to_string()))
    }
}

fn parse_hex_color(s: &str) -> Option<Color> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();

    match hex.len() {
        3 => {
            let short = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
            Some(Color::rgb(short(0)?, short(1)?, short(2)?))
        }
        6 | 8 => Some(Color::rgb(channel(0)?, channel(2)?, channel(4)?)),
        _ => None,
    }
}

fn css_color(s: &str) -> Option<Color> {
    let [r, g, b, _] = csscolorparser::parse(s).ok()?.to_rgba8();
    Some(Color::rgb(r, g, b))
}

/// Ordered colors spread linearly over `[min, max]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PaletteSpec {
    pub colors: Vec<Color>,
    pub min: f64,
    pub max: f64,
}

impl PaletteSpec {
    /// Build from a comma-separated color list and numeric range.
    pub fn parse(palette: &str, min: f64, max: f64) -> ParamResult<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(ParamError::invalid("min/max", "range must be finite"));
        }
        let colors = palette
            .split(',')
            .filter(|c| !c.trim().is_empty())
            .map(Color::from_str)
            .collect::<ParamResult<Vec<_>>>()?;
        if colors.len() < 2 {
            return Err(ParamError::invalid(
                "palette",
                "at least two colors are required",
            ));
        }
        Ok(Self { colors, min, max })
    }

    /// Value step between consecutive colors: `|min - max| / (count - 1)`.
    pub fn interval(&self) -> f64 {
        (self.min - self.max).abs() / (self.colors.len() - 1) as f64
    }

    /// Value assigned to the color at `index`.
    pub fn value_at(&self, index: usize) -> f64 {
        self.min + self.interval() * index as f64
    }

    /// Color relief table: one `value R G B` line per palette entry, in order.
    pub fn color_map(&self) -> String {
        let mut table = String::new();
        for (index, color) in self.colors.iter().enumerate() {
            if index > 0 {
                table.push('\n');
            }
            let _ = write!(
                table,
                "{} {} {} {}",
                self.value_at(index),
                color.r,
                color.g,
                color.b
            );
        }
        table
    }
}
