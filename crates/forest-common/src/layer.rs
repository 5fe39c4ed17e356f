//! Data layers of the forest-change dataset and their masking rules.

use crate::error::{ParamError, ParamResult};

/// First year covered by the dataset (tree cover baseline).
pub const FIRST_YEAR: u16 = 2000;

/// Last year with recorded loss.
pub const LAST_YEAR: u16 = 2023;

/// Source layer holding percent tree canopy cover in 2000.
pub const TREECOVER_LAYER: &str = "treecover2000";

/// Source layer holding the year of loss, encoded as `year - 2000` (0 = no loss).
pub const LOSSYEAR_LAYER: &str = "lossyear";

/// A requested data layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSpec {
    /// Canopy cover, hidden where loss occurred on or before `target_year`.
    TreeCover2000 { target_year: u16 },

    /// Binary forest mask: cover at or above `min_forest_cover`, minus loss up to `target_year`.
    ForestCover { target_year: u16, min_forest_cover: u8 },

    /// Any other source layer, rendered as stored.
    Passthrough { name: String },
}

impl LayerSpec {
    /// Build a layer from request parameters.
    pub fn parse(name: &str, year: Option<u16>, min_forest_cover: Option<u8>) -> ParamResult<Self> {
        match name {
            TREECOVER_LAYER => Ok(LayerSpec::TreeCover2000 {
                target_year: require_year(year)?,
            }),
            "forest_cover" => {
                let target_year = require_year(year)?;
                let min_forest_cover =
                    min_forest_cover.ok_or_else(|| ParamError::missing("min_forest_cover"))?;
                if !(1..=99).contains(&min_forest_cover) {
                    return Err(ParamError::invalid(
                        "min_forest_cover",
                        format!("{min_forest_cover} is outside 1-99"),
                    ));
                }
                Ok(LayerSpec::ForestCover {
                    target_year,
                    min_forest_cover,
                })
            }
            other => {
                if other.is_empty()
                    || !other
                        .bytes()
                        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
                {
                    return Err(ParamError::invalid(
                        "layer",
                        format!("'{other}' is not a valid layer name"),
                    ));
                }
                Ok(LayerSpec::Passthrough {
                    name: other.to_string(),
                })
            }
        }
    }

    /// Layer name as used in requests.
    pub fn name(&self) -> &str {
        match self {
            LayerSpec::TreeCover2000 { .. } => TREECOVER_LAYER,
            LayerSpec::ForestCover { .. } => "forest_cover",
            LayerSpec::Passthrough { name } => name,
        }
    }

    /// The raster layer read as band A.
    pub fn source_layer(&self) -> &str {
        match self {
            LayerSpec::TreeCover2000 { .. } | LayerSpec::ForestCover { .. } => TREECOVER_LAYER,
            LayerSpec::Passthrough { name } => name,
        }
    }

    /// Masking rule for maskable layers; None for passthrough layers.
    pub fn mask_rule(&self) -> Option<MaskRule> {
        match *self {
            LayerSpec::TreeCover2000 { target_year } => Some(MaskRule {
                target_year,
                min_forest_cover: None,
            }),
            LayerSpec::ForestCover {
                target_year,
                min_forest_cover,
            } => Some(MaskRule {
                target_year,
                min_forest_cover: Some(min_forest_cover),
            }),
            LayerSpec::Passthrough { .. } => None,
        }
    }

    pub fn is_maskable(&self) -> bool {
        self.mask_rule().is_some()
    }
}

fn require_year(year: Option<u16>) -> ParamResult<u16> {
    let year = year.ok_or_else(|| ParamError::missing("year"))?;
    if !(FIRST_YEAR..=LAST_YEAR).contains(&year) {
        return Err(ParamError::invalid(
            "year",
            format!("{year} is outside {FIRST_YEAR}-{LAST_YEAR}"),
        ));
    }
    Ok(year)
}

/// Pixelwise rule combining a cover band A with a loss-year band B.
///
/// Without a threshold the output keeps A where the pixel survived to
/// `target_year`; with a threshold it is 1 where A meets the threshold and the
/// pixel survived, else 0. A pixel survives when B is 0 (never lost) or B is
/// after the target year offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskRule {
    pub target_year: u16,
    pub min_forest_cover: Option<u8>,
}

impl MaskRule {
    /// Binary forest rule used by the yearly analysis sweep.
    pub fn forest_cover(target_year: u16, min_forest_cover: u8) -> Self {
        Self {
            target_year,
            min_forest_cover: Some(min_forest_cover),
        }
    }

    /// Loss-year band value for the target year.
    pub fn year_offset(&self) -> i32 {
        i32::from(self.target_year) - i32::from(FIRST_YEAR)
    }

    /// Band-algebra expression over inputs `A` (cover) and `B` (loss year).
    pub fn formula(&self) -> String {
        let survived = format!("logical_or(B==0,B>{})", self.year_offset());
        match self.min_forest_cover {
            Some(threshold) => format!("(A>={threshold})*{survived}"),
            None => format!("A*{survived}"),
        }
    }

    /// Evaluate the rule for one pixel, mirroring `formula`.
    pub fn evaluate(&self, cover: u8, loss_year: u8) -> u8 {
        let survived = loss_year == 0 || i32::from(loss_year) > self.year_offset();
        if !survived {
            return 0;
        }
        match self.min_forest_cover {
            Some(threshold) => u8::from(cover >= threshold),
            None => cover,
        }
    }
}
