//! Variant selection: sticky reuse first, weighted random draw otherwise.
use campaign::{Campaign, Variant};
use uuid::Uuid;

use crate::rules::Rejection;
use crate::types::PriorSelection;

/// Source of uniform draws in `0..=100`.
pub trait VariantDraw: Send + Sync {
    fn draw(&self) -> u8;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomDraw;

impl VariantDraw for RandomDraw {
    fn draw(&self) -> u8 {
        fastrand::u8(0..=100)
    }
}

/// Always returns the same value.
#[derive(Debug, Clone, Copy)]
pub struct FixedDraw(pub u8);

impl VariantDraw for FixedDraw {
    fn draw(&self) -> u8 {
        self.0.min(100)
    }
}

/// How the variant was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    /// Reused the variant id the client reported.
    Sticky,
    /// Older clients only report the banner id.
    LegacyBanner,
    Drawn,
}

#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    pub variant: &'a Variant,
    pub source: SelectionSource,
}

/// Walk `(variant, proportion)` pairs in order, accumulating proportions, and
/// return the first variant whose running total reaches `draw`.
///
/// Zero-proportion variants are never picked. When the proportions sum to
/// less than the draw, the last variant with a positive proportion absorbs
/// the remainder. `None` only when no variant has a positive proportion.
/// A plain cumulative walk would hand draw 0 to a leading zero-proportion
/// variant; skipping it is deliberate (DESIGN.md, decision 4).
pub fn weighted_pick(mapping: &[(Uuid, u8)], draw: u8) -> Option<Uuid> {
    let mut cumulative: u32 = 0;
    let mut last_positive = None;
    for &(id, proportion) in mapping {
        if proportion == 0 {
            continue;
        }
        cumulative += u32::from(proportion);
        last_positive = Some(id);
        if cumulative >= u32::from(draw) {
            return Some(id);
        }
    }
    last_positive
}

pub fn select_variant<'a>(
    campaign: &'a Campaign,
    prior: Option<&PriorSelection>,
    draw: &dyn VariantDraw,
) -> Result<Selection<'a>, Rejection> {
    if let Some(prior) = prior {
        if let Some(variant) = prior.variant_id.and_then(|id| campaign.variant(id)) {
            return Ok(Selection {
                variant,
                source: SelectionSource::Sticky,
            });
        }
        if prior.variant_id.is_none() {
            if let Some(variant) = prior.banner_id.and_then(|id| campaign.variant_for_banner(id)) {
                return Ok(Selection {
                    variant,
                    source: SelectionSource::LegacyBanner,
                });
            }
        }
    }

    let picked = weighted_pick(&campaign.proportion_mapping(), draw.draw())
        .and_then(|id| campaign.variant(id))
        .ok_or(Rejection::UnresolvableVariant)?;
    Ok(Selection {
        variant: picked,
        source: SelectionSource::Drawn,
    })
}
