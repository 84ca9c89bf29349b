//! Dimension and aspect-ratio normalisation.

use tracing::debug;

use crate::error::{Error, Result};

/// Aspect ratios accepted by the image-capable Gemini models.
pub const GEMINI_ASPECT_RATIOS: &[&str] = &[
    "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "9:16", "16:9", "21:9",
];

/// Parse `W:H` (also `WxH`, `W*H`, `W/H`) into a positive ratio.
pub fn parse_ratio(ratio: &str) -> Result<f64> {
    let (w, h) = ratio
        .split_once([':', 'x', '*', '/'])
        .ok_or_else(|| Error::validation(format!("invalid aspect ratio '{}'", ratio)))?;
    let w: f64 = w
        .trim()
        .parse()
        .map_err(|_| Error::validation(format!("invalid aspect ratio '{}'", ratio)))?;
    let h: f64 = h
        .trim()
        .parse()
        .map_err(|_| Error::validation(format!("invalid aspect ratio '{}'", ratio)))?;
    if w <= 0.0 || h <= 0.0 || !w.is_finite() || !h.is_finite() {
        return Err(Error::validation(format!("invalid aspect ratio '{}'", ratio)));
    }
    Ok(w / h)
}

/// Nearest allowed ratio, compared on a log scale so 2:1 and 1:2 are
/// equally far from 1:1.
pub fn snap_aspect_ratio(ratio: f64, allowed: &[&'static str]) -> Option<&'static str> {
    allowed
        .iter()
        .filter_map(|candidate| parse_ratio(candidate).ok().map(|r| (*candidate, r)))
        .min_by(|(_, a), (_, b)| {
            let da = (a.ln() - ratio.ln()).abs();
            let db = (b.ln() - ratio.ln()).abs();
            da.total_cmp(&db)
        })
        .map(|(candidate, _)| candidate)
}

/// Snap a user-supplied ratio string, or a width/height pair, to `allowed`.
pub fn resolve_aspect_ratio(
    requested: Option<&str>,
    width: Option<u32>,
    height: Option<u32>,
    allowed: &[&'static str],
) -> Result<Option<&'static str>> {
    let ratio = match (requested.map(str::trim), width, height) {
        (Some(r), _, _) if !r.is_empty() && !r.eq_ignore_ascii_case("default") => parse_ratio(r)?,
        (_, Some(w), Some(h)) if w > 0 && h > 0 => w as f64 / h as f64,
        _ => return Ok(None),
    };
    let snapped = snap_aspect_ratio(ratio, allowed);
    debug!(ratio, ?snapped, "Snapped aspect ratio");
    Ok(snapped)
}

/// Clamp `value` into `[min, max]` and round to the nearest multiple of `step`.
pub fn snap_dimension(value: u32, min: u32, max: u32, step: u32) -> u32 {
    let clamped = value.clamp(min, max);
    if step <= 1 {
        return clamped;
    }
    let down = clamped / step * step;
    let up = down + step;
    let nearest = if clamped - down < up - clamped { down } else { up };
    // Stay inside the range even when min/max are not multiples of step
    if nearest > max {
        down.max(min)
    } else if nearest < min {
        up.min(max)
    } else {
        nearest
    }
}

/// `clamp` for floats that also maps NaN to the lower bound.
pub fn clamp_f32(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}
