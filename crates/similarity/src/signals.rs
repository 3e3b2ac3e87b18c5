//! Pure signal extractors. Each returns a score in [0, 1], or `None` when
//! either image lacks what the signal needs.

use std::collections::BTreeSet;

use embedding::cosine_similarity;

use crate::features::ImageFeatures;
use crate::types::SignalKind;

/// Blocks the embedding is pooled into for the spatial signal.
pub const SPATIAL_BLOCKS: usize = 16;

const ASPECT_WEIGHT: f64 = 0.6;
const RESOLUTION_WEIGHT: f64 = 0.4;

pub fn extract(kind: SignalKind, a: &ImageFeatures, b: &ImageFeatures) -> Option<f64> {
    match kind {
        SignalKind::Spatial => spatial(a, b),
        SignalKind::Feature => feature(a, b),
        SignalKind::Semantic => semantic(a, b),
        SignalKind::Composition => composition(a, b),
        SignalKind::Background => background(a, b),
    }
}

/// Coarse layout agreement: cosine of the block-mean-pooled embeddings.
pub fn spatial(a: &ImageFeatures, b: &ImageFeatures) -> Option<f64> {
    let (ea, eb) = (a.embedding.as_deref()?, b.embedding.as_deref()?);
    if ea.len() != eb.len() {
        return None;
    }
    let (pa, pb) = (block_mean_pool(ea, SPATIAL_BLOCKS), block_mean_pool(eb, SPATIAL_BLOCKS));
    cosine_similarity(&pa, &pb).map(unit_interval)
}

/// Fine-grained appearance agreement: cosine of the full embeddings.
pub fn feature(a: &ImageFeatures, b: &ImageFeatures) -> Option<f64> {
    let (ea, eb) = (a.embedding.as_deref()?, b.embedding.as_deref()?);
    cosine_similarity(ea, eb).map(unit_interval)
}

pub fn semantic(a: &ImageFeatures, b: &ImageFeatures) -> Option<f64> {
    Some(jaccard(a.labels.as_ref()?, b.labels.as_ref()?))
}

/// Aspect-ratio and resolution agreement.
pub fn composition(a: &ImageFeatures, b: &ImageFeatures) -> Option<f64> {
    let (wa, ha) = a.dimensions?;
    let (wb, hb) = b.dimensions?;

    let aspect = ratio_agreement(wa as f64 / ha as f64, wb as f64 / hb as f64);
    let resolution = ratio_agreement(wa as f64 * ha as f64, wb as f64 * hb as f64);
    Some((ASPECT_WEIGHT * aspect + RESOLUTION_WEIGHT * resolution).clamp(0.0, 1.0))
}

pub fn background(a: &ImageFeatures, b: &ImageFeatures) -> Option<f64> {
    Some(jaccard(a.background.as_ref()?, b.background.as_ref()?))
}

fn unit_interval(cosine: f32) -> f64 {
    (cosine as f64).clamp(0.0, 1.0)
}

/// `min / max` of two positive quantities; 1 when equal.
fn ratio_agreement(x: f64, y: f64) -> f64 {
    let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
    if hi <= 0.0 {
        return 0.0;
    }
    lo / hi
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Mean of each of `blocks` contiguous slices; vectors shorter than `blocks`
/// are returned as-is.
fn block_mean_pool(v: &[f32], blocks: usize) -> Vec<f32> {
    if v.len() <= blocks {
        return v.to_vec();
    }
    let width = v.len().div_ceil(blocks);
    v.chunks(width)
        .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
        .collect()
}
