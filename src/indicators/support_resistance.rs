//! Support/resistance levels extracted as local minima of a triangular-smoothed volume profile.

use crate::indicators::volume_profile::VolumeLevel;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SupportResistanceLine {
    pub price: f64,
    pub width: f64,
    pub extend: &'static str,
    pub color: &'static str,
    pub style: &'static str,
}

/// Triangular-weighted moving average with boundary-clamped edges.
pub fn smooth_triangular(values: &[f64], window_size: usize) -> Vec<f64> {
    let w = if window_size % 2 == 1 { window_size.max(3) } else { window_size + 1 };
    let half = w / 2;
    let weights: Vec<f64> = (0..w).map(|j| (half as isize + 1 - (j as isize - half as isize).abs()) as f64).collect();
    let weight_sum: f64 = weights.iter().sum();

    let n = values.len();
    (0..n)
        .map(|i| {
            let mut acc = 0.0;
            for (j, w_j) in weights.iter().enumerate() {
                let offset = j as isize - half as isize;
                let idx = (i as isize + offset).clamp(0, n as isize - 1) as usize;
                acc += values[idx] * w_j;
            }
            acc / weight_sum
        })
        .collect()
}

/// Extracts support/resistance lines from a price-descending volume profile.
pub fn compute_support_resistance_lines(
    profile: &[VolumeLevel],
    vicinity: usize,
    smoothing_window: usize,
    width_multiplier: f64,
    max_width: f64,
) -> Vec<SupportResistanceLine> {
    let n = profile.len();
    if n < 2 * vicinity + 1 {
        return Vec::new();
    }

    let raw_vols: Vec<f64> = profile.iter().map(|l| l.vol).collect();
    let smoothed = smooth_triangular(&raw_vols, smoothing_window);

    let mut minima_idx = Vec::new();
    for i in vicinity..(n - vicinity) {
        let v = smoothed[i];
        let is_min = (i - vicinity..=i + vicinity)
            .filter(|&j| j != i)
            .all(|j| smoothed[j] > v);
        if is_min {
            minima_idx.push(i);
        }
    }

    let mut lines = Vec::with_capacity(minima_idx.len());
    for (m, &k) in minima_idx.iter().enumerate() {
        let left_start = if m == 0 { 0 } else { minima_idx[m - 1] + 1 };
        let right_end = if m + 1 < minima_idx.len() { minima_idx[m + 1] - 1 } else { n - 1 };

        let left_sum: f64 = smoothed[left_start..k].iter().sum();
        let left_size = k - left_start;
        let right_sum: f64 = smoothed[(k + 1)..=right_end].iter().sum();
        let right_size = right_end - k;

        let total_size = left_size + right_size;
        let clusters_avg = if total_size == 0 { 0.0 } else { (left_sum + right_sum) / total_size as f64 };

        let volume_ratio = clusters_avg / smoothed[k].max(1e-10);
        let raw_width = volume_ratio * width_multiplier;
        let line_width = raw_width.clamp(1.0, max_width);

        lines.push(SupportResistanceLine {
            price: profile[k].price,
            width: line_width,
            extend: "both",
            color: "rgba(51,33,243,0.24)",
            style: "solid",
        });
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_from(vols: &[f64]) -> Vec<VolumeLevel> {
        vols.iter()
            .enumerate()
            .map(|(i, &v)| VolumeLevel { price: 1000.0 - i as f64, vol: v })
            .collect()
    }

    #[test]
    fn too_short_profile_yields_no_lines() {
        let p = profile_from(&[1.0; 10]);
        assert!(compute_support_resistance_lines(&p, 9, 8, 1.0, 10.0).is_empty());
    }

    #[test]
    fn widths_are_bounded_and_minima_respect_vicinity() {
        let n = 60usize;
        let vicinity = 9usize;
        let mut vols = vec![10.0f64; n];
        for i in (vicinity..n - vicinity).step_by(12) {
            vols[i] = 1.0;
        }
        let p = profile_from(&vols);
        let lines = compute_support_resistance_lines(&p, vicinity, 8, 1.0, 10.0);
        assert!(!lines.is_empty());
        for l in &lines {
            assert!(l.width >= 1.0 && l.width <= 10.0);
        }
    }

    #[test]
    fn smooth_triangular_preserves_length() {
        let vals: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_eq!(smooth_triangular(&vals, 8).len(), vals.len());
    }
}
