//! Onset picking on a normalized onset-strength envelope.

/// Scales the envelope so its maximum is 1. An all-zero envelope is
/// returned unchanged.
pub fn normalize(envelope: &mut [f32]) {
    let max = envelope.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        envelope.iter_mut().for_each(|value| *value /= max);
    }
}

/// Rolling `mean + k * std + delta` over the `past` frames before each frame
/// and `ahead` frames after it, so the threshold tracks the recent noise
/// floor.
pub fn adaptive_threshold(envelope: &[f32], past: usize, ahead: usize, k: f32, delta: f32) -> Vec<f32> {
    (0..envelope.len())
        .map(|i| {
            let start = i.saturating_sub(past);
            let end = (i + ahead + 1).min(envelope.len());
            let window = &envelope[start..end];
            let mean = window.iter().sum::<f32>() / window.len() as f32;
            let variance =
                window.iter().map(|&x| (x - mean).powi(2)).sum::<f32>() / window.len() as f32;
            mean + k * variance.sqrt() + delta
        })
        .collect()
}

/// Local maxima above `threshold`, at least `min_gap` frames apart. A later
/// peak inside the gap replaces the earlier one only if it is stronger.
pub fn pick_peaks(envelope: &[f32], threshold: &[f32], min_gap: usize) -> Vec<usize> {
    let mut peaks: Vec<usize> = Vec::new();
    for i in 1..envelope.len().saturating_sub(1) {
        let value = envelope[i];
        if !(value >= envelope[i - 1] && value > envelope[i + 1] && value > threshold[i]) {
            continue;
        }
        match peaks.last_mut() {
            Some(last) if i - *last < min_gap => {
                if value > envelope[*last] {
                    *last = i;
                }
            }
            _ => peaks.push(i),
        }
    }
    peaks
}

/// Moves a coarse onset to the end of the last quiet block before the
/// attack. Energy is measured in `block` sized windows over
/// `[coarse - search, coarse + search / 2)`; if no block before the loudest
/// one drops below half its energy the coarse position is kept.
pub fn refine_onset(samples: &[f32], coarse: usize, search: usize, block: usize) -> usize {
    if samples.is_empty() || block == 0 {
        return coarse;
    }
    let start = coarse.saturating_sub(search);
    let end = (coarse + search / 2).min(samples.len());
    if end <= start + block {
        return coarse.min(samples.len().saturating_sub(1));
    }
    let energies: Vec<f32> = samples[start..end]
        .chunks(block)
        .map(|chunk| chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32)
        .collect();
    let (loudest, peak) = energies
        .iter()
        .copied()
        .enumerate()
        .fold((0, 0.0f32), |best, (i, e)| if e > best.1 { (i, e) } else { best });
    if peak <= 0.0 {
        return coarse;
    }
    for index in (0..loudest).rev() {
        if energies[index] < 0.5 * peak {
            return start + (index + 1) * block;
        }
    }
    coarse
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_follows_noise_floor() {
        let mut envelope = vec![0.1; 40];
        envelope[20] = 1.0;
        let threshold = adaptive_threshold(&envelope, 10, 2, 1.5, 0.05);
        assert!(threshold[5] < 0.2);
        assert!(threshold[20] < 1.0);
        assert_eq!(pick_peaks(&envelope, &threshold, 3), vec![20]);
    }

    #[test]
    fn refractory_keeps_stronger_peak() {
        let envelope = vec![0.0, 0.6, 0.0, 0.9, 0.0, 0.0, 0.0, 0.0, 0.7, 0.0];
        let threshold = vec![0.1; envelope.len()];
        assert_eq!(pick_peaks(&envelope, &threshold, 4), vec![3, 8]);
    }

    #[test]
    fn onset_snaps_to_attack() {
        let mut samples = vec![0.0f32; 4000];
        for (i, sample) in samples.iter_mut().enumerate().skip(2048) {
            *sample = if i % 2 == 0 { 0.8 } else { -0.8 };
        }
        let refined = refine_onset(&samples, 2304, 1024, 64);
        assert_eq!(refined, 2048);
    }

    #[test]
    fn legato_keeps_coarse_position() {
        let samples = vec![0.5f32; 4000];
        assert_eq!(refine_onset(&samples, 2000, 1024, 64), 2000);
    }

    #[test]
    fn normalize_scales_to_unity() {
        let mut envelope = vec![0.0, 2.0, 4.0];
        normalize(&mut envelope);
        assert_eq!(envelope, vec![0.0, 0.5, 1.0]);
    }
}
