//! Rendition ladder selection and progress arithmetic.

use vproc_media::RenditionSpec;
use vproc_models::Rendition;

/// Standard rendition heights, highest first.
pub const STANDARD_HEIGHTS: [u32; 8] = [2160, 1440, 1080, 720, 480, 360, 240, 144];

/// Estimated bandwidth of each standard height, highest first.
const STANDARD_BANDWIDTHS: [(u32, u64); 8] = [
    (2160, 8_000_000),
    (1440, 6_000_000),
    (1080, 5_000_000),
    (720, 2_800_000),
    (480, 1_400_000),
    (360, 800_000),
    (240, 500_000),
    (144, 300_000),
];

/// Bits per second per line of height for non-standard renditions.
pub const CUSTOM_BANDWIDTH_PER_LINE: u64 = 2500;

/// Percent reserved for setup before the first rendition.
pub const SETUP_PERCENT: u8 = 5;

/// Percent spread across the renditions.
pub const RENDITION_SPAN_PERCENT: u8 = 90;

/// Heights to produce for a source, highest first. Never upscales.
///
/// A source below the smallest standard rung gets a single rendition at
/// its own height.
pub fn select_ladder(source_height: u32) -> Vec<u32> {
    let ladder: Vec<u32> = STANDARD_HEIGHTS
        .iter()
        .copied()
        .filter(|h| *h <= source_height)
        .collect();

    if ladder.is_empty() {
        vec![source_height]
    } else {
        ladder
    }
}

/// Estimated peak bandwidth in bits/second for a rendition height.
///
/// Non-standard heights get `height * 2500`, held strictly between the
/// estimates of the standard heights around them so the result is
/// monotonic in height.
pub fn estimate_bandwidth(height: u32) -> u64 {
    if let Some((_, bandwidth)) = STANDARD_BANDWIDTHS.iter().find(|(h, _)| *h == height) {
        return *bandwidth;
    }

    let floor = STANDARD_BANDWIDTHS
        .iter()
        .find(|(h, _)| *h < height)
        .map_or(0, |(_, b)| b + 1);
    let ceiling = STANDARD_BANDWIDTHS
        .iter()
        .rev()
        .find(|(h, _)| *h > height)
        .map_or(u64::MAX, |(_, b)| b - 1);

    (u64::from(height) * CUSTOM_BANDWIDTH_PER_LINE).clamp(floor, ceiling)
}

/// Transcode targets for a source.
pub fn rendition_specs(source_height: u32) -> Vec<RenditionSpec> {
    select_ladder(source_height)
        .into_iter()
        .map(|h| RenditionSpec::new(Rendition::label_for(h), h, estimate_bandwidth(h)))
        .collect()
}

/// Percent published when stage `index` of `total` starts.
pub fn stage_percent(index: usize, total: usize) -> u8 {
    if total == 0 {
        return SETUP_PERCENT;
    }
    let index = index.min(total);
    SETUP_PERCENT + (index * RENDITION_SPAN_PERCENT as usize / total) as u8
}

/// Percent for a transcoder tick `fraction` of the way through stage
/// `index`. Stays within `[stage_percent(index), stage_percent(index + 1))`
/// so the next stage event never goes backwards.
pub fn tick_percent(index: usize, total: usize, fraction: f64) -> u8 {
    if total == 0 {
        return SETUP_PERCENT;
    }
    let floor = stage_percent(index, total);
    let ceiling = stage_percent(index + 1, total).saturating_sub(1).max(floor);

    let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
    let progressed = (index as f64 + fraction) * f64::from(RENDITION_SPAN_PERCENT) / total as f64;
    let percent = SETUP_PERCENT as f64 + progressed.floor();

    (percent as u8).clamp(floor, ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_ladder_for_2160() {
        assert_eq!(select_ladder(2160), vec![2160, 1440, 1080, 720, 480, 360, 240, 144]);
    }

    #[test]
    fn test_ladder_never_upscales() {
        assert_eq!(select_ladder(900), vec![720, 480, 360, 240, 144]);
        assert_eq!(select_ladder(1080), vec![1080, 720, 480, 360, 240, 144]);
        assert_eq!(select_ladder(4320), STANDARD_HEIGHTS.to_vec());
    }

    #[test]
    fn test_ladder_synthesizes_small_sources() {
        assert_eq!(select_ladder(100), vec![100]);
        assert_eq!(select_ladder(144), vec![144]);
    }

    #[test]
    fn test_bandwidth_is_monotonic_in_height() {
        let bandwidths: Vec<u64> = (1..=4320).map(estimate_bandwidth).collect();
        assert!(
            bandwidths.windows(2).all(|w| w[0] <= w[1]),
            "bandwidth decreased somewhere below 4320 lines"
        );
        for pair in STANDARD_HEIGHTS.windows(2) {
            assert!(estimate_bandwidth(pair[1]) < estimate_bandwidth(pair[1] + 1));
            assert!(estimate_bandwidth(pair[0] - 1) < estimate_bandwidth(pair[0]));
        }
    }

    #[test]
    fn test_custom_bandwidth() {
        assert_eq!(estimate_bandwidth(100), 250_000);
        assert_eq!(estimate_bandwidth(50), 125_000);
        // 143 * 2500 would pass the 144 rung
        assert_eq!(estimate_bandwidth(143), 299_999);
        // 900 * 2500 would fall below the 720 rung
        assert_eq!(estimate_bandwidth(900), 2_800_001);
        assert_eq!(estimate_bandwidth(1080), 5_000_000);
    }

    #[test]
    fn test_rendition_specs() {
        let specs = rendition_specs(480);
        let labels: Vec<&str> = specs.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["480p", "360p", "240p", "144p"]);
        assert_eq!(specs[0].bandwidth, 1_400_000);
        assert_eq!(specs[0].audio_bitrate_kbps, 128);
    }

    #[test]
    fn test_stage_percent() {
        assert_eq!(stage_percent(0, 6), 5);
        assert_eq!(stage_percent(1, 6), 20);
        assert_eq!(stage_percent(5, 6), 80);
        assert_eq!(stage_percent(6, 6), 95);
        assert_eq!(stage_percent(0, 1), 5);
        assert_eq!(stage_percent(2, 8), 27);
    }

    #[test]
    fn test_tick_percent_stays_inside_stage() {
        for total in 1..=8 {
            for index in 0..total {
                let floor = stage_percent(index, total);
                let next = stage_percent(index + 1, total);
                let mut last = 0;
                for step in 0..=20 {
                    let p = tick_percent(index, total, step as f64 / 20.0);
                    assert!(p >= floor && p < next, "total={} index={} p={}", total, index, p);
                    assert!(p >= last);
                    last = p;
                }
            }
        }
        assert_eq!(tick_percent(0, 6, f64::NAN), 5);
    }
}
