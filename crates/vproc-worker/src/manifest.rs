//! HLS master playlist.

use vproc_media::PLAYLIST_NAME;
use vproc_models::Rendition;

/// One `#EXT-X-STREAM-INF` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestVariant {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub bandwidth: u64,
    /// Playlist URI relative to the master manifest
    pub uri: String,
}

impl ManifestVariant {
    /// Variant for a stored rendition of a `source_width`x`source_height`
    /// source. Width keeps the aspect ratio, rounded to an even number.
    pub fn for_rendition(rendition: &Rendition, source_width: u32, source_height: u32) -> Self {
        Self {
            label: rendition.label.clone(),
            width: scaled_width(source_width, source_height, rendition.height),
            height: rendition.height,
            bandwidth: rendition.bandwidth_estimate,
            uri: format!("{}/{}", rendition.label, PLAYLIST_NAME),
        }
    }
}

/// Width matching ffmpeg's `scale=-2:{height}`.
pub fn scaled_width(source_width: u32, source_height: u32, height: u32) -> u32 {
    if source_width == 0 || source_height == 0 {
        return 0;
    }
    let exact = u64::from(source_width) * u64::from(height) / u64::from(source_height);
    let even = ((exact + 1) / 2 * 2) as u32;
    even.max(2)
}

/// Sort variants by descending bandwidth, then descending height.
pub fn sort_variants(variants: &mut [ManifestVariant]) {
    variants.sort_by(|a, b| {
        b.bandwidth
            .cmp(&a.bandwidth)
            .then_with(|| b.height.cmp(&a.height))
    });
}

/// Render the master playlist. Variants are sorted first.
pub fn build_master_manifest(variants: &[ManifestVariant]) -> String {
    let mut sorted = variants.to_vec();
    sort_variants(&mut sorted);

    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n\n");
    for v in &sorted {
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{},NAME=\"{}\"\n",
            v.bandwidth, v.width, v.height, v.label
        ));
        out.push_str(&v.uri);
        out.push_str("\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ladder::estimate_bandwidth;

    fn variant(height: u32, bandwidth: u64) -> ManifestVariant {
        ManifestVariant {
            label: format!("{}p", height),
            width: scaled_width(1920, 1080, height),
            height,
            bandwidth,
            uri: format!("{}p/playlist.m3u8", height),
        }
    }

    #[test]
    fn test_manifest_orders_by_bandwidth() {
        let variants: Vec<_> = [144, 1080, 480]
            .into_iter()
            .map(|h| variant(h, estimate_bandwidth(h)))
            .collect();

        let manifest = build_master_manifest(&variants);
        let uris: Vec<&str> = manifest
            .lines()
            .filter(|l| l.ends_with(".m3u8"))
            .collect();
        assert_eq!(
            uris,
            vec!["1080p/playlist.m3u8", "480p/playlist.m3u8", "144p/playlist.m3u8"]
        );
    }

    #[test]
    fn test_ties_broken_by_height() {
        let mut variants = vec![variant(360, 1000), variant(720, 1000), variant(480, 2000)];
        sort_variants(&mut variants);
        let heights: Vec<u32> = variants.iter().map(|v| v.height).collect();
        assert_eq!(heights, vec![480, 720, 360]);
    }

    #[test]
    fn test_manifest_format() {
        let manifest = build_master_manifest(&[variant(720, 2_800_000)]);
        assert_eq!(
            manifest,
            "#EXTM3U\n#EXT-X-VERSION:3\n\n\
             #EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720,NAME=\"720p\"\n\
             720p/playlist.m3u8\n\n"
        );
    }

    #[test]
    fn test_scaled_width_is_even() {
        assert_eq!(scaled_width(1920, 1080, 1080), 1920);
        assert_eq!(scaled_width(1920, 1080, 144), 256);
        assert_eq!(scaled_width(1080, 1920, 360), 202);
        assert_eq!(scaled_width(0, 0, 360), 0);
    }
}
