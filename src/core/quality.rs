//! Quality selection over a parsed master playlist

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use crate::parsers::m3u8_parser::{QualityKey, QualityMap};

/// User preference for which variant stream to download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityPreference {
    Best,
    Worst,
    /// Exact height, or the nearest available one
    Height(u32),
}

impl Default for QualityPreference {
    fn default() -> Self {
        Self::Best
    }
}

impl FromStr for QualityPreference {
    type Err = Infallible;

    /// Never fails: anything unrecognised means `Best`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value.eq_ignore_ascii_case("worst") {
            return Ok(Self::Worst);
        }
        let numeric = value
            .strip_suffix('p')
            .or_else(|| value.strip_suffix('P'))
            .unwrap_or(value);
        Ok(numeric
            .parse::<u32>()
            .map(Self::Height)
            .unwrap_or(Self::Best))
    }
}

impl fmt::Display for QualityPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Best => f.write_str("best"),
            Self::Worst => f.write_str("worst"),
            Self::Height(height) => write!(f, "{}", height),
        }
    }
}

/// Numeric heights of the map, highest first
pub fn available_qualities(map: &QualityMap) -> Vec<u32> {
    let mut heights: Vec<u32> = map.keys().filter_map(QualityKey::height).collect();
    heights.sort_unstable_by(|a, b| b.cmp(a));
    heights
}

/// Pick one key from the map. `None` only when the map is empty.
///
/// Only numeric keys take part in ordering; when there are none the
/// first-inserted key is returned for every preference.
pub fn select_quality<'a>(
    map: &'a QualityMap,
    preference: QualityPreference,
) -> Option<&'a QualityKey> {
    let fallback = map.keys().next()?;
    let sorted = available_qualities(map);

    let height = match preference {
        QualityPreference::Best => sorted.first().copied(),
        QualityPreference::Worst => sorted.last().copied(),
        QualityPreference::Height(wanted) => nearest_height(&sorted, wanted),
    };

    let Some(height) = height else {
        return Some(fallback);
    };

    map.keys()
        .find(|key| key.height() == Some(height))
        .or(Some(fallback))
}

/// Exact match, else minimum distance; ties go to the earlier (higher) candidate.
fn nearest_height(sorted_desc: &[u32], wanted: u32) -> Option<u32> {
    if sorted_desc.contains(&wanted) {
        return Some(wanted);
    }

    let mut best: Option<(u32, u32)> = None;
    for &height in sorted_desc {
        let distance = height.abs_diff(wanted);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((height, distance)),
        }
    }
    best.map(|(height, _)| height)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(keys: &[QualityKey]) -> QualityMap {
        let mut map = QualityMap::new();
        for (i, key) in keys.iter().enumerate() {
            map.insert(key.clone(), format!("http://cdn.example/{}.m3u8", i));
        }
        map
    }

    fn numeric(heights: &[u32]) -> QualityMap {
        map_of(
            &heights
                .iter()
                .map(|h| QualityKey::Numeric(*h))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_preference_parsing() {
        assert_eq!("best".parse(), Ok(QualityPreference::Best));
        assert_eq!(" WORST ".parse(), Ok(QualityPreference::Worst));
        assert_eq!("720".parse(), Ok(QualityPreference::Height(720)));
        assert_eq!("1080p".parse(), Ok(QualityPreference::Height(1080)));
        assert_eq!("ultra".parse(), Ok(QualityPreference::Best));
        assert_eq!("".parse(), Ok(QualityPreference::Best));
    }

    #[test]
    fn test_best_and_worst() {
        let map = numeric(&[480, 1080, 240, 720]);
        assert_eq!(
            select_quality(&map, QualityPreference::Best),
            Some(&QualityKey::Numeric(1080))
        );
        assert_eq!(
            select_quality(&map, QualityPreference::Worst),
            Some(&QualityKey::Numeric(240))
        );
    }

    #[test]
    fn test_exact_and_nearest_height() {
        let map = numeric(&[1080, 720, 480]);
        assert_eq!(
            select_quality(&map, QualityPreference::Height(720)),
            Some(&QualityKey::Numeric(720))
        );

        let map = numeric(&[480, 1080]);
        assert_eq!(
            select_quality(&map, QualityPreference::Height(720)),
            Some(&QualityKey::Numeric(480))
        );
    }

    #[test]
    fn test_nearest_tie_prefers_higher() {
        let map = numeric(&[600, 800]);
        assert_eq!(
            select_quality(&map, QualityPreference::Height(700)),
            Some(&QualityKey::Numeric(800))
        );
    }

    #[test]
    fn test_opaque_only_falls_back_to_first() {
        let map = map_of(&[
            QualityKey::Opaque("stream_3".to_string()),
            QualityKey::Opaque("stream_5".to_string()),
        ]);
        let first = QualityKey::Opaque("stream_3".to_string());
        assert_eq!(select_quality(&map, QualityPreference::Best), Some(&first));
        assert_eq!(select_quality(&map, QualityPreference::Worst), Some(&first));
        assert_eq!(
            select_quality(&map, QualityPreference::Height(720)),
            Some(&first)
        );
    }

    #[test]
    fn test_opaque_keys_excluded_from_ordering() {
        let map = map_of(&[
            QualityKey::Opaque("stream_1".to_string()),
            QualityKey::Numeric(360),
            QualityKey::Numeric(720),
        ]);
        assert_eq!(available_qualities(&map), vec![720, 360]);
        assert_eq!(
            select_quality(&map, QualityPreference::Worst),
            Some(&QualityKey::Numeric(360))
        );
    }

    #[test]
    fn test_empty_map_selects_nothing() {
        assert!(select_quality(&QualityMap::new(), QualityPreference::Best).is_none());
    }

    #[test]
    fn test_selection_is_deterministic() {
        let map = numeric(&[360, 720, 1080, 480]);
        for _ in 0..10 {
            assert_eq!(
                select_quality(&map, QualityPreference::Height(500)),
                Some(&QualityKey::Numeric(480))
            );
        }
    }
}
