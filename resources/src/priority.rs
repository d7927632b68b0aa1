use std::time::Instant;

use serde::Deserialize;

/// Loading priority class of a resource. Earlier variants load first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
#[repr(u8)]
pub enum ResourcePriority {
    Critical = 0,
    VeryHigh = 1,
    High = 2,
    #[default]
    Medium = 3,
    Low = 4,
    VeryLow = 5,
}

impl ResourcePriority {
    pub const ALL: [ResourcePriority; 6] = [
        ResourcePriority::Critical,
        ResourcePriority::VeryHigh,
        ResourcePriority::High,
        ResourcePriority::Medium,
        ResourcePriority::Low,
        ResourcePriority::VeryLow,
    ];

    pub(crate) fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(ResourcePriority::VeryLow)
    }

    /// Loading queue score at `now`. Lower scores load first.
    ///
    /// [`ResourcePriority::Critical`] always scores `0`. Every other class
    /// scores ten points per class step plus one point per second since the
    /// resource was last acquired, capped at ten, so recently used resources
    /// win within their class but never overtake a more urgent class.
    /// Resources that were never acquired count as ten seconds old.
    pub fn loading_score(&self, last_acquire: Option<Instant>, now: Instant) -> f32 {
        if *self == ResourcePriority::Critical {
            return 0.0;
        }
        let age = last_acquire.map_or(10.0, |last| {
            now.saturating_duration_since(last).as_secs_f32().min(10.0)
        });
        *self as u8 as f32 * 10.0 + age
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn critical_always_scores_zero() {
        let now = Instant::now();
        assert_eq!(ResourcePriority::Critical.loading_score(None, now), 0.0);
        assert_eq!(ResourcePriority::Critical.loading_score(Some(now), now), 0.0);
    }

    #[test]
    fn age_is_capped_at_ten_seconds() {
        let start = Instant::now();
        let later = start + Duration::from_secs(60);
        assert_eq!(ResourcePriority::High.loading_score(Some(start), later), 30.0);
        assert_eq!(ResourcePriority::High.loading_score(None, later), 30.0);
    }

    #[test]
    fn recent_use_wins_within_class() {
        let start = Instant::now();
        let now = start + Duration::from_secs(5);
        let recent = ResourcePriority::Medium.loading_score(Some(now), now);
        let older = ResourcePriority::Medium.loading_score(Some(start), now);
        assert!(recent < older);
        assert_eq!(recent, 30.0);
    }

    #[test]
    fn classes_never_overlap() {
        let now = Instant::now();
        for pair in ResourcePriority::ALL.windows(2) {
            let stale_urgent = pair[0].loading_score(None, now);
            let fresh_lazy = pair[1].loading_score(Some(now), now);
            assert!(stale_urgent <= fresh_lazy, "{pair:?}");
        }
    }
}
