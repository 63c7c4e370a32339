//! Score normalization for display and threshold adaptation for filtering.
//!
//! Vector similarity rarely exceeds ~0.85 even for a perfect semantic match,
//! so two asymmetric transforms exist. Display boosting is cosmetic and only
//! applies to values shown to users. Threshold adaptation maps a user's
//! "match quality" expectation onto the range similarity actually produces and
//! is the only threshold retrieval filters with.
//!
//! All constants are tunable defaults, not correctness constants.

/// One display boost band: raw scores `>= min` are multiplied and capped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoostTier {
    pub min: f64,
    pub multiplier: f64,
    pub cap: f64,
}

/// One adaptation step: expectations `>= at_least` map to `threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptationStep {
    pub at_least: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSettings {
    /// Bands ordered by descending `min`; the last band should have `min == 0.0`
    pub boost_tiers: Vec<BoostTier>,
    /// Absolute ceiling for any displayed score
    pub display_ceiling: f64,
    /// Steps ordered by descending `at_least`
    pub adaptation_steps: Vec<AdaptationStep>,
    /// Lowest internal threshold for expectations below every step
    pub adaptation_floor: f64,
}

impl Default for ScoreSettings {
    fn default() -> Self {
        Self {
            boost_tiers: vec![
                BoostTier { min: 0.70, multiplier: 1.10, cap: 0.95 },
                BoostTier { min: 0.60, multiplier: 1.15, cap: 0.90 },
                BoostTier { min: 0.50, multiplier: 1.20, cap: 0.75 },
                BoostTier { min: 0.0, multiplier: 1.15, cap: 0.60 },
            ],
            display_ceiling: 0.99,
            adaptation_steps: vec![
                AdaptationStep { at_least: 0.95, threshold: 0.75 },
                AdaptationStep { at_least: 0.90, threshold: 0.72 },
                AdaptationStep { at_least: 0.85, threshold: 0.70 },
                AdaptationStep { at_least: 0.80, threshold: 0.68 },
                AdaptationStep { at_least: 0.75, threshold: 0.65 },
                AdaptationStep { at_least: 0.70, threshold: 0.60 },
            ],
            adaptation_floor: 0.50,
        }
    }
}

impl ScoreSettings {
    /// Boost a raw similarity for display. Never used for ranking.
    pub fn display_score(&self, raw: f64) -> f64 {
        if !raw.is_finite() || raw <= 0.0 {
            return 0.0;
        }
        let boosted = self
            .boost_tiers
            .iter()
            .find(|tier| raw >= tier.min)
            .map(|tier| (raw * tier.multiplier).min(tier.cap))
            .unwrap_or(raw);
        boosted.min(self.display_ceiling)
    }

    /// Map a user expectation (fraction or percentage) onto an internal cutoff.
    ///
    /// Below the lowest step the expectation passes through, floored at
    /// `adaptation_floor` and held at or under the lowest step's threshold so
    /// the mapping stays monotonic.
    pub fn adapt_threshold(&self, expectation: f64) -> f64 {
        let expectation = normalize_expectation(expectation);
        if let Some(step) = self
            .adaptation_steps
            .iter()
            .find(|step| expectation >= step.at_least)
        {
            return step.threshold;
        }
        let ceiling = self
            .adaptation_steps
            .last()
            .map(|step| step.threshold)
            .unwrap_or(1.0)
            .max(self.adaptation_floor);
        expectation.max(self.adaptation_floor).min(ceiling)
    }
}

/// Accept "0.95" or "95" style expectations; result is clamped to [0, 1].
pub fn normalize_expectation(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let fraction = if value > 1.0 { value / 100.0 } else { value };
    fraction.clamp(0.0, 1.0)
}
