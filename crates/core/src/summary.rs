//! Batch summarizer: folds records into a partial statistics summary.

use std::collections::BTreeMap;

use crate::record::VehicleRecord;

/// Horsepower contribution of one batch.
///
/// `min = +inf` and `max = -inf` mean "no contribution"; they must never be
/// merged into stored bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HpSummary {
    pub sum: f64,
    pub count: u64,
    pub min: f64,
    pub max: f64,
}

impl Default for HpSummary {
    fn default() -> Self {
        Self {
            sum: 0.0,
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl HpSummary {
    fn observe(&mut self, hp: f64) {
        self.sum += hp;
        self.count += 1;
        self.min = self.min.min(hp);
        self.max = self.max.max(hp);
    }

    /// Lower bound contributed by the batch, if any.
    pub fn min_bound(&self) -> Option<f64> {
        (self.min != f64::INFINITY).then_some(self.min)
    }

    /// Upper bound contributed by the batch, if any.
    pub fn max_bound(&self) -> Option<f64> {
        (self.max != f64::NEG_INFINITY).then_some(self.max)
    }
}

/// Partial statistics of one deduplicated batch. Never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub count: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_decade: BTreeMap<String, u64>,
    pub by_speed_class: BTreeMap<String, u64>,
    pub horsepower: HpSummary,
}

impl BatchSummary {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn contributes_horsepower(&self) -> bool {
        self.horsepower.count > 0
    }
}

/// Summarize already-deduplicated records. Pure and deterministic.
///
/// Records lacking a categorical field are counted in `count` but left out
/// of that field's mapping.
pub fn summarize<'a, I>(records: I) -> BatchSummary
where
    I: IntoIterator<Item = &'a VehicleRecord>,
{
    records.into_iter().fold(BatchSummary::default(), |mut acc, rec| {
        acc.count += 1;

        if let Some(t) = rec.type_key() {
            *acc.by_type.entry(t.to_string()).or_insert(0) += 1;
        }
        if let Some(decade) = rec.decade_key() {
            *acc.by_decade.entry(decade).or_insert(0) += 1;
        }
        if let Some(sc) = rec.speed_class_key() {
            *acc.by_speed_class.entry(sc.to_string()).or_insert(0) += 1;
        }
        if let Some(hp) = rec.horsepower {
            acc.horsepower.observe(hp);
        }

        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn full(aid: &str, t: &str, year: i32, sc: &str, hp: f64) -> VehicleRecord {
        VehicleRecord::new(aid)
            .with_type(t)
            .with_model_year(year)
            .with_speed_class(sc)
            .with_horsepower(hp)
    }

    #[test]
    fn empty_input_is_zero_summary_with_sentinels() {
        let s = summarize(&[] as &[VehicleRecord]);
        assert!(s.is_empty());
        assert_eq!(s.count, 0);
        assert!(s.by_type.is_empty());
        assert_eq!(s.horsepower.count, 0);
        assert_eq!(s.horsepower.sum, 0.0);
        assert_eq!(s.horsepower.min, f64::INFINITY);
        assert_eq!(s.horsepower.max, f64::NEG_INFINITY);
        assert_eq!(s.horsepower.min_bound(), None);
        assert_eq!(s.horsepower.max_bound(), None);
    }

    #[test]
    fn summarizes_reference_batch() {
        let s = summarize(&[
            full("v1", "SUV", 1995, "Normal", 150.0),
            full("v2", "Sedan", 2012, "Rapido", 200.0),
        ]);

        assert_eq!(s.count, 2);
        assert_eq!(s.by_type.get("SUV"), Some(&1));
        assert_eq!(s.by_type.get("Sedan"), Some(&1));
        assert_eq!(s.by_decade.get("1990"), Some(&1));
        assert_eq!(s.by_decade.get("2010"), Some(&1));
        assert_eq!(s.by_speed_class.get("Normal"), Some(&1));
        assert_eq!(s.by_speed_class.get("Rapido"), Some(&1));
        assert_eq!(s.horsepower.sum, 350.0);
        assert_eq!(s.horsepower.count, 2);
        assert_eq!(s.horsepower.min, 150.0);
        assert_eq!(s.horsepower.max, 200.0);
    }

    #[test]
    fn missing_categories_are_excluded_not_bucketed() {
        let s = summarize(&[VehicleRecord::new("v1"), full("v2", "SUV", 2001, "Lento", 90.0)]);

        assert_eq!(s.count, 2);
        assert_eq!(s.by_type.len(), 1);
        assert!(!s.by_type.contains_key("unknown"));
        assert_eq!(s.by_decade.values().sum::<u64>(), 1);
        assert_eq!(s.horsepower.count, 1);
    }

    #[test]
    fn extreme_model_years_are_bucketed() {
        let s = summarize(&[
            full("v1", "SUV", i32::MIN, "Lento", 90.0),
            full("v2", "SUV", i32::MAX, "Lento", 90.0),
        ]);

        assert_eq!(s.by_decade.get("-2147483650"), Some(&1));
        assert_eq!(s.by_decade.get("2147483640"), Some(&1));
    }

    fn record_strategy() -> impl Strategy<Value = VehicleRecord> {
        (
            prop::sample::select(vec!["SUV", "PickUp", "Sedan"]),
            1950i32..2030,
            prop::sample::select(vec!["Lento", "Normal", "Rapido"]),
            0.0f64..1500.0,
        )
            .prop_map(|(t, y, sc, hp)| full("x", t, y, sc, hp))
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Every complete record lands in exactly one bucket of each mapping.
        #[test]
        fn mappings_sum_to_count(records in prop::collection::vec(record_strategy(), 0..64)) {
            let s = summarize(&records);
            prop_assert_eq!(s.by_type.values().sum::<u64>(), s.count);
            prop_assert_eq!(s.by_decade.values().sum::<u64>(), s.count);
            prop_assert_eq!(s.by_speed_class.values().sum::<u64>(), s.count);
            prop_assert_eq!(s.horsepower.count, s.count);
        }

        #[test]
        fn summarize_is_order_independent(records in prop::collection::vec(record_strategy(), 0..32)) {
            let mut reversed = records.clone();
            reversed.reverse();
            let a = summarize(&records);
            let b = summarize(&reversed);
            prop_assert_eq!(a.count, b.count);
            prop_assert_eq!(a.by_type, b.by_type);
            prop_assert_eq!(a.by_decade, b.by_decade);
            prop_assert_eq!(a.horsepower.min, b.horsepower.min);
            prop_assert_eq!(a.horsepower.max, b.horsepower.max);
        }
    }
}
