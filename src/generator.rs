use crate::error::ConfigError;
use crate::reading::{KnownEquipment, Reading};
use chrono::{DateTime, Utc};
use rand::Rng;

/// Inclusive bounds for one generated metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Copy> Bounds<T> {
    pub fn new(min: T, max: T) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationRanges {
    pub temperature: Bounds<f64>,
    pub vibration: Bounds<f64>,
    pub throughput: Bounds<i32>,
}

impl GenerationRanges {
    /// Every range must be samplable: finite float bounds whose span is also
    /// finite, and no negative throughput.
    pub fn validate(&self) -> Result<(), ConfigError> {
        sampleable_span("temperature range", self.temperature)?;
        sampleable_span("vibration range", self.vibration)?;
        if self.throughput.min < 0 {
            return Err(ConfigError::invalid(
                "throughput range",
                format!("{}..{}", self.throughput.min, self.throughput.max),
                "throughput cannot be negative",
            ));
        }
        Ok(())
    }
}

fn sampleable_span(key: &'static str, bounds: Bounds<f64>) -> Result<(), ConfigError> {
    let value = || format!("{}..{}", bounds.min, bounds.max);
    if !bounds.min.is_finite() || !bounds.max.is_finite() {
        return Err(ConfigError::invalid(key, value(), "bounds must be finite"));
    }
    if !(bounds.max - bounds.min).is_finite() {
        return Err(ConfigError::invalid(key, value(), "span is too wide to sample"));
    }
    Ok(())
}

impl Default for GenerationRanges {
    fn default() -> Self {
        Self {
            temperature: Bounds::new(60.0, 120.0),
            vibration: Bounds::new(0.1, 2.5),
            throughput: Bounds::new(80, 200),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadingGenerator {
    equipment: KnownEquipment,
    ranges: GenerationRanges,
}

impl ReadingGenerator {
    pub fn new(equipment: KnownEquipment, ranges: GenerationRanges) -> Result<Self, ConfigError> {
        if equipment.is_empty() {
            return Err(ConfigError::Missing("at least one equipment id"));
        }
        ranges.validate()?;
        Ok(Self { equipment, ranges })
    }

    pub fn equipment(&self) -> &KnownEquipment {
        &self.equipment
    }

    pub fn ranges(&self) -> &GenerationRanges {
        &self.ranges
    }

    /// Draws one sample stamped with `recorded_at`. Never fails.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R, recorded_at: DateTime<Utc>) -> Reading {
        let ids = self.equipment.ids();
        let equipment_id = ids[rng.gen_range(0..ids.len())].clone();

        let temperature = sample_rounded(rng, self.ranges.temperature);
        let vibration = sample_rounded(rng, self.ranges.vibration);
        let throughput = rng.gen_range(self.ranges.throughput.min..=self.ranges.throughput.max);

        Reading {
            equipment_id,
            temperature,
            vibration,
            throughput,
            recorded_at,
        }
    }
}

// Two decimals, clamped so rounding can never leave the bounds.
fn sample_rounded<R: Rng + ?Sized>(rng: &mut R, bounds: Bounds<f64>) -> f64 {
    let raw = if bounds.min == bounds.max {
        bounds.min
    } else {
        rng.gen_range(bounds.min..=bounds.max)
    };
    ((raw * 100.0).round() / 100.0).clamp(bounds.min, bounds.max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn generator() -> ReadingGenerator {
        ReadingGenerator::new(KnownEquipment::default(), GenerationRanges::default()).unwrap()
    }

    #[test]
    fn generated_readings_stay_inside_configured_bounds() {
        let generator = generator();
        let ranges = GenerationRanges::default();
        let mut rng = StdRng::seed_from_u64(7);
        let now = Utc::now();
        for _ in 0..5_000 {
            let reading = generator.generate(&mut rng, now);
            assert!(generator.equipment().contains(&reading.equipment_id));
            assert!(ranges.temperature.contains(reading.temperature), "{reading:?}");
            assert!(ranges.vibration.contains(reading.vibration), "{reading:?}");
            assert!(ranges.throughput.contains(reading.throughput), "{reading:?}");
            assert!(reading.throughput >= 0);
            assert_eq!(reading.recorded_at, now);
        }
    }

    #[test]
    fn every_known_unit_is_eventually_chosen() {
        let generator = generator();
        let mut rng = StdRng::seed_from_u64(11);
        let seen: HashSet<String> = (0..300)
            .map(|_| generator.generate(&mut rng, Utc::now()).equipment_id)
            .collect();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn same_seed_and_time_reproduce_the_same_reading() {
        let generator = generator();
        let at = Utc::now();
        let a = generator.generate(&mut StdRng::seed_from_u64(42), at);
        let b = generator.generate(&mut StdRng::seed_from_u64(42), at);
        assert_eq!(a, b);
    }

    #[test]
    fn values_are_rounded_to_two_decimals() {
        let generator = generator();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let reading = generator.generate(&mut rng, Utc::now());
            let scaled = reading.temperature * 100.0;
            assert!((scaled - scaled.round()).abs() < 1e-6);
        }
    }

    #[test]
    fn degenerate_bounds_yield_the_single_value() {
        let ranges = GenerationRanges {
            temperature: Bounds::new(75.0, 75.0),
            vibration: Bounds::new(1.0, 1.0),
            throughput: Bounds::new(120, 120),
        };
        let generator = ReadingGenerator::new(KnownEquipment::new(["EQ-009"]), ranges).unwrap();
        let reading = generator.generate(&mut StdRng::seed_from_u64(1), Utc::now());
        assert_eq!(reading.equipment_id, "EQ-009");
        assert_eq!(reading.temperature, 75.0);
        assert_eq!(reading.vibration, 1.0);
        assert_eq!(reading.throughput, 120);
    }

    #[test]
    fn rejects_empty_equipment_set_and_negative_throughput() {
        assert!(ReadingGenerator::new(KnownEquipment::new(Vec::<String>::new()), GenerationRanges::default()).is_err());
        let ranges = GenerationRanges {
            throughput: Bounds::new(-5, 10),
            ..GenerationRanges::default()
        };
        assert!(ReadingGenerator::new(KnownEquipment::default(), ranges).is_err());
    }

    #[test]
    fn rejects_ranges_that_cannot_be_sampled() {
        let too_wide = GenerationRanges {
            temperature: Bounds::new(-1e308, 1e308),
            ..GenerationRanges::default()
        };
        let err = ReadingGenerator::new(KnownEquipment::default(), too_wide).unwrap_err();
        assert!(err.to_string().contains("temperature range"), "{err}");

        let infinite = GenerationRanges {
            vibration: Bounds::new(0.0, f64::INFINITY),
            ..GenerationRanges::default()
        };
        assert!(ReadingGenerator::new(KnownEquipment::default(), infinite).is_err());

        let wide_but_finite = GenerationRanges {
            temperature: Bounds::new(-1e300, 1e300),
            ..GenerationRanges::default()
        };
        let generator = ReadingGenerator::new(KnownEquipment::default(), wide_but_finite).unwrap();
        let reading = generator.generate(&mut StdRng::seed_from_u64(9), Utc::now());
        assert!(wide_but_finite.temperature.contains(reading.temperature));
    }

    #[test]
    fn bounds_normalize_reversed_input() {
        let bounds = Bounds::new(2.5, 0.1);
        assert_eq!(bounds.min, 0.1);
        assert_eq!(bounds.max, 2.5);
    }
}
