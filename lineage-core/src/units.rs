// Unit-of-measure normalization for recall totals.
//
// Recall reports sum affected quantities in the root batch's unit. Batches
// reported in other units are converted through a factor table; a missing
// conversion is surfaced per batch rather than guessed.

use std::collections::HashMap;

use crate::config::UnitsSection;

/// Conversion lookup supplied to the recall calculator.
pub trait UnitConverter: Send + Sync {
    /// Multiplier turning one `from` into `to`, or `None` if the units are not comparable.
    fn factor(&self, from: &str, to: &str) -> Option<f64>;

    /// Convert `value` between units.
    fn convert(&self, value: f64, from: &str, to: &str) -> Option<f64> {
        self.factor(from, to).map(|f| value * f)
    }
}

/// Factor table keyed by normalized unit names, with inverse and one-hop
/// chained lookups (`g -> kg -> t`).
#[derive(Debug, Clone, Default)]
pub struct UnitTable {
    factors: HashMap<(String, String), f64>,
}

impl UnitTable {
    /// An empty table: only identical units are comparable.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in mass and volume conversions.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        for (from, to, factor) in [
            ("g", "kg", 0.001),
            ("mg", "kg", 0.000_001),
            ("t", "kg", 1000.0),
            ("lb", "kg", 0.453_592_37),
            ("oz", "kg", 0.028_349_523_125),
            ("ml", "l", 0.001),
            ("cl", "l", 0.01),
            ("hl", "l", 100.0),
            ("m3", "l", 1000.0),
        ] {
            table.insert(from, to, factor);
        }
        table
    }

    /// Built-in table extended with configured conversions.
    pub fn from_config(section: &UnitsSection) -> Self {
        let mut table = Self::standard();
        for c in &section.conversions {
            table.insert(&c.from, &c.to, c.factor);
        }
        table
    }

    pub fn insert(&mut self, from: &str, to: &str, factor: f64) {
        self.factors
            .insert((normalize_unit(from), normalize_unit(to)), factor);
    }

    fn direct(&self, from: &str, to: &str) -> Option<f64> {
        if let Some(&f) = self.factors.get(&(from.to_string(), to.to_string())) {
            return Some(f);
        }
        self.factors
            .get(&(to.to_string(), from.to_string()))
            .map(|f| 1.0 / f)
    }
}

impl UnitConverter for UnitTable {
    fn factor(&self, from: &str, to: &str) -> Option<f64> {
        let from = normalize_unit(from);
        let to = normalize_unit(to);
        if from == to {
            return Some(1.0);
        }
        if let Some(f) = self.direct(&from, &to) {
            return Some(f);
        }

        // One intermediate hop through any unit both sides convert to.
        let mut pivots: Vec<&String> = self
            .factors
            .keys()
            .flat_map(|(a, b)| [a, b])
            .filter(|u| **u != from && **u != to)
            .collect();
        pivots.sort();
        pivots.dedup();
        pivots
            .into_iter()
            .find_map(|pivot| Some(self.direct(&from, pivot)? * self.direct(pivot, &to)?))
    }
}

/// Canonical spelling of a unit: trimmed, lowercase, common aliases folded.
pub fn normalize_unit(unit: &str) -> String {
    let lower = unit.trim().to_lowercase();
    match lower.as_str() {
        "kilogram" | "kilograms" | "kgs" => "kg".to_string(),
        "gram" | "grams" | "gr" => "g".to_string(),
        "milligram" | "milligrams" => "mg".to_string(),
        "tonne" | "tonnes" | "ton" => "t".to_string(),
        "lbs" | "pound" | "pounds" => "lb".to_string(),
        "litre" | "liter" | "litres" | "liters" | "ltr" => "l".to_string(),
        "millilitre" | "milliliter" | "millilitres" | "milliliters" => "ml".to_string(),
        _ => lower,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnitConversion;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn identical_units_always_compare() {
        let table = UnitTable::empty();
        assert_eq!(table.factor("pcs", "PCS"), Some(1.0));
        assert_eq!(table.factor("kg", "g"), None);
    }

    #[test]
    fn direct_and_inverse_factors() {
        let table = UnitTable::standard();
        assert!(approx(table.factor("g", "kg").unwrap(), 0.001));
        assert!(approx(table.factor("kg", "g").unwrap(), 1000.0));
        assert!(approx(table.convert(2.5, "t", "kg").unwrap(), 2500.0));
    }

    #[test]
    fn chained_lookup_through_pivot() {
        let table = UnitTable::standard();
        // g -> kg -> t
        assert!(approx(table.factor("g", "t").unwrap(), 0.000_001));
        assert!(approx(table.factor("ml", "hl").unwrap(), 0.000_01));
    }

    #[test]
    fn mass_and_volume_do_not_mix() {
        let table = UnitTable::standard();
        assert_eq!(table.factor("kg", "l"), None);
    }

    #[test]
    fn aliases_are_folded() {
        let table = UnitTable::standard();
        assert!(approx(table.factor("Kilograms", "grams").unwrap(), 1000.0));
        assert!(approx(table.factor("Litre", "ml").unwrap(), 1000.0));
    }

    #[test]
    fn configured_conversions_extend_table() {
        let section = UnitsSection {
            conversions: vec![UnitConversion {
                from: "crate".into(),
                to: "kg".into(),
                factor: 12.0,
            }],
        };
        let table = UnitTable::from_config(&section);
        assert!(approx(table.convert(2.0, "crate", "kg").unwrap(), 24.0));
        assert!(approx(table.convert(2.0, "crate", "g").unwrap(), 24_000.0));
    }
}
