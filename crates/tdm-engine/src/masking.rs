use chrono::{Days, NaiveDate, Utc};
use fake::Fake;
use fake::faker::company::en::CompanyName;
use fake::faker::internet::en::FreeEmail;
use fake::faker::name::en::Name;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use tdm_core::{FieldValue, MaskKind, MaskMap, MaskMethod, Record};

const MIN_AGE_YEARS: u64 = 21;
const MAX_AGE_YEARS: u64 = 115;

/// Replaces field values with synthetic data.
///
/// Mask methods are resolved when the template is parsed, so applying a mask
/// cannot fail.
#[derive(Debug, Clone)]
pub struct MaskApplier {
    rng: ChaCha8Rng,
    today: NaiveDate,
}

impl MaskApplier {
    /// Applier seeded for reproducible `fake.*` values.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            today: Utc::now().date_naive(),
        }
    }

    /// Applier with a random seed.
    pub fn random() -> Self {
        Self::seeded(rand::random())
    }

    /// Pin the reference date used for `date_of_birth` values.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Build the masked record: every masked field present in `record` is
    /// replaced by a generated string; other fields are carried over as-is.
    pub fn apply(&mut self, record: Record, masks: &MaskMap) -> Record {
        if masks.is_empty() {
            return record;
        }
        record
            .into_iter()
            .map(|(field, value)| match masks.get(&field) {
                Some(method) => (field, FieldValue::Text(self.generate(*method))),
                None => (field, value),
            })
            .collect()
    }

    /// Generate one value for `method`, coerced to a string.
    pub fn generate(&mut self, method: MaskMethod) -> String {
        match method {
            MaskMethod::Fixed(kind) => kind.fixed_value().to_string(),
            MaskMethod::Fake(kind) => self.fake(kind),
        }
    }

    fn fake(&mut self, kind: MaskKind) -> String {
        let rng = &mut self.rng;
        match kind {
            MaskKind::Company => CompanyName().fake_with_rng(rng),
            MaskKind::Email => FreeEmail().fake_with_rng(rng),
            MaskKind::Name => Name().fake_with_rng(rng),
            MaskKind::DateOfBirth => {
                let days = rng.random_range(MIN_AGE_YEARS * 365..=MAX_AGE_YEARS * 365);
                self.today
                    .checked_sub_days(Days::new(days))
                    .unwrap_or(self.today)
                    .format("%Y-%m-%d")
                    .to_string()
            }
            MaskKind::Ein => {
                let prefix = rng.random_range(10..=99);
                let serial = rng.random_range(0..=9_999_999);
                format!("{prefix:02}-{serial:07}")
            }
            MaskKind::Ssn => {
                let mut area = rng.random_range(1..=899);
                if area == 666 {
                    area = 665;
                }
                let group = rng.random_range(1..=99);
                let serial = rng.random_range(1..=9999);
                format!("{area:03}-{group:02}-{serial:04}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masks(pairs: &[(&str, &str)]) -> MaskMap {
        pairs
            .iter()
            .map(|(field, method)| (field.to_string(), method.parse().unwrap()))
            .collect()
    }

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(field, value)| (*field, FieldValue::from(*value)))
            .collect()
    }

    #[test]
    fn fixed_masks_are_constant() {
        let mut applier = MaskApplier::seeded(7);
        let masked = applier.apply(
            record(&[("Name", "Real Person"), ("SSN__c", "123-45-6789"), ("City", "Austin")]),
            &masks(&[("Name", "fixed.name"), ("SSN__c", "fixed.ssn")]),
        );
        assert_eq!(masked.text("Name").as_deref(), Some("Valerie Duke"));
        assert_eq!(masked.text("SSN__c").as_deref(), Some("247-03-5127"));
        assert_eq!(masked.text("City").as_deref(), Some("Austin"));
        let keys: Vec<&str> = masked.keys().collect();
        assert_eq!(keys, vec!["Name", "SSN__c", "City"]);
    }

    #[test]
    fn fake_masks_are_reproducible_per_seed() {
        let all = masks(&[
            ("A", "fake.company"),
            ("B", "fake.email"),
            ("C", "fake.name"),
            ("D", "fake.date_of_birth"),
            ("E", "fake.ein"),
            ("F", "fake.ssn"),
        ]);
        let input = record(&[("A", "a"), ("B", "b"), ("C", "c"), ("D", "d"), ("E", "e"), ("F", "f")]);
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let first = MaskApplier::seeded(42)
            .with_today(today)
            .apply(input.clone(), &all);
        let second = MaskApplier::seeded(42)
            .with_today(today)
            .apply(input.clone(), &all);
        assert_eq!(first, second);
        assert_ne!(first.text("A").as_deref(), Some("a"));
        assert!(first.text("B").unwrap().contains('@'));
    }

    #[test]
    fn fake_values_have_expected_shapes() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut applier = MaskApplier::seeded(3).with_today(today);
        for _ in 0..50 {
            let ssn = applier.generate(MaskMethod::Fake(MaskKind::Ssn));
            let parts: Vec<&str> = ssn.split('-').collect();
            assert_eq!(parts.iter().map(|p| p.len()).collect::<Vec<_>>(), vec![3, 2, 4]);
            assert_ne!(parts[0], "666");

            let ein = applier.generate(MaskMethod::Fake(MaskKind::Ein));
            assert_eq!(ein.len(), 10);
            assert_eq!(&ein[2..3], "-");

            let dob = applier.generate(MaskMethod::Fake(MaskKind::DateOfBirth));
            let dob = NaiveDate::parse_from_str(&dob, "%Y-%m-%d").unwrap();
            let age_days = (today - dob).num_days();
            assert!(age_days >= 21 * 365 && age_days <= 115 * 365);
        }
    }

    #[test]
    fn masks_do_not_add_missing_fields() {
        let mut applier = MaskApplier::seeded(1);
        let masked = applier.apply(record(&[("Name", "x")]), &masks(&[("Email", "fixed.email")]));
        assert_eq!(masked.len(), 1);
        assert!(!masked.contains("Email"));
    }
}
