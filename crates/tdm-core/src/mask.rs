use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Kind of synthetic value a mask produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskKind {
    Company,
    DateOfBirth,
    Ein,
    Email,
    Name,
    Ssn,
}

impl MaskKind {
    pub const ALL: [MaskKind; 6] = [
        MaskKind::Company,
        MaskKind::DateOfBirth,
        MaskKind::Ein,
        MaskKind::Email,
        MaskKind::Name,
        MaskKind::Ssn,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MaskKind::Company => "company",
            MaskKind::DateOfBirth => "date_of_birth",
            MaskKind::Ein => "ein",
            MaskKind::Email => "email",
            MaskKind::Name => "name",
            MaskKind::Ssn => "ssn",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Constant value used by the `fixed` family.
    pub fn fixed_value(self) -> &'static str {
        match self {
            MaskKind::Company => "Acme Dynamite, Inc.",
            MaskKind::DateOfBirth => "1970-01-01",
            MaskKind::Ein => "95-8101756",
            MaskKind::Email => "joel19@gmail.com",
            MaskKind::Name => "Valerie Duke",
            MaskKind::Ssn => "247-03-5127",
        }
    }
}

/// Mask method declared per field in a template (`fixed.<kind>` or `fake.<kind>`).
///
/// The set is closed: anything else fails while the template is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MaskMethod {
    /// Deterministic constant per kind.
    Fixed(MaskKind),
    /// Randomized synthetic value per kind.
    Fake(MaskKind),
}

impl MaskMethod {
    pub fn kind(self) -> MaskKind {
        match self {
            MaskMethod::Fixed(kind) | MaskMethod::Fake(kind) => kind,
        }
    }

    /// Every accepted method name, fixed family first.
    pub fn all_names() -> Vec<String> {
        MaskKind::ALL
            .into_iter()
            .map(MaskMethod::Fixed)
            .chain(MaskKind::ALL.into_iter().map(MaskMethod::Fake))
            .map(|method| method.to_string())
            .collect()
    }
}

impl fmt::Display for MaskMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskMethod::Fixed(kind) => write!(f, "fixed.{}", kind.as_str()),
            MaskMethod::Fake(kind) => write!(f, "fake.{}", kind.as_str()),
        }
    }
}

impl FromStr for MaskMethod {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let unknown = || ConfigError::UnknownMaskMethod(value.to_string());
        let (family, kind) = value.split_once('.').ok_or_else(unknown)?;
        let kind = MaskKind::parse(kind).ok_or_else(unknown)?;
        match family {
            "fixed" => Ok(MaskMethod::Fixed(kind)),
            "fake" => Ok(MaskMethod::Fake(kind)),
            _ => Err(unknown()),
        }
    }
}

impl TryFrom<String> for MaskMethod {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MaskMethod> for String {
    fn from(value: MaskMethod) -> Self {
        value.to_string()
    }
}

impl JsonSchema for MaskMethod {
    fn schema_name() -> String {
        "MaskMethod".to_string()
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        SchemaObject {
            instance_type: Some(InstanceType::String.into()),
            enum_values: Some(
                MaskMethod::all_names()
                    .into_iter()
                    .map(serde_json::Value::String)
                    .collect(),
            ),
            ..Default::default()
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_families() {
        assert_eq!(
            "fixed.ssn".parse::<MaskMethod>().unwrap(),
            MaskMethod::Fixed(MaskKind::Ssn)
        );
        assert_eq!(
            "fake.date_of_birth".parse::<MaskMethod>().unwrap(),
            MaskMethod::Fake(MaskKind::DateOfBirth)
        );
    }

    #[test]
    fn rejects_unknown_methods() {
        for bad in ["fake.phone", "random.name", "name", "fixed.", ""] {
            let err = bad.parse::<MaskMethod>().unwrap_err();
            assert!(matches!(err, ConfigError::UnknownMaskMethod(ref m) if m == bad));
        }
    }

    #[test]
    fn display_round_trips_every_name() {
        for name in MaskMethod::all_names() {
            let method: MaskMethod = name.parse().unwrap();
            assert_eq!(method.to_string(), name);
        }
        assert_eq!(MaskMethod::all_names().len(), 12);
    }
}
