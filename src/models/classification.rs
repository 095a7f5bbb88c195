use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};

/// A yes/no verdict for one dietary standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Compliance {
    Yes,
    No,
}

impl From<bool> for Compliance {
    fn from(value: bool) -> Self {
        if value {
            Compliance::Yes
        } else {
            Compliance::No
        }
    }
}

// Model output is loose: accept "Yes", "NO", true, false.
impl<'de> Deserialize<'de> for Compliance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(flag) => Ok(flag.into()),
            Raw::Text(text) => text.trim().parse().map_err(|_| {
                serde::de::Error::custom(format!("expected \"yes\" or \"no\", got {text:?}"))
            }),
        }
    }
}

/// Structured verdict produced once per completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub food_name: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    pub is_vegetarian: Compliance,
    pub is_swaminarayan_compliant: Compliance,
    pub is_jain_compliant: Compliance,
    pub is_vegan_compliant: Compliance,
    pub is_upvas_compliant: Compliance,
    #[serde(default)]
    pub reasons: Vec<String>,
}
