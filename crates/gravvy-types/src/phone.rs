use std::fmt;
use std::str::FromStr;

use phonenumber::{Mode, country};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhoneNumberError {
    #[error("This field may not be blank.")]
    Blank,
    #[error("Enter a valid phone number.")]
    Invalid,
}

/// A phone number that passed validation. Always held in E.164 form, which is
/// also the user's identity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Parse a number written in international format (leading `+`).
    pub fn parse(input: &str) -> Result<Self, PhoneNumberError> {
        Self::parse_in_region(input, None)
    }

    /// Parse a number, assuming `region` when the input carries no country code.
    pub fn parse_in_region(
        input: &str,
        region: Option<country::Id>,
    ) -> Result<Self, PhoneNumberError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PhoneNumberError::Blank);
        }

        let number =
            phonenumber::parse(region, trimmed).map_err(|_| PhoneNumberError::Invalid)?;
        if !phonenumber::is_valid(&number) {
            return Err(PhoneNumberError::Invalid);
        }

        Ok(Self(number.format().mode(Mode::E164).to_string()))
    }

    /// Region of the number, used as the default region when this user
    /// invites contacts typed without a country code.
    pub fn region(&self) -> Option<country::Id> {
        phonenumber::parse(None, &self.0)
            .ok()
            .and_then(|number| number.country().id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PhoneNumber {
    type Err = PhoneNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for PhoneNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for PhoneNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PhoneNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(de::Error::custom)
    }
}
