//! The patient tag: a permanent handle printed on a card or encoded in a QR code so that an
//! emergency responder can look up a patient's record set.
//!
//! Format: `LT-XXXX-XXXX-XXXX`, where each `X` is a Crockford base32 symbol
//! (`0-9`, `A-Z` without `I`, `L`, `O`, `U`). Parsing is forgiving about case, spacing, and
//! the usual read-aloud confusions (`I`/`L` → `1`, `O` → `0`) so that hand-typed tags resolve.

use crate::{IdError, IdResult};
use std::{fmt, str::FromStr};
use uuid::Uuid;

const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const PREFIX: &str = "LT";
const SYMBOLS: usize = 12;
const GROUP: usize = 4;

/// A patient's permanent tag. Never reassigned or reused.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(String);

impl TagId {
    /// Generates a random tag.
    ///
    /// Uniqueness across the registry is enforced by the caller, which keeps the set of every
    /// tag it has ever issued.
    pub fn generate() -> Self {
        let bits = Uuid::new_v4().as_u128();
        let symbols: String = (0..SYMBOLS)
            .map(|i| {
                let index = ((bits >> (i * 5)) & 0x1f) as usize;
                ALPHABET[index] as char
            })
            .collect();
        Self(symbols)
    }

    /// Parses a tag in any of its accepted spellings.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidInput`] if the prefix is missing, a symbol is outside the
    /// alphabet, or the symbol count is wrong.
    pub fn parse(input: &str) -> IdResult<Self> {
        let compact: String = input
            .chars()
            .filter(|c| !matches!(c, '-' | ' '))
            .map(|c| c.to_ascii_uppercase())
            .collect();

        let body = compact.strip_prefix(PREFIX).ok_or_else(|| {
            IdError::InvalidInput(format!("tag must start with '{}': '{}'", PREFIX, input))
        })?;

        let mut symbols = String::with_capacity(SYMBOLS);
        for c in body.chars() {
            let normalised = match c {
                'I' | 'L' => '1',
                'O' => '0',
                other => other,
            };
            if !ALPHABET.contains(&(normalised as u8)) || !normalised.is_ascii() {
                return Err(IdError::InvalidInput(format!(
                    "tag contains an invalid symbol '{}': '{}'",
                    c, input
                )));
            }
            symbols.push(normalised);
        }

        if symbols.len() != SYMBOLS {
            return Err(IdError::InvalidInput(format!(
                "tag must have {} symbols, got {}: '{}'",
                SYMBOLS,
                symbols.len(),
                input
            )));
        }

        Ok(Self(symbols))
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", PREFIX)?;
        for chunk in self.0.as_bytes().chunks(GROUP) {
            // Symbols are drawn from an ASCII alphabet.
            write!(f, "-{}", String::from_utf8_lossy(chunk))?;
        }
        Ok(())
    }
}

impl FromStr for TagId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TagId::parse(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for TagId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for TagId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TagId::parse(&s).map_err(serde::de::Error::custom)
    }
}
