//! Validated text types shared across the LifeTag crates.

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// The input exceeded the allowed length
    #[error("Text exceeds {max} characters")]
    TooLong { max: usize },
}

/// A string type that guarantees non-empty content.
///
/// The input is trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// Returns `Err(TextError::Empty)` if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Like [`NonEmptyText::new`], additionally rejecting input longer than `max` characters
    /// after trimming.
    pub fn bounded(input: impl AsRef<str>, max: usize) -> Result<Self, TextError> {
        let text = Self::new(input)?;
        if text.0.chars().count() > max {
            return Err(TextError::TooLong { max });
        }
        Ok(text)
    }

    /// Bounded free text where absent and blank input both mean `None`.
    pub fn optional(input: Option<impl AsRef<str>>, max: usize) -> Result<Option<Self>, TextError> {
        match input.map(|s| Self::bounded(s, max)) {
            None | Some(Err(TextError::Empty)) => Ok(None),
            Some(text) => text.map(Some),
        }
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_rejects_blank() {
        assert_eq!(NonEmptyText::new("  no longer needed ").unwrap().as_str(), "no longer needed");
        assert!(matches!(NonEmptyText::new("   "), Err(TextError::Empty)));
    }

    #[test]
    fn bounded_rejects_long_input() {
        assert!(NonEmptyText::bounded("abcd", 4).is_ok());
        assert!(matches!(
            NonEmptyText::bounded("abcde", 4),
            Err(TextError::TooLong { max: 4 })
        ));
    }

    #[test]
    fn optional_drops_blank_input_but_not_long_input() {
        assert_eq!(NonEmptyText::optional(Some("  "), 4).unwrap(), None);
        assert_eq!(NonEmptyText::optional(None::<&str>, 4).unwrap(), None);
        assert_eq!(
            NonEmptyText::optional(Some(" clinic "), 6).unwrap().unwrap().as_str(),
            "clinic"
        );
        assert!(matches!(
            NonEmptyText::optional(Some("moved clinic"), 6),
            Err(TextError::TooLong { max: 6 })
        ));
    }

    #[test]
    fn deserialize_rejects_blank() {
        let result: Result<NonEmptyText, _> = serde_json::from_str("\"  \"");
        assert!(result.is_err());
    }
}
