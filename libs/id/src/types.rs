//! Identifier types.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

use crate::IdError;

// =============================================================================
// Resource ID
// =============================================================================

/// Identifier of a storage or network resource.
///
/// Canonical form is `tid_` followed by two digits (10..=98) and four
/// lowercase ASCII letters, e.g. `tid_42qwer`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(String);

impl ResourceId {
    /// The prefix for resource IDs.
    pub const PREFIX: &'static str = "tid";

    const DIGITS: usize = 2;
    const LETTERS: usize = 4;

    /// Draws a random resource ID. Uniqueness is the caller's concern.
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let number: u8 = rng.random_range(10..99);
        let letters: String = (0..Self::LETTERS)
            .map(|_| char::from(rng.random_range(b'a'..=b'z')))
            .collect();
        Self(format!("{}_{number}{letters}", Self::PREFIX))
    }

    /// Parses a resource ID from a string.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let Some((prefix, body)) = s.split_once('_') else {
            return Err(IdError::MissingSeparator('_'));
        };

        if prefix != Self::PREFIX {
            return Err(IdError::InvalidPrefix {
                expected: Self::PREFIX,
                actual: prefix.to_string(),
            });
        }

        let bytes = body.as_bytes();
        if bytes.len() != Self::DIGITS + Self::LETTERS {
            return Err(IdError::InvalidFormat {
                message: format!("expected 6 characters after prefix, got {}", bytes.len()),
            });
        }

        let (digits, letters) = bytes.split_at(Self::DIGITS);
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(IdError::InvalidFormat {
                message: format!("'{body}' must start with two digits"),
            });
        }
        if !letters.iter().all(u8::is_ascii_lowercase) {
            return Err(IdError::InvalidFormat {
                message: format!("'{body}' must end with four lowercase letters"),
            });
        }

        Ok(Self(s.to_string()))
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for ResourceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ResourceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Job ID
// =============================================================================

/// Identifier of a job: `<TYPE>-<creation epoch millis>`.
///
/// The type tag is kept as text here; mapping it to a job type is the
/// protocol crate's job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId {
    tag: String,
    created_ms: i64,
}

impl JobId {
    /// Builds a job ID from a type tag and its creation time.
    #[must_use]
    pub fn new(tag: impl Into<String>, created_ms: i64) -> Self {
        Self {
            tag: tag.into(),
            created_ms,
        }
    }

    /// Parses a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let Some((tag, millis)) = s.rsplit_once('-') else {
            return Err(IdError::MissingSeparator('-'));
        };

        if tag.is_empty()
            || !tag
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(IdError::InvalidFormat {
                message: format!("job type tag '{tag}' must be UPPER_SNAKE_CASE"),
            });
        }

        let created_ms = millis.parse::<i64>().map_err(|_| IdError::InvalidFormat {
            message: format!("'{millis}' is not an epoch millisecond timestamp"),
        })?;

        Ok(Self {
            tag: tag.to_string(),
            created_ms,
        })
    }

    /// Returns the job type tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns the creation timestamp encoded in the ID.
    #[must_use]
    pub const fn created_ms(&self) -> i64 {
        self.created_ms
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.tag, self.created_ms)
    }
}

impl FromStr for JobId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for JobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Agent ID
// =============================================================================

/// Identifier of one agent channel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgentId(uuid::Uuid);

impl AgentId {
    /// Creates a fresh random agent ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn uuid(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
