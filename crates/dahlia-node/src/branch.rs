use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Canonical label on an outbound edge.
///
/// Branch keys are always lowercase. [`BranchKey::normalize`] maps whatever
/// the editor emitted as a source handle (`null`, `""`, `"Yes"`, a custom
/// handle) into canonical form and is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BranchKey {
  Default,
  Yes,
  No,
  Custom(String),
}

impl BranchKey {
  /// Normalize a raw source-handle value into a canonical branch key.
  ///
  /// `None` and blank strings map to `default`; `yes`/`no` match
  /// case-insensitively; anything else is lowercased and kept as a custom key.
  pub fn normalize(raw: Option<&str>) -> Self {
    let Some(raw) = raw else {
      return BranchKey::Default;
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
      return BranchKey::Default;
    }
    match trimmed.to_ascii_lowercase().as_str() {
      "default" => BranchKey::Default,
      "yes" => BranchKey::Yes,
      "no" => BranchKey::No,
      other => BranchKey::Custom(other.to_string()),
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      BranchKey::Default => "default",
      BranchKey::Yes => "yes",
      BranchKey::No => "no",
      BranchKey::Custom(key) => key,
    }
  }
}

impl std::fmt::Display for BranchKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Serialize for BranchKey {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

impl<'de> Deserialize<'de> for BranchKey {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct KeyVisitor;

    impl Visitor<'_> for KeyVisitor {
      type Value = BranchKey;

      fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a branch key string")
      }

      fn visit_str<E: de::Error>(self, value: &str) -> Result<BranchKey, E> {
        Ok(BranchKey::normalize(Some(value)))
      }
    }

    deserializer.deserialize_str(KeyVisitor)
  }
}
