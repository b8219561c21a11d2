use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::PolicyError;

/// Identity of an authenticated learner, as issued by the auth provider.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a fresh random id. Mostly useful for tests and seeding.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn value(&self) -> Uuid {
        self.0
    }
}

/// Converts a raw integer coming from a request into a positive `u32`.
fn positive_u32(field: &'static str, raw: i64) -> Result<u32, PolicyError> {
    if raw <= 0 {
        return Err(PolicyError::NotPositive { field, value: raw });
    }
    u32::try_from(raw).map_err(|_| PolicyError::OutOfRange { field, value: raw })
}

macro_rules! positive_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub struct $name(u32);

        impl $name {
            /// Validates a raw id. Zero and negative values are rejected, not clamped.
            ///
            /// # Errors
            ///
            /// Returns `PolicyError::NotPositive` for values `<= 0` and
            /// `PolicyError::OutOfRange` for values that do not fit in `u32`.
            pub fn try_from_raw(raw: i64) -> Result<Self, PolicyError> {
                positive_u32($field, raw).map(Self)
            }

            #[must_use]
            pub fn value(&self) -> u32 {
                self.0
            }
        }

        impl TryFrom<i64> for $name {
            type Error = PolicyError;

            fn try_from(raw: i64) -> Result<Self, Self::Error> {
                Self::try_from_raw(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                i64::from(id.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = PolicyError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| PolicyError::NotAnInteger {
                        field: $field,
                        raw: s.to_string(),
                    })?;
                Self::try_from_raw(raw)
            }
        }
    };
}

positive_id!(
    /// 1-based module number.
    ModuleId,
    "moduleId"
);
positive_id!(
    /// 1-based section number within a module.
    SectionId,
    "sectionId"
);
positive_id!(
    /// 1-based page number within a section.
    PageNumber,
    "pageNumber"
);

impl SectionId {
    /// Section 1, which is always accessible.
    pub const FIRST: SectionId = SectionId(1);
}

/// Store-assigned id of a quiz attempt.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuizAttemptId(i64);

impl QuizAttemptId {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn value(&self) -> i64 {
        self.0
    }
}

/// Serialization key for section-level state: one learner, one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionKey {
    pub user_id: UserId,
    pub module_id: ModuleId,
    pub section_id: SectionId,
}

impl SectionKey {
    #[must_use]
    pub fn new(user_id: UserId, module_id: ModuleId, section_id: SectionId) -> Self {
        Self {
            user_id,
            module_id,
            section_id,
        }
    }
}

// ─── Debug / Display ───────────────────────────────────────────────────────────

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for QuizAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuizAttemptId({})", self.0)
    }
}

impl fmt::Display for QuizAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(UserId)
            .map_err(|_| PolicyError::InvalidUserId(s.to_string()))
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_id_rejects_zero_and_negative() {
        assert!(matches!(
            SectionId::try_from_raw(0),
            Err(PolicyError::NotPositive { value: 0, .. })
        ));
        assert!(matches!(
            SectionId::try_from_raw(-3),
            Err(PolicyError::NotPositive { value: -3, .. })
        ));
    }

    #[test]
    fn module_id_rejects_values_beyond_u32() {
        let err = ModuleId::try_from_raw(i64::from(u32::MAX) + 1).unwrap_err();
        assert!(matches!(err, PolicyError::OutOfRange { field: "moduleId", .. }));
    }

    #[test]
    fn page_number_parses_from_str() {
        let page: PageNumber = " 4 ".parse().unwrap();
        assert_eq!(page.value(), 4);
        assert!("zero".parse::<PageNumber>().is_err());
        assert!("0".parse::<PageNumber>().is_err());
    }

    #[test]
    fn ids_deserialize_through_validation() {
        let ok: SectionId = serde_json::from_str("2").unwrap();
        assert_eq!(ok, SectionId::try_from_raw(2).unwrap());
        assert!(serde_json::from_str::<SectionId>("0").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "2");
    }

    #[test]
    fn user_id_parses_uuid_text() {
        let id = UserId::random();
        let parsed: UserId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!(matches!(
            "not-a-uuid".parse::<UserId>(),
            Err(PolicyError::InvalidUserId(_))
        ));
    }
}
