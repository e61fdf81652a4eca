use std::fmt;
use std::str::FromStr;

use snafu::ResultExt;
use uuid::Uuid;

use super::error::{InvalidIdSnafu, StorageError, StorageResult};

// All id wrappers share one shape so row decoding stays uniform.
macro_rules! define_storage_id {
    ($name:ident, $id_type:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(raw: Uuid) -> Self {
                Self(raw)
            }

            pub fn parse(raw: &str) -> StorageResult<Self> {
                let parsed = Uuid::parse_str(raw).context(InvalidIdSnafu {
                    stage: "parse-storage-id",
                    id_type: $id_type,
                    raw: raw.to_string(),
                })?;
                Ok(Self(parsed))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = StorageError;

            fn from_str(raw: &str) -> StorageResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_storage_id!(SessionId, "session-id");
define_storage_id!(TurnId, "turn-id");

impl SessionId {
    /// Random id, minted once per running chat session.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl TurnId {
    /// Time-ordered id, so turns inserted within the same millisecond still sort.
    pub fn new_v7() -> Self {
        Self(Uuid::now_v7())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_display() {
        let id = TurnId::new_v7();
        let parsed = TurnId::parse(&id.to_string()).expect("valid turn id");
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_garbage() {
        let error = SessionId::parse("not-a-uuid").expect_err("invalid id must fail");
        assert!(matches!(
            error,
            StorageError::InvalidId {
                id_type: "session-id",
                ..
            }
        ));
    }

    #[test]
    fn random_session_ids_differ() {
        assert_ne!(SessionId::new_random(), SessionId::new_random());
    }
}
