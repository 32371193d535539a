use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one saga instance.
///
/// Generated when the saga starts and carried as `global_id` on every
/// message that belongs to that instance. It is also the key of the
/// saga's execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalId(Uuid);

impl GlobalId {
    /// Creates a new random global ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero ID, used by zero-value executions.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Creates a global ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns true for the all-zero ID.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for GlobalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GlobalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for GlobalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for GlobalId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<GlobalId> for Uuid {
    fn from(id: GlobalId) -> Self {
        id.0
    }
}

/// Identifier of one message instance.
///
/// A participant that replies twice to the same request produces two
/// different event IDs; a broker redelivery keeps the same one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_id_new_creates_unique_ids() {
        let id1 = GlobalId::new();
        let id2 = GlobalId::new();
        assert_ne!(id1, id2);
        assert!(!id1.is_nil());
    }

    #[test]
    fn global_id_nil_is_nil() {
        assert!(GlobalId::nil().is_nil());
        assert_eq!(GlobalId::nil().as_uuid(), Uuid::nil());
    }

    #[test]
    fn global_id_parses_its_display_form() {
        let id = GlobalId::new();
        let parsed: GlobalId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<GlobalId>().is_err());
    }

    #[test]
    fn ids_serialize_as_bare_uuid_strings() {
        let uuid = Uuid::new_v4();
        let json = serde_json::to_string(&EventId::from_uuid(uuid)).unwrap();
        assert_eq!(json, format!("\"{uuid}\""));

        let id: GlobalId = serde_json::from_str(&json).unwrap();
        assert_eq!(id.as_uuid(), uuid);
    }
}
