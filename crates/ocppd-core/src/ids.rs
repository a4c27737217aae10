//! Branded ID newtypes.
//!
//! Message correlation ids and client identities are both opaque strings on
//! the wire. Wrapping them in distinct newtypes prevents passing a client id
//! where a correlation id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Correlation identifier shared by a Call and its response.
    ///
    /// Unique per in-flight exchange on a given connection. Fresh ids
    /// (for uncorrelated error responses) are UUID v7.
    MessageId
}

branded_id! {
    /// Identity of a connected client, derived from its connection path.
    ClientId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_new_is_uuid_v7() {
        let id = MessageId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn from_str_ref() {
        let id = ClientId::from("CP001");
        assert_eq!(id.as_str(), "CP001");
    }

    #[test]
    fn display() {
        let id = MessageId::from("19223201");
        assert_eq!(format!("{id}"), "19223201");
    }

    #[test]
    fn into_string() {
        let id = ClientId::from("CP001");
        let s: String = id.into();
        assert_eq!(s, "CP001");
    }

    #[test]
    fn serde_is_transparent() {
        let id = MessageId::from("abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc\"");
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn hash_and_eq() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        let id = ClientId::from("same");
        let _ = set.insert(id.clone());
        let _ = set.insert(id);
        assert_eq!(set.len(), 1);
    }
}
