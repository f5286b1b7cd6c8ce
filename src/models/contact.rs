use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a contact is the canonical record of its cluster or linked to one.
///
/// A secondary always carries the id it links to, so an unlinked secondary
/// cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "linkPrecedence", rename_all = "lowercase")]
pub enum LinkPrecedence {
    Primary,
    Secondary {
        #[serde(rename = "linkedId")]
        linked_id: i64,
    },
}

impl LinkPrecedence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary { .. } => "secondary",
        }
    }

    /// Rebuild from the stored `(link_precedence, linked_id)` column pair.
    /// Returns `None` when the pair is inconsistent.
    pub fn from_parts(precedence: &str, linked_id: Option<i64>) -> Option<Self> {
        match (precedence, linked_id) {
            ("primary", None) => Some(Self::Primary),
            ("secondary", Some(linked_id)) => Some(Self::Secondary { linked_id }),
            _ => None,
        }
    }

    pub fn linked_id(&self) -> Option<i64> {
        match self {
            Self::Primary => None,
            Self::Secondary { linked_id } => Some(*linked_id),
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Primary)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: i64,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    #[serde(flatten)]
    pub link_precedence: LinkPrecedence,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence.is_primary()
    }

    pub fn linked_id(&self) -> Option<i64> {
        self.link_precedence.linked_id()
    }

    /// The id of the primary this contact answers to: itself when primary,
    /// otherwise the contact it links to.
    pub fn governing_id(&self) -> i64 {
        self.linked_id().unwrap_or(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: i64, link_precedence: LinkPrecedence) -> Contact {
        let now = Utc::now();
        Contact {
            id,
            email: Some("a@x.com".to_string()),
            phone_number: None,
            link_precedence,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_from_parts() {
        assert_eq!(
            LinkPrecedence::from_parts("primary", None),
            Some(LinkPrecedence::Primary)
        );
        assert_eq!(
            LinkPrecedence::from_parts("secondary", Some(4)),
            Some(LinkPrecedence::Secondary { linked_id: 4 })
        );
        assert_eq!(LinkPrecedence::from_parts("secondary", None), None);
        assert_eq!(LinkPrecedence::from_parts("primary", Some(4)), None);
        assert_eq!(LinkPrecedence::from_parts("tertiary", None), None);
    }

    #[test]
    fn test_governing_id() {
        assert_eq!(contact(7, LinkPrecedence::Primary).governing_id(), 7);
        assert_eq!(
            contact(9, LinkPrecedence::Secondary { linked_id: 7 }).governing_id(),
            7
        );
    }

    #[test]
    fn test_serialized_shape() {
        let value = serde_json::to_value(contact(9, LinkPrecedence::Secondary { linked_id: 7 }))
            .unwrap();
        assert_eq!(value["linkPrecedence"], "secondary");
        assert_eq!(value["linkedId"], 7);
        assert_eq!(value["phoneNumber"], serde_json::Value::Null);

        let value = serde_json::to_value(contact(7, LinkPrecedence::Primary)).unwrap();
        assert_eq!(value["linkPrecedence"], "primary");
        assert!(value.get("linkedId").is_none());
    }
}
