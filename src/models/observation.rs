/// One incoming sighting of an identity: an email, a phone number, or both.
///
/// Fields are trimmed and empty strings are treated as absent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Observation {
    email: Option<String>,
    phone_number: Option<String>,
}

impl Observation {
    pub fn new(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email: clean(email),
            phone_number: clean(phone_number),
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    /// True when neither field carries a value.
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone_number.is_none()
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_fields_are_absent() {
        let obs = Observation::new(Some("  ".to_string()), Some(String::new()));
        assert!(obs.is_empty());
        assert_eq!(obs.email(), None);
        assert_eq!(obs.phone_number(), None);
    }

    #[test]
    fn test_fields_are_trimmed() {
        let obs = Observation::new(Some(" a@x.com ".to_string()), Some("111\n".to_string()));
        assert!(!obs.is_empty());
        assert_eq!(obs.email(), Some("a@x.com"));
        assert_eq!(obs.phone_number(), Some("111"));
    }
}
