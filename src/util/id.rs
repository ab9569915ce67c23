//! Prefixed random identifiers.

/// Generate an id such as `msg-3f0c...` from a random v4 uuid.
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

/// Id for a provider response when the provider supplies none.
pub fn response_id() -> String {
    generate_id("aitxt")
}

/// Id for an object generation response when the provider supplies none.
pub fn object_response_id() -> String {
    generate_id("aiobj")
}

/// Id for an assistant or tool message.
pub fn message_id() -> String {
    generate_id("msg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_are_unique() {
        let a = message_id();
        let b = message_id();

        assert!(a.starts_with("msg-"));
        assert_ne!(a, b);
        assert!(response_id().starts_with("aitxt-"));
        assert!(object_response_id().starts_with("aiobj-"));
    }
}
