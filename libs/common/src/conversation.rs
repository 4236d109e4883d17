//! Canonical conversation ids for peer-to-peer messaging.

/// Build the conversation id shared by two participants.
///
/// The ids are sorted before joining, so `conversation_id(a, b)` and
/// `conversation_id(b, a)` always agree. The first id is length-prefixed,
/// which keeps the join unambiguous whatever characters the ids contain:
/// `("user_1", "user_2")` becomes `6:user_1:user_2`.
pub fn conversation_id(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{first}:{second}", first.len())
}

/// Return the other participant of a conversation, if `user_id` is one of them.
pub fn peer_of<'a>(a: &'a str, b: &'a str, user_id: &str) -> Option<&'a str> {
    if a == user_id {
        Some(b)
    } else if b == user_id {
        Some(a)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_commutative() {
        let pairs = [
            ("user_1", "user_2"),
            ("zed", "alpha"),
            ("usr_01J", "usr_01H"),
            ("same", "same"),
            ("", "x"),
        ];
        for (a, b) in pairs {
            assert_eq!(conversation_id(a, b), conversation_id(b, a), "{a} / {b}");
        }
    }

    #[test]
    fn conversation_id_orders_lexicographically() {
        assert_eq!(conversation_id("user_2", "user_1"), "6:user_1:user_2");
    }

    #[test]
    fn separators_inside_ids_do_not_collide() {
        assert_ne!(conversation_id("a_b", "c"), conversation_id("a", "b_c"));
        assert_ne!(conversation_id("a:b", "c"), conversation_id("a", "b:c"));
        assert_ne!(conversation_id("1:a", "b"), conversation_id("1", "a:b"));
    }

    #[test]
    fn peer_of_resolves_other_side() {
        assert_eq!(peer_of("a", "b", "a"), Some("b"));
        assert_eq!(peer_of("a", "b", "b"), Some("a"));
        assert_eq!(peer_of("a", "b", "c"), None);
    }
}
