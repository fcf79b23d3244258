/// Persisted ids are 24 lowercase hex characters (12 random bytes).
/// Private room ids are built from two of these, see [`private_room_id`].
pub const OBJECT_ID_LEN: usize = 24;

pub fn new_object_id() -> String {
    let bytes: [u8; 12] = rand::random();
    hex::encode(bytes)
}

pub fn is_object_id(s: &str) -> bool {
    s.len() == OBJECT_ID_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Room id for a one-on-one call: both user ids, sorted, joined with `-`.
pub fn private_room_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}-{}", a, b)
    } else {
        format!("{}-{}", b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_lowercase_hex() {
        for _ in 0..32 {
            let id = new_object_id();
            assert!(is_object_id(&id), "bad id {}", id);
        }
    }

    #[test]
    fn uppercase_hex_is_not_an_object_id() {
        assert!(!is_object_id("507F1F77BCF86CD799439011"));
        assert!(!is_object_id("507f1f77bcf86cd79943901"));
    }

    #[test]
    fn private_room_id_is_order_independent() {
        let a = "507f1f77bcf86cd799439011";
        let b = "507f191e810c19729de860ea";
        assert_eq!(private_room_id(a, b), private_room_id(b, a));
        assert_eq!(
            private_room_id(a, b),
            "507f191e810c19729de860ea-507f1f77bcf86cd799439011"
        );
    }
}
