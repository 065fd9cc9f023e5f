//! Small shared helpers.

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Length of the ping token that addresses a job publicly
pub const PUBLIC_ID_LEN: usize = 12;

/// Generate a candidate ping token: short uppercase hex, URL-safe.
/// Uniqueness against existing jobs is the caller's responsibility.
pub fn generate_public_id() -> String {
    (0..PUBLIC_ID_LEN)
        .map(|_| HEX_UPPER[fastrand::usize(..HEX_UPPER.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_id_shape() {
        let token = generate_public_id();
        assert_eq!(token.len(), PUBLIC_ID_LEN);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_public_ids_are_not_constant() {
        let a = generate_public_id();
        let b = generate_public_id();
        let c = generate_public_id();
        assert!(a != b || b != c);
    }
}
