// Identifiers and timestamps stamped onto persisted records.
//
// Generation requests and training sessions get random version-4 UUID
// strings; every record carries a creation time in whole seconds since the
// Unix epoch.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

/// A random RFC 4122 version-4 UUID, lowercase hyphenated.
pub fn random_uuid(rng: &mut impl Rng) -> String {
    let mut bytes: [u8; 16] = rng.random();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Seconds since the Unix epoch. A clock set before 1970 reads as 0.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn uuid_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let id = random_uuid(&mut rng);
        assert_eq!(id.len(), 36);
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.iter().map(|p| p.len()).collect::<Vec<_>>(), vec![8, 4, 4, 4, 12]);
        assert!(parts[2].starts_with('4'));
        assert!(matches!(parts[3].as_bytes()[0], b'8' | b'9' | b'a' | b'b'));
        assert_ne!(id, random_uuid(&mut rng));
    }

    #[test]
    fn clock_is_after_2020() {
        assert!(unix_now() > 1_577_836_800);
    }
}
