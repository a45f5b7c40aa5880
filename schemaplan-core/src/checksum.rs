use crc32fast::Hasher;

/// CRC32 of a migration file, fed line by line without line endings.
///
/// Same scheme Flyway uses for its SQL files, so a checkout that converts
/// `\n` to `\r\n` does not look like an edited migration.
pub fn calculate_checksum(content: &str) -> i32 {
    let mut hasher = Hasher::new();
    for line in content.lines() {
        hasher.update(line.as_bytes());
    }
    hasher.finalize() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_deterministic() {
        let fql = "CreateCollection({ name: \"users\" })\n";
        assert_eq!(calculate_checksum(fql), calculate_checksum(fql));
    }

    #[test]
    fn test_checksum_ignores_line_endings() {
        let unix = "Let([{ var0: 1 }],\nVar(\"var0\"))\n";
        let windows = "Let([{ var0: 1 }],\r\nVar(\"var0\"))\r\n";
        assert_eq!(calculate_checksum(unix), calculate_checksum(windows));
    }

    #[test]
    fn test_checksum_detects_edits() {
        let a = "Delete(Collection(\"users\"))";
        let b = "Delete(Collection(\"accounts\"))";
        assert_ne!(calculate_checksum(a), calculate_checksum(b));
    }

    #[test]
    fn test_checksum_matches_per_line_crc() {
        let content = "CreateRole({ name: \"r\",\n  privileges: [] })\n";
        let mut expected = Hasher::new();
        expected.update(b"CreateRole({ name: \"r\",");
        expected.update(b"  privileges: [] })");
        assert_eq!(calculate_checksum(content), expected.finalize() as i32);
    }

    #[test]
    fn test_checksum_empty() {
        assert_eq!(calculate_checksum(""), 0);
    }
}
