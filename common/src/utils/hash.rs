//! SHA-256 helpers used for identities that must stay stable across runs.

use sha2::{Digest, Sha256};

/// Hashes every part in order, separating them so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn digest<I, S>(parts: I) -> [u8; 32]
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        let part = part.as_ref();
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

pub fn digest_hex<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    hex::encode(digest(parts))
}

/// Order-independent hash of a collection of strings.
pub fn set_hash<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut sorted: Vec<String> = items.into_iter().map(|s| s.as_ref().to_string()).collect();
    sorted.sort();
    sorted.dedup();
    digest_hex(sorted)
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_hash_ignores_order_and_duplicates() {
        let a = set_hash(["evilcorp.com", "1.2.3.0/24"]);
        let b = set_hash(["1.2.3.0/24", "evilcorp.com", "evilcorp.com"]);
        assert_eq!(a, b);
        assert_ne!(a, set_hash(["evilcorp.com"]));
    }

    #[test]
    fn digest_separates_parts() {
        assert_ne!(digest(["ab", "c"]), digest(["a", "bc"]));
    }
}
