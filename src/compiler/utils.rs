//! Formatting, naming and hashing helpers shared by the compiler modules.

/// Format a float for WGSL, removing trailing zeros.
pub fn fmt_f32(v: f32) -> String {
    if v.is_finite() {
        let s = format!("{v:.9}");
        let s = s.trim_end_matches('0');
        if let Some(stripped) = s.strip_suffix('.') {
            format!("{stripped}.0")
        } else {
            s.to_string()
        }
    } else {
        "0.0".to_string()
    }
}

/// Sanitize a string to be a valid WGSL identifier fragment.
pub fn sanitize_wgsl_ident(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub fn fnv1a64_with_seed(bytes: &[u8], seed: u64) -> u64 {
    let mut hash = FNV_OFFSET ^ seed;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Deterministic name prefix for a node id: `node_<sanitized id>_<8 hex digits>`.
///
/// The hash suffix keeps ids that sanitize to the same text apart.
pub fn node_prefix(node_id: &str) -> String {
    let hash = fnv1a64_with_seed(node_id.as_bytes(), 0) as u32;
    format!("node_{}_{:08x}", sanitize_wgsl_ident(node_id), hash)
}

/// Seed folded into every structural hash.
pub const STRUCTURAL_HASH_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Order-sensitive rolling hash used for structural and code fingerprints.
///
/// FNV-1a over a byte stream. Strings are length-prefixed so that
/// `("ab", "c")` and `("a", "bc")` fold differently.
#[derive(Clone, Copy, Debug)]
pub struct StructuralHasher {
    state: u64,
}

impl Default for StructuralHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuralHasher {
    pub fn new() -> Self {
        Self {
            state: FNV_OFFSET ^ STRUCTURAL_HASH_SEED,
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.state ^= b as u64;
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.write_bytes(s.as_bytes());
    }

    pub fn finish(&self) -> u64 {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt_f32_keeps_a_decimal_point() {
        assert_eq!(fmt_f32(1.0), "1.0");
        assert_eq!(fmt_f32(0.25), "0.25");
        assert_eq!(fmt_f32(-3.5), "-3.5");
        assert_eq!(fmt_f32(f32::NAN), "0.0");
    }

    #[test]
    fn prefixes_are_deterministic_and_distinct() {
        assert_eq!(node_prefix("Sphere_1"), node_prefix("Sphere_1"));
        assert_ne!(node_prefix("a-b"), node_prefix("a_b"));
        assert!(node_prefix("a-b").starts_with("node_a_b_"));
    }

    #[test]
    fn hasher_is_order_sensitive() {
        let mut a = StructuralHasher::new();
        a.write_str("ab");
        a.write_str("c");
        let mut b = StructuralHasher::new();
        b.write_str("a");
        b.write_str("bc");
        assert_ne!(a.finish(), b.finish());

        let mut x = StructuralHasher::new();
        x.write_u64(1);
        x.write_u64(2);
        let mut y = StructuralHasher::new();
        y.write_u64(2);
        y.write_u64(1);
        assert_ne!(x.finish(), y.finish());
    }
}
