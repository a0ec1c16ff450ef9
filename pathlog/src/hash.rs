/// FNV-1a 64-bit streaming hash.
///
/// Session ids are FNV-1a hashes over the session key fields of a
/// line, request identity is the hash of the canonical request bytes,
/// and bucket striping masks the same hashes down to a bucket index.
/// Chosen for its simplicity; the distribution is good enough for the
/// bucket counts used here.
///
/// http://www.isthe.com/chongo/tech/comp/fnv/

const FNV_PRIME64: u64 = 1099511628211;
const FNV_BASIS64: u64 = 14695981039346656037;

pub fn hash64_init() -> u64 {
    FNV_BASIS64
}

pub fn hash64_update(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME64);
    }
    hash
}

/// Hash an IP address field without the port number: only the bytes
/// before the first `:` or whitespace participate.
pub fn hash64_update_ipaddr(hash: u64, bytes: &[u8]) -> u64 {
    let lim = bytes
        .iter()
        .position(|&b| matches!(b, b':' | b' ' | b'\t' | b'\n' | b'\x0b' | b'\r'))
        .unwrap_or(bytes.len());
    hash64_update(hash, &bytes[..lim])
}

// This tests:
//  - the empty input yields the offset basis
//  - known reference vectors

#[test]
fn test_hash64_vectors() {
    assert!(hash64_update(hash64_init(), b"") == FNV_BASIS64);
    assert!(hash64_update(hash64_init(), b"a") == 0xaf63dc4c8601ec8c);
    assert!(hash64_update(hash64_init(), b"foobar") == 0x85944171f73967e8);
}

// This tests:
//  - streaming in two parts equals hashing the concatenation

#[test]
fn test_hash64_streaming() {
    let whole = hash64_update(hash64_init(), b"192.168.0.1Mozilla/5.0");
    let parts = hash64_update(hash64_update(hash64_init(), b"192.168.0.1"), b"Mozilla/5.0");
    assert!(whole == parts);
}

// This tests:
//  - the port and anything after whitespace are excluded from the
//    address hash

#[test]
fn test_hash64_ipaddr() {
    let plain = hash64_update(hash64_init(), b"10.0.0.7");
    assert!(hash64_update_ipaddr(hash64_init(), b"10.0.0.7") == plain);
    assert!(hash64_update_ipaddr(hash64_init(), b"10.0.0.7:8080") == plain);
    assert!(hash64_update_ipaddr(hash64_init(), b"10.0.0.7 extra") == plain);
    assert!(hash64_update_ipaddr(hash64_init(), b"10.0.0.7\tx") == plain);
}
