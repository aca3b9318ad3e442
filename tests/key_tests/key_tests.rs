//! Tests for the composite key codec
//!
//! These tests verify:
//! - Encoded byte order equals logical tuple order (property tests)
//! - Keys decode back to the values they were built from
//! - Malformed keys are rejected with an error, never a panic

use proptest::prelude::*;
use tabula::key::{entity_of, KeyReader};
use tabula::{decode_key, encode_key, key, Entity, Key, TabulaError, SEQUENCES_ENTITY};

// =============================================================================
// Ordering Properties
// =============================================================================

proptest! {
    #[test]
    fn uint_order_matches_value_order(a in any::<u64>(), b in any::<u64>()) {
        let ka = encode_key(1, &a);
        let kb = encode_key(1, &b);
        prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
    }

    #[test]
    fn int_order_matches_value_order(a in any::<i64>(), b in any::<i64>()) {
        let ka = encode_key(1, &a);
        let kb = encode_key(1, &b);
        prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
    }

    #[test]
    fn string_order_matches_value_order(a in "\\PC{0,12}", b in "\\PC{0,12}") {
        let ka = encode_key(1, &a);
        let kb = encode_key(1, &b);
        prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
    }

    #[test]
    fn tuple_order_matches_value_order(
        a in ("[a-d]{0,3}", any::<u64>()),
        b in ("[a-d]{0,3}", any::<u64>()),
    ) {
        let ka = encode_key(7, &a);
        let kb = encode_key(7, &b);
        prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
    }

    #[test]
    fn mixed_tuple_order_matches_value_order(
        a in (any::<i32>(), any::<bool>(), "[xyz]{0,2}"),
        b in (any::<i32>(), any::<bool>(), "[xyz]{0,2}"),
    ) {
        prop_assert_eq!(a.cmp(&b), encode_key(3, &a).cmp(&encode_key(3, &b)));
    }

    #[test]
    fn entity_order_dominates(ea in any::<u32>(), eb in any::<u32>(), a in any::<u64>(), b in any::<u64>()) {
        prop_assume!(ea != eb);
        let ka = encode_key(ea, &a);
        let kb = encode_key(eb, &b);
        prop_assert_eq!(ea.cmp(&eb), ka.cmp(&kb));
    }

    #[test]
    fn prefix_query_covers_exactly_its_rows(s in "[ab]{0,3}", t in "[ab]{0,3}", id in any::<u64>()) {
        // A row (s, id) lies under the prefix (t) iff s == t
        let row = key!(9, s.as_str(), id);
        let prefix = key!(9, t.as_str());
        prop_assert_eq!(s == t, row.as_bytes().starts_with(prefix.as_bytes()));
    }
}

// =============================================================================
// Round-trip Properties
// =============================================================================

proptest! {
    #[test]
    fn tuple_roundtrip(entity in any::<u32>(), s in "\\PC{0,16}", n in any::<i64>(), id in any::<u64>(), flag in any::<bool>()) {
        let encoded = encode_key(entity, &(s.clone(), n, id, flag));
        let (e, decoded) = decode_key::<(String, i64, u64, bool)>(&encoded).expect("decode");
        prop_assert_eq!(e, entity);
        prop_assert_eq!(decoded, (s, n, id, flag));
    }

    #[test]
    fn trailing_bytes_roundtrip(id in any::<u64>(), raw in prop::collection::vec(any::<u8>(), 0..32)) {
        let encoded = encode_key(2, &(id, raw.clone()));
        let (_, decoded) = decode_key::<(u64, Vec<u8>)>(&encoded).expect("decode");
        prop_assert_eq!(decoded, (id, raw));
    }
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_key_macro_matches_encode_key() {
    let built = key!(5, "alice", 42u64);
    assert_eq!(built.as_bytes(), encode_key(5, &("alice", 42u64)).as_slice());
}

#[test]
fn test_key_without_segments_is_entity_only() {
    let k = key!(1);
    assert_eq!(k.as_bytes(), &[1, 1]);
    assert_eq!(entity_of(&k).unwrap(), 1);
}

#[test]
fn test_key_push_and_with() {
    let mut a = Key::new(3);
    a.push(&"x").push(&1u8);
    let b = Key::new(3).with(&"x").with(&1u8);
    assert_eq!(a, b);
    assert_eq!(Vec::from(b), a.into_vec());
}

#[test]
fn test_sequences_entity_sorts_after_tables() {
    let table: Entity = 1_000_000;
    assert!(key!(table, u64::MAX).as_bytes() < key!(SEQUENCES_ENTITY).as_bytes());
}

#[test]
fn test_decode_leading_segments_only() {
    let k = key!(4, "bob", 17u64, -3i64);
    let (entity, name) = decode_key::<String>(&k).unwrap();
    assert_eq!(entity, 4);
    assert_eq!(name, "bob");
}

#[test]
fn test_reader_walks_segments() {
    let k = key!(8, 300u64, "z", true, -1i64);
    let mut reader = KeyReader::new(&k);
    assert_eq!(reader.read_entity().unwrap(), 8);
    assert_eq!(reader.read_uint().unwrap(), 300);
    assert_eq!(reader.read_str().unwrap(), "z");
    assert!(reader.read_bool().unwrap());
    assert_eq!(reader.read_int().unwrap(), -1);
    assert!(reader.is_empty());
    assert_eq!(reader.position(), k.len());
}

// =============================================================================
// Malformed Keys
// =============================================================================

#[test]
fn test_unterminated_string_is_invalid_key_format() {
    let mut bytes = key!(1).into_vec();
    bytes.extend_from_slice(b"no terminator");
    let err = decode_key::<String>(&bytes).unwrap_err();
    assert!(matches!(err, TabulaError::InvalidKeyFormat));
}

#[test]
fn test_try_push_rejects_nul_in_string() {
    let mut k = key!(1, 7u64);
    let before = k.clone();

    let err = k.try_push(&("ok", "a\0b")).unwrap_err();

    assert!(matches!(err, TabulaError::InvalidKeyFormat));
    assert_eq!(k, before);
    assert!(Key::new(1).try_with(&"a\0b".to_string()).is_err());
    assert_eq!(
        Key::new(1).try_with(&("a", 2u64)).unwrap(),
        key!(1, "a", 2u64)
    );
}

#[test]
#[should_panic(expected = "key strings cannot contain NUL")]
fn test_nul_in_string_segment_panics_in_key_macro() {
    let _ = key!(1, "a\0b");
}

#[test]
fn test_truncated_integer_is_error() {
    let k = key!(1, u64::MAX);
    let truncated = &k.as_bytes()[..k.len() - 3];
    assert!(decode_key::<u64>(truncated).is_err());
}

#[test]
fn test_empty_key_is_error() {
    assert!(entity_of(&[]).is_err());
}

#[test]
fn test_out_of_range_narrowing_is_error() {
    let k = key!(1, 300u64);
    assert!(decode_key::<u8>(&k).is_err());
    assert_eq!(decode_key::<u16>(&k).unwrap().1, 300);
}

#[test]
fn test_bad_bool_byte_is_error() {
    let mut bytes = key!(1).into_vec();
    bytes.push(7);
    assert!(decode_key::<bool>(&bytes).is_err());
}
