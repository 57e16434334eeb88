//! Property-based tests for identifier derivation

use hwcprobe::identity::{function_id, identify, region_content, region_id};
use proptest::prelude::*;
use std::collections::HashSet;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_identify_is_deterministic(content in ".*") {
        prop_assert_eq!(identify(&content), identify(&content.clone()));
    }

    #[test]
    fn prop_function_id_is_identify_of_linkage_name(name in "_Z[0-9]{1,2}[a-z_]{1,20}v") {
        prop_assert_eq!(function_id(&name), identify(&name));
    }

    #[test]
    fn prop_region_id_matches_content_rule(
        file in "[a-z]{1,8}\\.c",
        start in 0u32..10_000,
        len in 0u32..500,
        counters in prop::collection::vec("PAPI_[A-Z]{2,3}_[A-Z]{2,3}", 0..4),
    ) {
        let end = start + len;
        let names: Vec<&str> = counters.iter().map(String::as_str).collect();

        let mut expected = format!("{}:{}:{}", file, start, end);
        for name in &names {
            expected.push(':');
            expected.push_str(name);
        }

        prop_assert_eq!(region_content(&file, start, end, names.iter().copied()), expected.clone());
        prop_assert_eq!(region_id(&file, start, end, names.iter().copied()), identify(&expected));
    }

    #[test]
    fn prop_distinct_names_rarely_collide(names in prop::collection::hash_set("[A-Za-z_][A-Za-z0-9_]{0,30}", 1..200)) {
        let ids: HashSet<u64> = names.iter().map(|n| function_id(n)).collect();
        prop_assert_eq!(ids.len(), names.len());
    }
}

#[test]
fn test_corpus_of_mangled_names_is_collision_free() {
    let ids: HashSet<u64> = (0..10_000)
        .map(|i| function_id(&format!("_Z{}fn{}v", 2 + i.to_string().len(), i)))
        .collect();
    assert_eq!(ids.len(), 10_000);
}

#[test]
fn test_known_identifier() {
    // md5("_Z7computev") bytes 3..11, big-endian
    let digest = md5::compute("_Z7computev");
    let expected = u64::from_be_bytes(digest.0[3..11].try_into().unwrap());
    assert_eq!(function_id("_Z7computev"), expected);
}
