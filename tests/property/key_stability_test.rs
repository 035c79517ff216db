// tests/property/key_stability_test.rs

//! Property-based tests for cache key derivation
//! Tests that keys are stable under parameter reordering, ignore debug
//! parameters and always follow the five-segment layout

use pixelcache::core::cache::key::{KeyCodec, TransformParams, fnv1a32};
use proptest::prelude::*;

fn codec() -> KeyCodec {
    KeyCodec::new("transform", vec!["debug".to_string()])
}

fn param_entries() -> impl Strategy<Value = Vec<(String, u32)>> {
    prop::collection::btree_map(
        prop::sample::select(vec!["width", "height", "quality", "blur", "dpr", "rotate"]),
        1u32..5000,
        0..6,
    )
    .prop_map(|m| m.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

fn build(entries: &[(String, u32)]) -> TransformParams {
    let mut params = TransformParams::new();
    for (name, value) in entries {
        params.insert(name, *value);
    }
    params
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_key_ignores_parameter_order(
        path in "/[a-z0-9]{1,12}(/[a-z0-9]{1,12}){0,3}\\.(jpg|png|webp)",
        entries in param_entries(),
    ) {
        let forward = build(&entries);
        let mut reversed_entries = entries.clone();
        reversed_entries.reverse();
        let reversed = build(&reversed_entries);

        let codec = codec();
        prop_assert_eq!(
            codec.compute_key(&path, &forward, None),
            codec.compute_key(&path, &reversed, None)
        );
    }

    #[test]
    fn test_query_order_does_not_change_key(
        path in "/[a-z]{1,10}\\.jpg",
        entries in param_entries(),
    ) {
        let query: Vec<String> = entries.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let mut shuffled = query.clone();
        shuffled.rotate_left(query.len() / 2);

        let codec = codec();
        let params = TransformParams::new();
        prop_assert_eq!(
            codec.compute_key(&path, &params, Some(&query.join("&"))),
            codec.compute_key(&path, &params, Some(&shuffled.join("&")))
        );
    }

    #[test]
    fn test_debug_param_never_affects_key(
        path in "/[a-z]{1,10}\\.png",
        entries in param_entries(),
        debug in "[a-z0-9]{0,8}",
    ) {
        let plain = build(&entries);
        let noisy = build(&entries).with("debug", debug);

        let codec = codec();
        prop_assert_eq!(
            codec.compute_key(&path, &plain, None),
            codec.compute_key(&path, &noisy, None)
        );
    }

    #[test]
    fn test_key_layout_and_hash_suffix(
        path in "(/[A-Za-z0-9 _.-]{0,16}){0,4}",
        entries in param_entries(),
        format in prop::option::of(prop::sample::select(vec!["webp", "avif", "png"])),
    ) {
        let mut params = build(&entries);
        if let Some(format) = format {
            params.insert("format", format);
        }
        let key = codec().compute_key(&path, &params, None);
        let segments: Vec<&str> = key.as_str().split(':').collect();

        prop_assert_eq!(segments.len(), 5);
        prop_assert_eq!(segments[0], "transform");
        prop_assert!(!segments[1].is_empty());
        prop_assert_eq!(segments[3], format.unwrap_or("auto"));
        prop_assert_eq!(segments[4].len(), 8);
        prop_assert!(segments[4].chars().all(|c| c.is_ascii_hexdigit()));
        prop_assert_eq!(key.hash8(), segments[4]);
    }

    #[test]
    fn test_distinct_widths_give_distinct_keys(
        path in "/[a-z]{1,10}\\.jpg",
        a in 1u32..10_000,
        b in 1u32..10_000,
    ) {
        prop_assume!(a != b);
        let codec = codec();
        prop_assert_ne!(
            codec.compute_key(&path, &TransformParams::new().with("width", a), None),
            codec.compute_key(&path, &TransformParams::new().with("width", b), None)
        );
    }

    #[test]
    fn test_fnv_is_deterministic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        prop_assert_eq!(fnv1a32(&bytes), fnv1a32(&bytes.clone()));
    }
}
