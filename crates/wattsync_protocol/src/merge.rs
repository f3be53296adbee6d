//! Deep merge of JSON documents.

use serde_json::Value;

/// Merges `patch` into `base`.
///
/// Objects are merged key by key, recursing into nested objects. Any other
/// patch value (including arrays and `null`) replaces the base value. A
/// non-object base is replaced by an object patch.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && patch_value.is_object() => {
                        deep_merge(existing, patch_value);
                    }
                    _ => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn nested_objects_are_merged() {
        let mut base = json!({
            "contractId": "C1",
            "customer": {"address": {"city": "Girona", "postalCode": "17001"}},
            "devices": [{"serial": "A"}]
        });
        let patch = json!({
            "customer": {"address": {"city": "Olot"}},
            "devices": [{"serial": "B"}]
        });

        deep_merge(&mut base, &patch);

        assert_eq!(base["contractId"], "C1");
        assert_eq!(base["customer"]["address"]["city"], "Olot");
        assert_eq!(base["customer"]["address"]["postalCode"], "17001");
        assert_eq!(base["devices"], json!([{"serial": "B"}]));
    }

    #[test]
    fn scalar_base_is_replaced() {
        let mut base = json!({"tariff": "2.0A"});
        deep_merge(&mut base, &json!({"tariff": {"code": "2.0TD"}}));
        assert_eq!(base["tariff"]["code"], "2.0TD");

        let mut base = json!(3);
        deep_merge(&mut base, &json!({"a": 1}));
        assert_eq!(base, json!({"a": 1}));
    }

    fn document() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i32>().prop_map(Value::from),
            "[a-z]{0,6}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop::collection::btree_map("[a-c]", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect()))
        })
    }

    proptest! {
        #[test]
        fn merging_twice_changes_nothing(base in document(), patch in document()) {
            let mut once = base.clone();
            deep_merge(&mut once, &patch);
            let mut twice = once.clone();
            deep_merge(&mut twice, &patch);
            prop_assert_eq!(twice, once);
        }

        #[test]
        fn patch_leaves_win(base in document(), patch in document()) {
            let mut merged = base;
            deep_merge(&mut merged, &patch);
            match (&patch, &merged) {
                (Value::Object(patch_map), Value::Object(merged_map)) => {
                    for (key, value) in patch_map {
                        if !value.is_object() {
                            prop_assert_eq!(merged_map.get(key), Some(value));
                        }
                    }
                }
                (Value::Object(_), other) => prop_assert!(false, "object patch gave {other}"),
                _ => prop_assert_eq!(&merged, &patch),
            }
        }
    }
}
