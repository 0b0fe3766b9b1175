//! Element access port - 要素プロパティの取得
//!
//! query 層は要素を直接覗かない。名前でプロパティを問い合わせ、
//! JSON 値（プロパティが無ければ `None`）を受け取るだけ。

use std::sync::Arc;

use serde_json::Value;

/// Named-property lookup on a host element.
pub trait ElementProperty {
    /// `None` means the lookup failed. `Some(Value::Null)` is an explicit
    /// null.
    fn get_property(&self, name: &str) -> Option<Value>;
}

/// JSON elements resolve top-level keys first, then dotted paths
/// (`"location.level"`, `"tags.0"`).
impl ElementProperty for Value {
    fn get_property(&self, name: &str) -> Option<Value> {
        if let Some(direct) = self.get(name) {
            return Some(direct.clone());
        }
        let mut current = self;
        for segment in name.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }
}

impl<E: ElementProperty + ?Sized> ElementProperty for Arc<E> {
    fn get_property(&self, name: &str) -> Option<Value> {
        (**self).get_property(name)
    }
}

/// Source of elements for a query. Both methods return a snapshot.
pub trait ElementProvider<E>: Send + Sync {
    fn get_all_elements(&self) -> Vec<E>;

    fn get_elements_of_type(&self, element_type: &str) -> Vec<E>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::top_level("cat", Some(json!("Wall")))]
    #[case::nested("location.level", Some(json!("L1")))]
    #[case::array_index("tags.1", Some(json!("fire")))]
    #[case::dotted_key("a.b", Some(json!(7)))]
    #[case::explicit_null("mark", Some(Value::Null))]
    #[case::missing("height", None)]
    #[case::missing_nested("location.room", None)]
    #[case::through_scalar("cat.name", None)]
    fn json_property_lookup(#[case] name: &str, #[case] expected: Option<Value>) {
        let element = json!({
            "cat": "Wall",
            "mark": null,
            "a.b": 7,
            "location": { "level": "L1" },
            "tags": ["exterior", "fire"],
        });
        assert_eq!(element.get_property(name), expected);
    }
}
