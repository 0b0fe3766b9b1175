//! InMemoryElementProvider - Vec を元にした要素ソース

use crate::ports::{ElementProperty, ElementProvider};

const DEFAULT_TYPE_PROPERTY: &str = "type";

/// Serves a fixed element list. Elements are typed by the value of one
/// property (`"type"` unless overridden).
#[derive(Debug, Clone)]
pub struct InMemoryElementProvider<E> {
    elements: Vec<E>,
    type_property: String,
}

impl<E> InMemoryElementProvider<E> {
    pub fn new(elements: Vec<E>) -> Self {
        Self {
            elements,
            type_property: DEFAULT_TYPE_PROPERTY.to_owned(),
        }
    }

    pub fn with_type_property(mut self, property: impl Into<String>) -> Self {
        self.type_property = property.into();
        self
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl<E> ElementProvider<E> for InMemoryElementProvider<E>
where
    E: ElementProperty + Clone + Send + Sync,
{
    fn get_all_elements(&self) -> Vec<E> {
        self.elements.clone()
    }

    fn get_elements_of_type(&self, element_type: &str) -> Vec<E> {
        self.elements
            .iter()
            .filter(|e| {
                e.get_property(&self.type_property)
                    .is_some_and(|v| v.as_str() == Some(element_type))
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn type_lookup_uses_configured_property() {
        let elements = vec![
            json!({"type": "Wall", "category": "Walls"}),
            json!({"type": "Door", "category": "Doors"}),
            json!({"category": "Walls"}),
        ];
        let by_type = InMemoryElementProvider::new(elements.clone());
        assert_eq!(by_type.get_elements_of_type("Wall").len(), 1);
        assert_eq!(by_type.get_all_elements().len(), 3);

        let by_category: InMemoryElementProvider<Value> =
            InMemoryElementProvider::new(elements).with_type_property("category");
        assert_eq!(by_category.get_elements_of_type("Walls").len(), 2);
        assert!(by_category.get_elements_of_type("Windows").is_empty());
    }
}
