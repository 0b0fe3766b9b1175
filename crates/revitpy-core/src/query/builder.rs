//! Deferred query plans over an [`ElementProvider`].
//!
//! # Design
//! - Every builder call consumes and returns the builder; nothing touches the
//!   provider until a terminal operation runs.
//! - Evaluation order is fixed: filter, sort, distinct, skip/take.
//! - All filters must match (no OR at this layer).

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use super::element_set::ElementSet;
use super::error::QueryError;
use super::filter::{FilterCriteria, FilterOperator};
use super::value::sort_order;
use crate::ports::{ElementProperty, ElementProvider};

#[derive(Debug, Clone)]
struct SortCriteria {
    property: String,
    descending: bool,
}

pub struct QueryBuilder<E> {
    provider: Arc<dyn ElementProvider<E>>,
    element_type: Option<String>,
    filters: Vec<FilterCriteria>,
    sorts: Vec<SortCriteria>,
    distinct_by: Option<String>,
    skip: usize,
    take: Option<usize>,
}

impl<E> Clone for QueryBuilder<E> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            element_type: self.element_type.clone(),
            filters: self.filters.clone(),
            sorts: self.sorts.clone(),
            distinct_by: self.distinct_by.clone(),
            skip: self.skip,
            take: self.take,
        }
    }
}

impl<E> fmt::Debug for QueryBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("element_type", &self.element_type)
            .field("filters", &self.filters)
            .field("sorts", &self.sorts)
            .field("distinct_by", &self.distinct_by)
            .field("skip", &self.skip)
            .field("take", &self.take)
            .finish_non_exhaustive()
    }
}

impl<E> QueryBuilder<E>
where
    E: ElementProperty + Clone + Send + Sync + 'static,
{
    pub fn new(provider: Arc<dyn ElementProvider<E>>) -> Self {
        Self {
            provider,
            element_type: None,
            filters: Vec::new(),
            sorts: Vec::new(),
            distinct_by: None,
            skip: 0,
            take: None,
        }
    }

    /// Restrict the base list to elements of `element_type`.
    pub fn of_type(mut self, element_type: impl Into<String>) -> Self {
        self.element_type = Some(element_type.into());
        self
    }

    /// Add a case-sensitive filter.
    pub fn filter(
        self,
        property: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<Value>,
    ) -> Result<Self, QueryError> {
        self.push_filter(property, operator, value.into(), true)
    }

    /// Add a filter whose string comparisons ignore case.
    pub fn filter_ignore_case(
        self,
        property: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<Value>,
    ) -> Result<Self, QueryError> {
        self.push_filter(property, operator, value.into(), false)
    }

    /// Add a filter with the operator given by name (`"equals"`, `">="`, ...).
    pub fn filter_by_name(
        self,
        property: impl Into<String>,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<Self, QueryError> {
        let operator = operator.parse()?;
        self.push_filter(property, operator, value.into(), true)
    }

    pub fn where_equals(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FilterCriteria::equals(property, value.into()));
        self
    }

    fn push_filter(
        mut self,
        property: impl Into<String>,
        operator: FilterOperator,
        value: Value,
        case_sensitive: bool,
    ) -> Result<Self, QueryError> {
        self.filters
            .push(FilterCriteria::new(property, operator, value, case_sensitive)?);
        Ok(self)
    }

    /// Append an ascending sort key.
    pub fn order_by(self, property: impl Into<String>) -> Self {
        self.push_sort(property, false)
    }

    /// Append a descending sort key.
    pub fn order_by_descending(self, property: impl Into<String>) -> Self {
        self.push_sort(property, true)
    }

    /// Secondary ascending key; same as another `order_by`.
    pub fn then_by(self, property: impl Into<String>) -> Self {
        self.push_sort(property, false)
    }

    pub fn then_by_descending(self, property: impl Into<String>) -> Self {
        self.push_sort(property, true)
    }

    fn push_sort(mut self, property: impl Into<String>, descending: bool) -> Self {
        self.sorts.push(SortCriteria {
            property: property.into(),
            descending,
        });
        self
    }

    pub fn skip(mut self, count: usize) -> Self {
        self.skip = count;
        self
    }

    pub fn take(mut self, count: usize) -> Self {
        self.take = Some(count);
        self
    }

    /// Keep the first element per distinct value of `property`. Elements
    /// without the property are always kept.
    pub fn distinct_by(mut self, property: impl Into<String>) -> Self {
        self.distinct_by = Some(property.into());
        self
    }

    /// Deferred result; the provider is read on first access.
    pub fn execute(&self) -> ElementSet<E> {
        let plan = self.clone();
        ElementSet::deferred(move || plan.evaluate())
    }

    pub fn to_list(&self) -> Vec<E> {
        self.evaluate()
    }

    pub fn count(&self) -> usize {
        self.evaluate().len()
    }

    pub fn any(&self) -> bool {
        !self.evaluate().is_empty()
    }

    pub fn first(&self) -> Option<E> {
        self.evaluate().into_iter().next()
    }

    pub fn first_or_default(&self, default: E) -> E {
        self.first().unwrap_or(default)
    }

    /// The only match; errors when there are none or several.
    pub fn single(&self) -> Result<E, QueryError> {
        let mut items = self.evaluate();
        match items.len() {
            0 => Err(QueryError::NoElements),
            1 => Ok(items.remove(0)),
            count => Err(QueryError::MultipleElements { count }),
        }
    }

    fn evaluate(&self) -> Vec<E> {
        let base = match &self.element_type {
            Some(element_type) => self.provider.get_elements_of_type(element_type),
            None => self.provider.get_all_elements(),
        };
        let base_len = base.len();

        let mut items: Vec<E> = base
            .into_iter()
            .filter(|e| self.filters.iter().all(|f| f.apply(e)))
            .collect();

        if !self.sorts.is_empty() {
            items = self.sorted(items);
        }

        if let Some(property) = &self.distinct_by {
            let mut seen = HashSet::new();
            items.retain(|e| match e.get_property(property) {
                Some(v) => seen.insert(v.to_string()),
                None => true,
            });
        }

        let items: Vec<E> = items
            .into_iter()
            .skip(self.skip)
            .take(self.take.unwrap_or(usize::MAX))
            .collect();
        trace!(base = base_len, matched = items.len(), "query evaluated");
        items
    }

    fn sorted(&self, items: Vec<E>) -> Vec<E> {
        let mut keyed: Vec<(Vec<Option<Value>>, E)> = items
            .into_iter()
            .map(|e| {
                let keys = self.sorts.iter().map(|s| e.get_property(&s.property)).collect();
                (keys, e)
            })
            .collect();

        keyed.sort_by(|(a, _), (b, _)| {
            for (i, sort) in self.sorts.iter().enumerate() {
                let ord = sort_order(a[i].as_ref(), b[i].as_ref());
                let ord = if sort.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        keyed.into_iter().map(|(_, e)| e).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryElementProvider;
    use serde_json::json;

    fn provider(items: Vec<Value>) -> Arc<dyn ElementProvider<Value>> {
        Arc::new(InMemoryElementProvider::new(items))
    }

    fn walls_and_doors() -> Arc<dyn ElementProvider<Value>> {
        provider(vec![
            json!({"type": "Wall", "cat": "Wall", "h": 10, "mark": "A"}),
            json!({"type": "Door", "cat": "Door", "h": 5, "mark": "B"}),
            json!({"type": "Wall", "cat": "Wall", "h": 20, "mark": "A"}),
            json!({"type": "Wall", "cat": "Wall", "h": 15}),
        ])
    }

    #[test]
    fn filter_then_sort_descending() {
        let query = QueryBuilder::new(provider(vec![
            json!({"cat": "Wall", "h": 10}),
            json!({"cat": "Door", "h": 5}),
            json!({"cat": "Wall", "h": 20}),
        ]))
        .filter("cat", FilterOperator::Equals, "Wall")
        .unwrap()
        .order_by_descending("h");

        assert_eq!(
            query.to_list(),
            vec![json!({"cat": "Wall", "h": 20}), json!({"cat": "Wall", "h": 10})]
        );
    }

    #[test]
    fn execution_is_deterministic() {
        let query = QueryBuilder::new(walls_and_doors())
            .where_equals("cat", "Wall")
            .order_by("mark")
            .then_by_descending("h");

        let first = query.execute().to_vec();
        let second = query.execute().to_vec();
        assert_eq!(first, second);
        // missing mark sorts first, then A by height desc
        let heights: Vec<_> = first.iter().map(|e| e["h"].clone()).collect();
        assert_eq!(heights, vec![json!(15), json!(20), json!(10)]);
    }

    #[test]
    fn descending_string_key_puts_null_then_missing_last() {
        let marks: Vec<_> = QueryBuilder::new(provider(vec![
            json!({"id": 1, "mark": "B"}),
            json!({"id": 2}),
            json!({"id": 3, "mark": "C"}),
            json!({"id": 4, "mark": null}),
            json!({"id": 5, "mark": "A"}),
        ]))
        .order_by_descending("mark")
        .to_list()
        .iter()
        .map(|e| e["id"].clone())
        .collect();

        assert_eq!(marks, vec![json!(3), json!(1), json!(5), json!(4), json!(2)]);
    }

    #[test]
    fn mixed_number_and_text_keys_sort_by_kind() {
        let mut items = Vec::new();
        for r in 0..500u64 {
            let n = (r * 31) % 97;
            items.push(match r % 3 {
                0 => json!({"h": n}),
                1 => json!({"h": format!("{}", n / 2)}),
                _ => json!({"h": format!("{n}a")}),
            });
        }

        let sorted = QueryBuilder::new(provider(items)).order_by("h").to_list();
        assert_eq!(sorted.len(), 500);
        let first_text = sorted
            .iter()
            .position(|e| e["h"].as_str().is_some_and(|s| s.ends_with('a')))
            .unwrap();
        // every numeric value (numbers and numeric strings) precedes the words
        assert!(sorted[..first_text].iter().all(|e| !e["h"].as_str().is_some_and(|s| s.ends_with('a'))));
        assert!(sorted[first_text..].iter().all(|e| e["h"].as_str().is_some_and(|s| s.ends_with('a'))));
        assert_eq!(sorted[0]["h"], json!(0));
    }

    #[test]
    fn typed_query_reads_only_that_type() {
        let query = QueryBuilder::new(walls_and_doors()).of_type("Door");
        assert_eq!(query.count(), 1);
        assert_eq!(query.single().unwrap()["cat"], json!("Door"));
    }

    #[test]
    fn distinct_keeps_first_and_elements_without_the_property() {
        let marks: Vec<_> = QueryBuilder::new(walls_and_doors())
            .distinct_by("mark")
            .to_list()
            .into_iter()
            .map(|e| e["h"].clone())
            .collect();
        assert_eq!(marks, vec![json!(10), json!(5), json!(15)]);
    }

    #[test]
    fn skip_and_take_apply_last() {
        let query = QueryBuilder::new(walls_and_doors())
            .order_by("h")
            .skip(1)
            .take(2);
        let heights: Vec<_> = query.to_list().into_iter().map(|e| e["h"].clone()).collect();
        assert_eq!(heights, vec![json!(10), json!(15)]);
    }

    #[test]
    fn terminal_helpers() {
        let walls = QueryBuilder::new(walls_and_doors()).where_equals("cat", "Wall");
        assert!(walls.any());
        assert_eq!(walls.first().unwrap()["h"], json!(10));
        assert!(matches!(
            walls.single(),
            Err(QueryError::MultipleElements { count: 3 })
        ));

        let none = walls.clone().where_equals("h", 999);
        assert!(!none.any());
        assert!(none.first().is_none());
        assert_eq!(none.first_or_default(json!({})), json!({}));
        assert!(matches!(none.single(), Err(QueryError::NoElements)));
    }

    #[test]
    fn operator_by_name_is_validated_at_build_time() {
        let ok = QueryBuilder::new(walls_and_doors()).filter_by_name("h", ">=", 15);
        assert_eq!(ok.unwrap().count(), 2);

        let err = QueryBuilder::new(walls_and_doors())
            .filter_by_name("h", "roughly", 15)
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownOperator(_)));
    }

    #[test]
    fn ignore_case_filter() {
        let query = QueryBuilder::new(walls_and_doors())
            .filter_ignore_case("cat", FilterOperator::StartsWith, "wa")
            .unwrap();
        assert_eq!(query.count(), 3);
    }

    #[test]
    fn execute_reads_the_provider_lazily() {
        let query = QueryBuilder::new(walls_and_doors()).where_equals("cat", "Door");
        let set = query.execute();
        assert!(!set.is_evaluated());
        assert_eq!(set.count(), 1);
        assert!(set.is_evaluated());
    }
}
