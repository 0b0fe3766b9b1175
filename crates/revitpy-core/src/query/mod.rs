//! LINQ-style deferred queries over element collections.

mod builder;
mod element_set;
mod error;
mod filter;
mod value;

pub use builder::QueryBuilder;
pub use element_set::ElementSet;
pub use error::QueryError;
pub use filter::{FilterCriteria, FilterOperator};
