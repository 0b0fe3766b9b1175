//! Ports - ホスト層から受け取る最小限のインターフェース
//!
//! # 含まれる port
//! - **ElementProperty / ElementProvider**: 要素とそのプロパティの取得
//! - **DocumentSession**: ドキュメントのトランザクション（begin/commit/rollback）
//!
//! InMemory 実装は [`crate::impls`] にあります。

pub mod document;
pub mod element;

pub use self::document::DocumentSession;
pub use self::element::{ElementProperty, ElementProvider};
