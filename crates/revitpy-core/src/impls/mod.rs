//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryElementProvider**: Vec をそのまま要素ソースにする
//! - **InMemoryDocument**: トランザクションのイベントを journal に記録する

pub mod document;
pub mod element_provider;

pub use self::document::{DocumentError, InMemoryDocument, TransactionEvent};
pub use self::element_provider::InMemoryElementProvider;
