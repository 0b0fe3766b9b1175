//! App - queue・query・document をまとめる facade
//!
//! # 含まれるもの
//! - **AsyncRevit**: facade 本体
//! - **BatchOptions**: `batch_update` の設定
//! - **TransactionOptions**: `transaction` の設定

mod batch;
mod facade;
mod transaction;

pub use batch::BatchOptions;
pub use facade::AsyncRevit;
pub use transaction::TransactionOptions;
