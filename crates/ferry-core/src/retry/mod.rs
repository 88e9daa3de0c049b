//! Retry engine.
//!
//! ドメインに依存しない汎用プリミティブ。processor が broker への送信に使う。
//!
//! # 分類
//! - **Retryable**: 一時的な失敗。`max_attempts` まで再実行
//! - **Unrecoverable**: 繰り返しても成功しない。即座に返す
//! - **Plain**: タグなし。再実行しない（retry は opt-in）
//!
//! 返すエラーは常に wrapper を剥がした元のエラー（`RetryError::into_inner`）。

mod classify;
mod error;
mod policy;

pub use self::classify::{Classified, ErrorClass, retryable, unrecoverable};
pub use self::error::RetryError;
pub use self::policy::{DEFAULT_MAX_ATTEMPTS, RetryDelay, RetryPolicy, execute};
