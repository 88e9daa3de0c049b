//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせて配送エンジンを実装します。
//!
//! # 主要コンポーネント
//! - **DispatcherBuilder**: Dispatcher の構築とワイヤリング
//! - **Dispatcher**: 3 つのループの起動と shutdown の配布
//! - **RecordProcessor**: claim → send → finalize
//! - **RecordUnlocker**: 期限切れロックの回収
//! - **RecordCleaner**: 保持期間を過ぎた sent レコードの削除

pub mod builder;
pub mod cleaner;
pub mod dispatcher;
pub mod periodic;
pub mod processor;
pub mod settings;
pub mod unlocker;

// 主要な型を再エクスポート
pub use self::builder::DispatcherBuilder;
pub use self::cleaner::RecordCleaner;
pub use self::dispatcher::{Dispatcher, DispatcherHandle};
pub use self::periodic::{PeriodicWork, run_periodic};
pub use self::processor::{ProcessReport, RecordProcessor};
pub use self::settings::{DispatcherSettings, RetrialPolicy};
pub use self::unlocker::RecordUnlocker;
