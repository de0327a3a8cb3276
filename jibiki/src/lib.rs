//! # jibiki
//!
//! jibikiは、日本語・英語の辞書ファイルを対象とした検索・インデックス
//! エンジンです。
//!
//! ## 概要
//!
//! このライブラリは、フラットファイル辞書（EDICT形式、漢字辞書、
//! 例文コーパス、部首テーブル）を取り込み、各行を列アドレス可能な
//! レコードに構造化し、正規化された転置インデックスを構築します。
//! 両者はチェックサムで封印されたバイナリキャッシュとして永続化され、
//! ブール・カラム指定クエリに対してキャンセル可能かつ進捗報告付きの
//! 検索を実行します。
//!
//! ## 主な機能
//!
//! - **その場トークン化**: 区切りバイトをNUL終端で上書きするゼロコピーの列分解
//! - **オフセット相対シリアライゼーション**: ソースバッファに結び付いたコンパクトな行キャッシュ
//! - **ゼロコピーインデックス**: rkyvアーカイブとメモリマップによる高速な再読み込み
//! - **多階層転置インデックス**: 表層・正規化・語幹・基本形の独立した4テーブル
//! - **ブールクエリ**: `token`、`column:token`、`(group)`、`a&&b`、`a||b`
//! - **協調的キャンセル**: チャンク境界での中断と進捗報告
//!
//! ## 使用例
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::io::Cursor;
//! use std::sync::Arc;
//! use jibiki::{
//!     Dictionary, DictionaryKind, FoldingMorphology, Progress, QueryCompiler,
//!     SearchEngine, SearchFlags,
//! };
//!
//! let edict = "食べる [たべる] /(v1) to eat/EntL1358280X/\n\
//!              飲む [のむ] /(v5m) to drink/EntL1169870X/\n";
//!
//! let morphology = FoldingMorphology::new();
//! let dictionary = Arc::new(Dictionary::from_reader(
//!     DictionaryKind::Edict,
//!     "edict-test",
//!     Cursor::new(edict),
//!     &morphology,
//!     &Progress::new(),
//! )?);
//!
//! let query = QueryCompiler::new(dictionary.kind(), &morphology).compile("reading:たべる")?;
//! let mut search = SearchEngine::start(
//!     Arc::clone(&dictionary),
//!     query,
//!     SearchFlags::default(),
//!     Progress::new(),
//! )?;
//! search.wait();
//!
//! let offsets: Vec<u64> = search.result_iter().collect();
//! assert_eq!(offsets.len(), 1);
//! assert!(dictionary.format_line(offsets[0]).unwrap().contains("to eat"));
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(any(target_pointer_width = "32", target_pointer_width = "64")))]
compile_error!("`target_pointer_width` must be 32 or 64");

/// 辞書データ構造とキャッシュ管理
pub mod dictionary;

/// エラー型の定義
pub mod errors;

/// 形態素解析アダプタ
pub mod morphology;

/// 進捗報告とキャンセルのハンドル
pub mod progress;

/// クエリ文字列のコンパイル
pub mod query;

/// 検索の実行と結果の反復
pub mod search;


// Re-exports
pub use dictionary::index::{Index, NormalizationLevel};
pub use dictionary::kind::{ColumnHandling, ColumnId, DictionaryKind};
pub use dictionary::Dictionary;
pub use errors::{JibikiError, Result};
pub use morphology::{FoldingMorphology, MorphForms, Morphology};
pub use progress::Progress;
pub use query::{Query, QueryCompiler, QueryNode};
pub use search::{ResultIterator, Search, SearchEngine, SearchFlags, SearchStatus};

/// このライブラリのバージョン番号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
