//! エラー型の定義
//!
//! このモジュールは、jibikiライブラリで使用されるすべてのエラー型を定義します。

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// jibiki専用のResult型
///
/// エラー型としてデフォルトで[`JibikiError`]を使用します。
pub type Result<T, E = JibikiError> = std::result::Result<T, E>;

/// jibikiのエラー型
///
/// このライブラリで発生する可能性のあるすべてのエラーを表現します。
/// 各バリアントは特定のエラー条件に対応しています。
#[derive(Debug, thiserror::Error)]
pub enum JibikiError {
    /// 無効な引数エラー
    ///
    /// [`InvalidArgumentError`]のエラーバリアント。
    #[error(transparent)]
    InvalidArgument(InvalidArgumentError),

    /// キャッシュ破損エラー
    ///
    /// チェックサム不一致、不正なUTF-8、範囲外オフセット、二重デコードなど、
    /// キャッシュファイルの内容が信頼できない場合に発生します。
    /// キャッシュを破棄してソースから再構築することで常に回復できます。
    #[error("CorruptCache: {0}")]
    CorruptCache(String),

    /// クエリ括弧の不均衡エラー
    ///
    /// クエリ文字列内の括弧が対応していない場合に発生します。
    #[error("UnbalancedQuery: unmatched '{ch}' at byte {pos}")]
    UnbalancedQuery {
        /// 対応が取れなかった括弧
        ch: char,
        /// クエリ文字列内のバイト位置
        pos: usize,
    },

    /// 無効な検索パターンエラー
    ///
    /// 展開後の正規表現がコンパイルできない場合に発生します。
    #[error("InvalidPattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// 協調的キャンセル
    ///
    /// 呼び出し側の要求により処理が中断されました。失敗ではなく、
    /// それまでに収集された部分結果は有効なままです。
    #[error("Aborted by the caller")]
    Aborted,

    /// パス情報付きI/Oエラー
    ///
    /// ファイルのオープンやマッピングの失敗を、対象パスとともに伝播します。
    #[error("I/O error at {path}: {source}")]
    Io {
        /// 対象ファイルのパス
        path: PathBuf,
        /// 元のI/Oエラー
        #[source]
        source: std::io::Error,
    },

    /// ディレクトリが指定されたエラー
    ///
    /// ファイルが期待される場所にディレクトリが指定された場合に発生します。
    #[error("The path '{0}' is a directory, but a file was expected.")]
    PathIsDirectory(PathBuf),

    /// 標準I/Oエラー
    ///
    /// [`std::io::Error`]のエラーバリアント。
    #[error(transparent)]
    StdIo(#[from] std::io::Error),

    /// UTF-8エンコーディングエラー
    ///
    /// [`std::str::Utf8Error`]のエラーバリアント。
    #[error(transparent)]
    Utf8(std::str::Utf8Error),

    /// rkyvシリアライゼーションエラー
    ///
    /// [`rkyv::rancor::Error`]のエラーバリアント。
    #[error(transparent)]
    Rkyv(#[from] rkyv::rancor::Error),

    /// 一時ファイルの永続化エラー
    ///
    /// [`tempfile::PersistError`](tempfile::PersistError)のエラーバリアント。
    #[error(transparent)]
    PathPersist(#[from] tempfile::PersistError),
}

impl JibikiError {
    /// 無効な引数エラーを生成します
    ///
    /// # 引数
    ///
    /// * `arg` - 引数の名前
    /// * `msg` - エラーメッセージ
    pub(crate) fn invalid_argument<S>(arg: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidArgument(InvalidArgumentError {
            arg,
            msg: msg.into(),
        })
    }

    /// キャッシュ破損エラーを生成します
    ///
    /// # 引数
    ///
    /// * `msg` - エラーメッセージ
    pub(crate) fn corrupt_cache<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::CorruptCache(msg.into())
    }

    /// パス情報付きI/Oエラーを生成します
    ///
    /// # 引数
    ///
    /// * `path` - 対象ファイルのパス
    /// * `source` - 元のI/Oエラー
    pub(crate) fn io_at<P>(path: P, source: std::io::Error) -> Self
    where
        P: Into<PathBuf>,
    {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// 引数が無効な場合に使用されるエラー
#[derive(Debug)]
pub struct InvalidArgumentError {
    /// 引数の名前
    pub(crate) arg: &'static str,

    /// エラーメッセージ
    pub(crate) msg: String,
}

impl fmt::Display for InvalidArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidArgumentError: {}: {}", self.arg, self.msg)
    }
}

impl Error for InvalidArgumentError {}

impl From<std::str::Utf8Error> for JibikiError {
    fn from(error: std::str::Utf8Error) -> Self {
        Self::Utf8(error)
    }
}
