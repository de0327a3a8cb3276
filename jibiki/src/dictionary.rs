//! 辞書の読み込み・構築・キャッシュ管理
//!
//! このモジュールは、1つの辞書のライフサイクル全体を統括します。
//! 主な機能として以下を提供します:
//!
//! - フラットファイル辞書（EDICT、KANJIDIC、例文コーパス、部首テーブル）の取り込み
//! - その場トークン化による列アドレス可能なレコードの構築
//! - チェックサムで封印された3つのキャッシュファイルの読み書き
//! - 正規化階層ごとの転置インデックスの構築と永続化
//! - Zstandard圧縮ソースファイルの透過的な展開
//!
//! # キャッシュセット
//!
//! 1つの辞書は種類と名前から決定されるディレクトリに3つのキャッシュを
//! 持ちます:
//!
//! - `text.cache`: NUL区切りにトークン化されたソーステキスト
//! - `lines.cache`: ソースバッファ相対のオフセットでシリアライズされた行ストア
//! - `index.cache`: rkyvアーカイブされた転置インデックス
//!
//! いずれかの検証に失敗した場合、その場でソースから再構築されます。
//! 再構築は一度だけ発生する遅いパースであり、利用者に見えるエラーには
//! なりません。

pub mod cache;
pub mod codec;
pub mod index;
pub mod kind;
pub mod line;
pub mod source;
pub(crate) mod tokenizer;

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use crate::dictionary::cache::{CacheContents, CacheFile};
use crate::dictionary::index::{Index, IndexInner};
use crate::dictionary::kind::DictionaryKind;
use crate::dictionary::line::LineStore;
use crate::dictionary::source::SourceBuffer;
use crate::errors::{JibikiError, Result};
use crate::morphology::Morphology;
use crate::progress::Progress;

/// トークン化済みソーステキストのキャッシュファイル名
const TEXT_CACHE: &str = "text.cache";
/// シリアライズ済み行ストアのキャッシュファイル名
const LINES_CACHE: &str = "lines.cache";
/// 転置インデックスのキャッシュファイル名
const INDEX_CACHE: &str = "index.cache";

/// グローバルキャッシュディレクトリのパス
///
/// ユーザー固有のシステムキャッシュディレクトリ内の`jibiki`サブディレクトリを
/// 指します。各プラットフォームでの標準的なキャッシュディレクトリ:
/// - Linux: `$XDG_CACHE_HOME/jibiki` または `$HOME/.cache/jibiki`
/// - macOS: `$HOME/Library/Caches/jibiki`
/// - Windows: `{FOLDERID_LocalAppData}/jibiki`
pub static GLOBAL_CACHE_DIR: LazyLock<Option<PathBuf>> = LazyLock::new(|| {
    let path = dirs::cache_dir()?.join("jibiki");
    fs::create_dir_all(&path).ok()?;

    Some(path)
});

/// 読み込み済みの1つの辞書
///
/// ソースバッファ、行ストア、転置インデックスを所有します。
/// 読み込み完了後は不変であり、`Arc`を通じて並行する検索の間で
/// ロックなしに共有できます。
pub struct Dictionary {
    kind: DictionaryKind,
    name: String,
    store: LineStore,
    index: Index,
}

impl Dictionary {
    /// グローバルキャッシュディレクトリを使用して辞書を開きます。
    ///
    /// ソースファイルのチェックサムに対して有効なキャッシュセットが存在する
    /// 場合はそれを読み込み、存在しないか検証に失敗した場合はソースから
    /// 再構築してキャッシュを書き直します。
    ///
    /// # 引数
    ///
    /// * `kind` - 辞書の種類
    /// * `name` - 辞書の名前。キャッシュパスの要素になります。
    /// * `source_path` - ソースファイルのパス。`.zst`拡張子のファイルは
    ///   透過的に展開されます。
    /// * `morphology` - インデックス構築に使用する形態素解析アダプタ
    /// * `progress` - 進捗報告とキャンセルのためのハンドル
    ///
    /// # エラー
    ///
    /// ソースファイルが読めない場合、UTF-8でない場合、または再構築中に
    /// キャンセルが要求された場合にエラーを返します。
    pub fn open<P>(
        kind: DictionaryKind,
        name: &str,
        source_path: P,
        morphology: &dyn Morphology,
        progress: &Progress,
    ) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let cache_dir = global_cache_dir_for(kind, name)?;
        Self::open_with_cache_dir(kind, name, source_path, cache_dir, morphology, progress)
    }

    /// 明示的なキャッシュディレクトリを使用して辞書を開きます。
    ///
    /// 動作は[`open`](Self::open)と同じですが、キャッシュセットの場所を
    /// 呼び出し側が決定します。
    pub fn open_with_cache_dir<P, Q>(
        kind: DictionaryKind,
        name: &str,
        source_path: P,
        cache_dir: Q,
        morphology: &dyn Morphology,
        progress: &Progress,
    ) -> Result<Self>
    where
        P: AsRef<Path>,
        Q: Into<PathBuf>,
    {
        Self::load(
            kind,
            name,
            source_path.as_ref(),
            cache_dir.into(),
            false,
            morphology,
            progress,
        )
    }

    /// 辞書を取り込み、キャッシュセットを無条件に構築し直します。
    ///
    /// 既存のキャッシュは検証されず、常にソースからのフルパースが
    /// 実行されます。インストーラや`compiler`ツールが使用します。
    pub fn install<P, Q>(
        kind: DictionaryKind,
        name: &str,
        source_path: P,
        cache_dir: Q,
        morphology: &dyn Morphology,
        progress: &Progress,
    ) -> Result<Self>
    where
        P: AsRef<Path>,
        Q: Into<PathBuf>,
    {
        Self::load(
            kind,
            name,
            source_path.as_ref(),
            cache_dir.into(),
            true,
            morphology,
            progress,
        )
    }

    /// キャッシュを介さずにリーダーから辞書を構築します。
    ///
    /// ファイルパスが利用できない場合（メモリ内バッファからの読み込みなど）の
    /// フォールバックです。何も永続化されません。
    ///
    /// # 引数
    ///
    /// * `kind` - 辞書の種類
    /// * `name` - 辞書の名前
    /// * `rdr` - ソーステキストのリーダー
    /// * `morphology` - インデックス構築に使用する形態素解析アダプタ
    /// * `progress` - 進捗報告とキャンセルのためのハンドル
    pub fn from_reader<R>(
        kind: DictionaryKind,
        name: &str,
        rdr: R,
        morphology: &dyn Morphology,
        progress: &Progress,
    ) -> Result<Self>
    where
        R: Read,
    {
        validate_name(name)?;
        let buffer = SourceBuffer::from_reader(rdr)?;
        let (store, index) = build_from_buffer(kind, buffer, morphology, progress)?;
        Ok(Self {
            kind,
            name: name.to_string(),
            store,
            index: Index::Owned(index),
        })
    }

    fn load(
        kind: DictionaryKind,
        name: &str,
        source_path: &Path,
        cache_dir: PathBuf,
        force_rebuild: bool,
        morphology: &dyn Morphology,
        progress: &Progress,
    ) -> Result<Self> {
        validate_name(name)?;

        progress.set_primary_message(format!("Loading {}...", source_path.display()));
        let source_bytes = read_source(source_path)?;
        let buffer = SourceBuffer::from_bytes(source_bytes)?;
        let checksum = buffer.checksum().to_string();

        if !force_rebuild {
            if let Some(dictionary) =
                Self::from_cache_set(kind, name, &cache_dir, &checksum, morphology, progress)?
            {
                return Ok(dictionary);
            }
            log::warn!(
                "No valid cache set for dictionary '{}'; re-parsing the source. \
                 This can be slow but happens only once.",
                name
            );
        }

        progress.set_primary_message(format!("Parsing {}...", name));
        let (store, index) = build_from_buffer(kind, buffer, morphology, progress)?;

        progress.set_primary_message(format!("Writing caches for {}...", name));
        let mut lines_payload = Vec::new();
        codec::serialize(&store, &mut lines_payload);

        CacheFile::new(cache_dir.join(TEXT_CACHE)).write(
            &checksum,
            store.buffer().as_bytes(),
            progress,
        )?;
        CacheFile::new(cache_dir.join(LINES_CACHE)).write(&checksum, &lines_payload, progress)?;
        let index = Index::Owned(index);
        index.write_cache(&mut CacheFile::new(cache_dir.join(INDEX_CACHE)), progress)?;

        Ok(Self {
            kind,
            name: name.to_string(),
            store,
            index,
        })
    }

    /// キャッシュセットからの読み込みを試みます。
    ///
    /// テキストまたは行ストアのキャッシュが無効な場合は`None`を返します。
    /// インデックスキャッシュのみが無効な場合は、行ストアからインデックスを
    /// 再構築してそのキャッシュだけを書き直します。
    fn from_cache_set(
        kind: DictionaryKind,
        name: &str,
        cache_dir: &Path,
        checksum: &str,
        morphology: &dyn Morphology,
        progress: &Progress,
    ) -> Result<Option<Self>> {
        let mut text_cache = CacheFile::new(cache_dir.join(TEXT_CACHE));
        let Some(text_payload) = text_cache.read(checksum, CacheContents::Utf8Text, progress)
        else {
            return Ok(None);
        };
        let buffer = Arc::new(SourceBuffer::from_tokenized(
            text_payload.to_vec(),
            checksum.to_string(),
        ));

        let mut lines_cache = CacheFile::new(cache_dir.join(LINES_CACHE));
        let Some(lines_payload) = lines_cache.read(checksum, CacheContents::Binary, progress)
        else {
            return Ok(None);
        };
        let store = match codec::Decoder::new(lines_payload).read_line_store(kind, &buffer) {
            Ok(store) => store,
            Err(JibikiError::CorruptCache(msg)) => {
                log::warn!("Line cache for '{}' is corrupt ({}); rebuilding.", name, msg);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let index = match Index::from_cache(cache_dir.join(INDEX_CACHE), checksum) {
            Some(index) => index,
            None => {
                log::warn!("Index cache for '{}' is invalid; rebuilding it.", name);
                progress.set_primary_message(format!("Indexing {}...", name));
                let inner = IndexInner::build(&store, morphology, progress)?;
                let index = Index::Owned(inner);
                index
                    .write_cache(&mut CacheFile::new(cache_dir.join(INDEX_CACHE)), progress)?;
                index
            }
        };

        Ok(Some(Self {
            kind,
            name: name.to_string(),
            store,
            index,
        }))
    }

    /// 辞書の種類を取得します。
    #[inline(always)]
    pub fn kind(&self) -> DictionaryKind {
        self.kind
    }

    /// 辞書の名前を取得します。
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// ソースバッファへの共有参照を取得します。
    #[inline(always)]
    pub fn buffer(&self) -> &Arc<SourceBuffer> {
        self.store.buffer()
    }

    /// 行ストアを取得します。
    #[inline(always)]
    pub fn store(&self) -> &LineStore {
        &self.store
    }

    /// 転置インデックスを取得します。
    #[inline(always)]
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// 指定された行オフセットの表示用テキストを構築します。
    ///
    /// カラムのトークンをカラム間はタブ、カラム内は空白で結合します。
    ///
    /// # 引数
    ///
    /// * `offset` - 検索結果が報告した行オフセット
    ///
    /// # 戻り値
    ///
    /// オフセットが行を指していない場合は`None`
    pub fn format_line(&self, offset: u64) -> Option<String> {
        let line = self.store.line_at_offset(offset)?;
        let buffer = self.store.buffer();
        let mut out = String::new();
        for (i, spans) in line.columns.iter().enumerate() {
            if i > 0 {
                out.push('\t');
            }
            for (j, span) in spans.iter().enumerate() {
                if j > 0 {
                    out.push(' ');
                }
                out.push_str(span.text(buffer));
            }
        }
        Some(out)
    }
}

/// 種類と名前からグローバルキャッシュディレクトリ配下のパスを決定します。
pub fn global_cache_dir_for(kind: DictionaryKind, name: &str) -> Result<PathBuf> {
    let root = GLOBAL_CACHE_DIR.as_ref().ok_or_else(|| {
        JibikiError::invalid_argument("cache_dir", "Could not determine system cache directory.")
    })?;
    Ok(root.join(kind.name()).join(name))
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) {
        return Err(JibikiError::invalid_argument(
            "name",
            "A dictionary name must be a non-empty path component.",
        ));
    }
    Ok(())
}

/// ソースファイルを読み込みます。`.zst`ファイルは透過的に展開されます。
fn read_source(path: &Path) -> Result<Vec<u8>> {
    let meta = fs::metadata(path).map_err(|e| JibikiError::io_at(path, e))?;
    if !meta.is_file() {
        return Err(JibikiError::PathIsDirectory(path.to_path_buf()));
    }

    let file = File::open(path).map_err(|e| JibikiError::io_at(path, e))?;
    let mut bytes = Vec::new();
    if path.extension().is_some_and(|ext| ext == "zst") {
        let mut decoder = zstd::Decoder::new(file).map_err(|e| JibikiError::io_at(path, e))?;
        decoder
            .read_to_end(&mut bytes)
            .map_err(|e| JibikiError::io_at(path, e))?;
    } else {
        let mut file = file;
        file.read_to_end(&mut bytes)
            .map_err(|e| JibikiError::io_at(path, e))?;
    }
    Ok(bytes)
}

fn build_from_buffer(
    kind: DictionaryKind,
    mut buffer: SourceBuffer,
    morphology: &dyn Morphology,
    progress: &Progress,
) -> Result<(LineStore, IndexInner)> {
    let summary = tokenizer::tokenize(kind, &mut buffer);
    if summary.incomplete > 0 {
        log::debug!(
            "{} lines were missing their anchor and were kept partially.",
            summary.incomplete
        );
    }
    let store = LineStore::new(kind, Arc::new(buffer), summary.lines);
    let index = IndexInner::build(&store, morphology, progress)?;
    Ok((store, index))
}
