//! 多階層転置インデックス
//!
//! このモジュールは、正規化階層ごとに独立した4つの転置テーブル
//! （表層・正規化・語幹・基本形）を提供します。各テーブルはトークンから
//! ソースバッファ内の行オフセット集合への写像で、互いにマージされることは
//! ありません。
//!
//! テーブルはソート済みトークン配列とポスティングリストで表現され、
//! rkyvアーカイブとしてキャッシュファイルに永続化されます。読み込みは
//! メモリマップからのゼロコピーアクセスで、マップ済みスライスの検証に
//! 失敗した場合は整列済みヒープバッファへのコピーにフォールバックします。
//!
//! インデックスは1つのソースバッファのチェックサムに関連付けられ、
//! 不一致はインデックス全体を無効にします（部分的な再利用はありません）。

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use hashbrown::HashMap;
use memmap2::Mmap;
use rkyv::rancor::Error as RancorError;
use rkyv::util::AlignedVec;
use rkyv::{access, Archive, Deserialize, Serialize};

use crate::dictionary::cache::{validate_header, CacheFile};
use crate::dictionary::line::LineStore;
use crate::errors::{JibikiError, Result};
use crate::morphology::Morphology;
use crate::progress::Progress;

/// インデックスキャッシュを識別するマジックバイト
///
/// 長さは整列境界と同じ16バイトであり、これに続くrkyvデータの整列を
/// 保ちます。フォーマットの後方互換性を維持するため、この値が変更される
/// ことは想定されていません。
pub const INDEX_MAGIC: &[u8] = b"JibikiIndex 0.1\n";

/// インデックス構築時の進捗確認の行間隔
const BUILD_CHUNK_LINES: usize = 1000;

/// トークンの正規化階層
///
/// 各階層は独立したインデックステーブルを持ちます。
#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
#[repr(u8)]
pub enum NormalizationLevel {
    /// 表層形（入力そのまま）
    Raw = 0,
    /// 正規化形（大文字小文字の折り畳み + カタカナ→ひらがな変換）
    Normalized = 1,
    /// 語幹形
    Stem = 2,
    /// 基本形（語幹形の正規化）
    Canonical = 3,
}

impl NormalizationLevel {
    /// 階層の総数
    pub const COUNT: usize = 4;

    /// すべての階層（数値順）
    pub const ALL: [Self; Self::COUNT] = [
        Self::Raw,
        Self::Normalized,
        Self::Stem,
        Self::Canonical,
    ];

    /// 階層の名前を取得します。
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Normalized => "normalized",
            Self::Stem => "stem",
            Self::Canonical => "canonical",
        }
    }
}

/// 行オフセット集合のポスティングリスト
///
/// 集合は長さと値を交互に並べて1本の配列に格納されます。
#[derive(Archive, Serialize, Deserialize, Default)]
pub(crate) struct Postings {
    data: Vec<u64>,
}

impl Postings {
    /// 指定された開始位置のオフセットイテレータを取得します。
    #[inline(always)]
    pub fn ids(&self, start: usize) -> impl Iterator<Item = u64> + '_ {
        let len = self.data[start] as usize;
        self.data[start + 1..start + 1 + len].iter().copied()
    }
}

impl ArchivedPostings {
    /// 指定された開始位置のオフセットイテレータを取得します（アーカイブ版）。
    #[inline(always)]
    pub fn ids(&self, start: usize) -> impl Iterator<Item = u64> + '_ {
        let len = self.data[start].to_native() as usize;
        self.data[start + 1..start + 1 + len]
            .iter()
            .map(|v| v.to_native())
    }
}

/// ポスティングリストを構築するビルダー
#[derive(Default)]
struct PostingsBuilder {
    data: Vec<u64>,
}

impl PostingsBuilder {
    /// オフセット集合を追加し、その開始位置を返します。
    fn push(&mut self, offsets: &[u64]) -> u64 {
        let start = self.data.len() as u64;
        self.data.push(offsets.len() as u64);
        self.data.extend_from_slice(offsets);
        start
    }

    fn build(self) -> Postings {
        Postings { data: self.data }
    }
}

/// 1つの正規化階層のテーブル
///
/// `tokens`はソート済みで、`postings_starts`は各トークンのポスティング
/// 開始位置を並行して保持します。
#[derive(Archive, Serialize, Deserialize)]
pub(crate) struct IndexLevel {
    tokens: Vec<String>,
    postings_starts: Vec<u64>,
    postings: Postings,
}

impl IndexLevel {
    fn lookup(&self, token: &str) -> Vec<u64> {
        match self
            .tokens
            .binary_search_by(|t| t.as_str().cmp(token))
        {
            Ok(i) => self.postings.ids(self.postings_starts[i] as usize).collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl ArchivedIndexLevel {
    fn lookup(&self, token: &str) -> Vec<u64> {
        match self
            .tokens
            .binary_search_by(|t| t.as_str().cmp(token))
        {
            Ok(i) => self
                .postings
                .ids(self.postings_starts[i].to_native() as usize)
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// インデックスの内部データ
///
/// 1つのソースバッファのチェックサムに関連付けられた、正規化階層ごとの
/// テーブル群です。
#[derive(Archive, Serialize, Deserialize)]
pub struct IndexInner {
    checksum: String,
    // Invariant: exactly NormalizationLevel::COUNT entries, in level order.
    levels: Vec<IndexLevel>,
}

impl IndexInner {
    /// 行ストアからインデックスを構築します。
    ///
    /// すべての検索対象カラムのトークンを形態素解析アダプタに通し、
    /// 得られた各形をその階層のテーブルに行オフセットをキーとして登録します。
    /// 下位の階層と同一の形は登録されません。1つの行は、内部で何個の
    /// トークンが一致しても、各テーブルに高々1回しか現れません。
    ///
    /// # 引数
    ///
    /// * `store` - パース済みの行ストア
    /// * `morphology` - 形態素解析アダプタ
    /// * `progress` - 進捗報告とキャンセルのためのハンドル
    ///
    /// # エラー
    ///
    /// 構築中にキャンセルが要求された場合に[`JibikiError::Aborted`]を
    /// 返します。
    pub fn build(
        store: &LineStore,
        morphology: &dyn Morphology,
        progress: &Progress,
    ) -> Result<Self> {
        let kind = store.kind();
        let buffer = store.buffer();
        let searchable: Vec<usize> = kind
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, def)| def.is_searchable())
            .map(|(position, _)| position)
            .collect();

        let mut tables: [HashMap<String, Vec<u64>>; NormalizationLevel::COUNT] =
            Default::default();

        let total = store.len().max(1);
        for (i, line) in store.lines().iter().enumerate() {
            if i % BUILD_CHUNK_LINES == 0 {
                if progress.should_abort() {
                    return Err(JibikiError::Aborted);
                }
                progress.set_fraction(i as f64 / total as f64);
            }
            let Some(line_offset) = line.offset() else {
                continue;
            };
            for &position in &searchable {
                for span in line.column_spans(position) {
                    for forms in morphology.analyze(span.text(buffer)) {
                        insert(&mut tables[0], forms.surface, line_offset);
                        if let Some(normalized) = forms.normalized {
                            insert(&mut tables[1], normalized, line_offset);
                        }
                        if let Some(stem) = forms.stem {
                            insert(&mut tables[2], stem, line_offset);
                        }
                        if let Some(canonical) = forms.canonical {
                            insert(&mut tables[3], canonical, line_offset);
                        }
                    }
                }
            }
        }
        progress.set_fraction(1.0);

        let levels = tables.into_iter().map(finalize_level).collect();
        Ok(Self {
            checksum: buffer.checksum().to_string(),
            levels,
        })
    }

    /// 関連付けられたソースバッファのチェックサムを取得します。
    #[inline(always)]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// 指定された階層のテーブルからトークンを検索します。
    ///
    /// # 戻り値
    ///
    /// 一致した行オフセットの昇順の列。未登録のトークンでは空になります。
    pub fn lookup(&self, level: NormalizationLevel, token: &str) -> Vec<u64> {
        self.levels[level as usize].lookup(token)
    }

    /// キャッシュファイルに保存するペイロードを構築します。
    ///
    /// ペイロードはマジックバイトとrkyvアーカイブの連結です。
    pub(crate) fn to_cache_payload(&self) -> Result<Vec<u8>> {
        let archived = rkyv::to_bytes::<RancorError>(self)?;
        let mut payload = Vec::with_capacity(INDEX_MAGIC.len() + archived.len());
        payload.extend_from_slice(INDEX_MAGIC);
        payload.extend_from_slice(&archived);
        Ok(payload)
    }
}

fn insert(table: &mut HashMap<String, Vec<u64>>, token: String, line_offset: u64) {
    let offsets = table.entry(token).or_default();
    // Lines are visited in ascending offset order, so a repeat within one
    // line is always the last element.
    if offsets.last() != Some(&line_offset) {
        offsets.push(line_offset);
    }
}

fn finalize_level(table: HashMap<String, Vec<u64>>) -> IndexLevel {
    let mut entries: Vec<(String, Vec<u64>)> = table.into_iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

    let mut tokens = Vec::with_capacity(entries.len());
    let mut postings_starts = Vec::with_capacity(entries.len());
    let mut postings = PostingsBuilder::default();
    for (token, offsets) in entries {
        postings_starts.push(postings.push(&offsets));
        tokens.push(token);
    }
    IndexLevel {
        tokens,
        postings_starts,
        postings: postings.build(),
    }
}

/// メモリバッファ（mmapまたはヒープ）を所有するラッパー
enum IndexBuffer {
    Mmap(Mmap),
    Aligned(AlignedVec),
}

/// アーカイブ形式のインデックス
///
/// メモリバッファとアーカイブされたインデックスデータへの参照を保持します。
pub struct ArchivedIndex {
    _buffer: IndexBuffer,
    data: &'static ArchivedIndexInner,
}

/// 読み取り専用の転置インデックス
///
/// キャッシュからゼロコピーで読み込まれたアーカイブ版と、構築直後の
/// 所有版の2つのバリアントがあります。
pub enum Index {
    Archived(ArchivedIndex),
    Owned(IndexInner),
}

impl Index {
    /// 関連付けられたソースバッファのチェックサムを取得します。
    pub fn checksum(&self) -> &str {
        match self {
            Self::Archived(archived) => archived.data.checksum.as_str(),
            Self::Owned(inner) => inner.checksum(),
        }
    }

    /// 指定された階層のテーブルからトークンを検索します。
    ///
    /// # 引数
    ///
    /// * `level` - 正規化階層
    /// * `token` - 検索するトークン
    ///
    /// # 戻り値
    ///
    /// 一致した行オフセットの昇順の列
    pub fn lookup(&self, level: NormalizationLevel, token: &str) -> Vec<u64> {
        match self {
            Self::Archived(archived) => archived.data.levels[level as usize].lookup(token),
            Self::Owned(inner) => inner.lookup(level, token),
        }
    }

    /// インデックスをキャッシュファイルに書き込みます。
    ///
    /// # 引数
    ///
    /// * `cache` - 書き込み先のキャッシュファイル
    /// * `progress` - 進捗報告のためのハンドル
    ///
    /// # パニック
    ///
    /// `Archived`バリアントで呼び出された場合にパニックします。
    /// アーカイブ版は既にキャッシュから読み込まれたものです。
    pub fn write_cache(&self, cache: &mut CacheFile, progress: &Progress) -> Result<u64> {
        match self {
            Self::Owned(inner) => {
                let payload = inner.to_cache_payload()?;
                cache.write(inner.checksum(), &payload, progress)
            }
            Self::Archived(_) => unreachable!(),
        }
    }

    /// キャッシュファイルからインデックスを読み込みます。
    ///
    /// ファイルを読み取り専用でマップし、チェックサムヘッダとマジックバイトを
    /// 照合した後、rkyvアーカイブを検証してゼロコピーでアクセスします。
    /// マップ済みスライスの検証に失敗した場合は、整列済みヒープバッファへ
    /// コピーして再検証します。いずれの検証にも失敗した場合は`None`を返し、
    /// 呼び出し側はソースから再構築します。
    ///
    /// # 引数
    ///
    /// * `path` - インデックスキャッシュファイルのパス
    /// * `expected_checksum` - ソースバッファのチェックサム
    pub fn from_cache<P>(path: P, expected_checksum: &str) -> Option<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let meta = std::fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        let file = File::open(path).ok()?;
        let mmap = unsafe { Mmap::map(&file) }.ok()?;

        let payload_start = validate_header(&mmap, expected_checksum)?;
        let payload = &mmap[payload_start..];
        if !payload.starts_with(INDEX_MAGIC) {
            log::warn!(
                "Index cache {} has a mismatched magic number; it will be rebuilt.",
                path.display()
            );
            return None;
        }
        let data_start = payload_start + INDEX_MAGIC.len();

        match access::<ArchivedIndexInner, RancorError>(&mmap[data_start..]) {
            Ok(archived) => {
                if archived.checksum.as_str() != expected_checksum {
                    return None;
                }
                // SAFETY: the reference borrows from the mmap stored alongside
                // it; both live exactly as long as the ArchivedIndex.
                let data: &'static ArchivedIndexInner = unsafe { &*(archived as *const _) };
                Some(Self::Archived(ArchivedIndex {
                    _buffer: IndexBuffer::Mmap(mmap),
                    data,
                }))
            }
            Err(_) => {
                let mut aligned = AlignedVec::with_capacity(mmap.len() - data_start);
                aligned.extend_from_slice(&mmap[data_start..]);

                let archived = access::<ArchivedIndexInner, RancorError>(&aligned).ok()?;
                if archived.checksum.as_str() != expected_checksum {
                    return None;
                }
                // SAFETY: as above, with the aligned heap buffer as the owner.
                let data: &'static ArchivedIndexInner = unsafe { &*(archived as *const _) };
                Some(Self::Archived(ArchivedIndex {
                    _buffer: IndexBuffer::Aligned(aligned),
                    data,
                }))
            }
        }
    }
}
