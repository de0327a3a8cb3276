//! 行単位のカラムレコード
//!
//! このモジュールは、トークン化された1行分のレコード[`DictionaryLine`]と、
//! 1辞書分のレコード列[`LineStore`]を提供します。レコードが保持するのは
//! [`SourceBuffer`]内のオフセットと長さの組だけで、文字データそのものは
//! 一切所有しません。

use std::sync::Arc;

use crate::dictionary::kind::{ColumnId, DictionaryKind};
use crate::dictionary::source::SourceBuffer;

/// [`SourceBuffer`]内のトークンを指す範囲
///
/// シリアライズされるのはオフセットのみで、長さはバッファ内のNUL終端から
/// 復元されます。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TextSpan {
    pub(crate) offset: u64,
    pub(crate) len: u32,
}

impl TextSpan {
    /// 新しい範囲を作成します。
    #[inline(always)]
    pub(crate) const fn new(offset: u64, len: u32) -> Self {
        Self { offset, len }
    }

    /// 範囲の先頭バイトオフセットを取得します。
    #[inline(always)]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 参照先のテキストを取得します。
    ///
    /// # 引数
    ///
    /// * `buffer` - この範囲が属するソースバッファ
    ///
    /// # パニック
    ///
    /// 範囲が`buffer`の外を指す場合にパニックします。パース時または
    /// 検証済みデシリアライズでのみ構築されるため、正しく構築された
    /// [`LineStore`]経由の呼び出しでは発生しません。
    #[inline(always)]
    pub fn text<'a>(&self, buffer: &'a SourceBuffer) -> &'a str {
        let start = self.offset as usize;
        let end = start + self.len as usize;
        std::str::from_utf8(&buffer.as_bytes()[start..end]).unwrap()
    }
}

/// トークン化された1行分のカラムレコード
///
/// カラムは[`DictionaryKind::columns`]の定義順に並び、各カラムは0個以上の
/// トークン範囲を保持します。2番目以降のトークンを持たない行では該当カラムが
/// 空になりますが、これはエラーではありません。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DictionaryLine {
    pub(crate) columns: Vec<Vec<TextSpan>>,
}

impl DictionaryLine {
    /// 指定された種類の空の行レコードを作成します。
    pub(crate) fn empty(kind: DictionaryKind) -> Self {
        Self {
            columns: vec![Vec::new(); kind.columns().len()],
        }
    }

    /// この行の基準バイトオフセットを取得します。
    ///
    /// 最初に現れるトークンのオフセットを行の識別子として使用します。
    /// インデックスと検索結果はこの値で行を参照します。
    ///
    /// # 戻り値
    ///
    /// トークンを1つも持たない行では`None`
    pub fn offset(&self) -> Option<u64> {
        self.columns
            .iter()
            .flat_map(|spans| spans.first())
            .map(|span| span.offset)
            .min()
    }

    /// カラム位置ごとの範囲列を取得します。
    #[inline(always)]
    pub(crate) fn column_spans(&self, position: usize) -> &[TextSpan] {
        &self.columns[position]
    }
}

/// 1辞書分のパース済みレコード列
///
/// 初回パースまたはデシリアライズの間のみ可変で、それ以降は不変です。
/// ソースバッファの共有所有権を保持するため、行ストアが生きている限り
/// すべての範囲参照は有効です。
pub struct LineStore {
    kind: DictionaryKind,
    buffer: Arc<SourceBuffer>,
    lines: Vec<DictionaryLine>,
}

impl LineStore {
    /// パース済みの行列から行ストアを作成します。
    pub(crate) fn new(
        kind: DictionaryKind,
        buffer: Arc<SourceBuffer>,
        lines: Vec<DictionaryLine>,
    ) -> Self {
        Self {
            kind,
            buffer,
            lines,
        }
    }

    /// 辞書の種類を取得します。
    #[inline(always)]
    pub fn kind(&self) -> DictionaryKind {
        self.kind
    }

    /// ソースバッファへの共有参照を取得します。
    #[inline(always)]
    pub fn buffer(&self) -> &Arc<SourceBuffer> {
        &self.buffer
    }

    /// 行数を取得します。
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// 行ストアが空かどうかを確認します。
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// 行のスライスを取得します。
    #[inline(always)]
    pub fn lines(&self) -> &[DictionaryLine] {
        &self.lines
    }

    /// 指定された行の指定カラムの範囲列を取得します。
    ///
    /// # 引数
    ///
    /// * `line` - 対象の行
    /// * `column` - カラムの識別子
    ///
    /// # 戻り値
    ///
    /// この辞書種類に存在しないカラムを指定した場合は空スライス
    pub fn spans<'a>(&self, line: &'a DictionaryLine, column: ColumnId) -> &'a [TextSpan] {
        match self.kind.column_position(column) {
            Some(position) => line.column_spans(position),
            None => &[],
        }
    }

    /// 基準オフセットが`offset`である行を二分探索で取得します。
    ///
    /// 行は基準オフセットの昇順に並んでいます。
    pub fn line_at_offset(&self, offset: u64) -> Option<&DictionaryLine> {
        self.lines
            .binary_search_by(|line| {
                line.offset()
                    .map(|o| o.cmp(&offset))
                    // Token-less lines sort before everything; they are never looked up.
                    .unwrap_or(std::cmp::Ordering::Less)
            })
            .ok()
            .map(|i| &self.lines[i])
    }

    /// 列挙用に行と基準オフセットの組を返します。
    pub fn offsets(&self) -> impl Iterator<Item = (u64, &DictionaryLine)> + '_ {
        self.lines
            .iter()
            .filter_map(|line| line.offset().map(|o| (o, line)))
    }
}
