//! 検索の実行と結果の反復
//!
//! このモジュールは、コンパイル済みクエリ木を辞書に対して実行する
//! 検索エンジンを提供します。実行は検索ごとの専用ワーカースレッドで行われ、
//! 消費者スレッドは進捗と部分結果を並行して安全に読み取れます。
//!
//! 実行戦略は2つあります:
//!
//! - **インデックス検索**: 各葉のトークンを転置インデックスから直接引き、
//!   木のAnd/Or構造に従ってオフセット集合を積・和します。
//! - **線形スキャン**: 行ストアを行単位に走査し、コンパイル済み正規表現木を
//!   各行のトークンに対して評価します。設定されたチャンク行数ごとに
//!   協調的にキャンセル要求を確認し、進捗割合を報告します。
//!
//! 1つの検索の中で、結果オフセットはテーブルごとにソースバッファの昇順で
//! 発見されますが、テーブル間の順序はマージされません。大域的な順序が
//! 必要な呼び出し側は、完了後にオフセットでソートしてください。

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use hashbrown::HashSet;

use crate::dictionary::index::NormalizationLevel;
use crate::dictionary::line::DictionaryLine;
use crate::dictionary::Dictionary;
use crate::errors::{JibikiError, Result};
use crate::progress::Progress;
use crate::query::{Query, QueryLeaf, QueryNode};

/// 検索実行のフラグ
#[derive(Clone, Copy, Debug)]
pub struct SearchFlags {
    /// 有効なインデックスが存在する場合にそれを使用するかどうか
    pub use_index: bool,
    /// 線形スキャンでキャンセル確認を行うチャンク行数
    pub chunk_size: usize,
}

impl Default for SearchFlags {
    fn default() -> Self {
        Self {
            use_index: true,
            chunk_size: 1000,
        }
    }
}

/// 検索の状態
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum SearchStatus {
    /// 待機中（開始前または完了後）
    Idle,
    /// 実行中
    Searching,
    /// 結果の確定中
    Finishing,
    /// キャンセル要求を受理し、現在のチャンクを終えようとしている
    Canceling,
}

/// 正規化階層ごとの結果テーブル
#[derive(Default)]
struct ResultTable {
    tables: [Vec<u64>; NormalizationLevel::COUNT],
}

struct SearchInner {
    status: Mutex<SearchStatus>,
    results: Mutex<ResultTable>,
    progress: Progress,
}

/// コンパイル済みクエリを辞書に対して実行するエンジン
pub struct SearchEngine;

impl SearchEngine {
    /// 検索を開始し、実行中の検索ハンドルを返します。
    ///
    /// 実行は専用のワーカースレッドで行われます。返されたハンドルから
    /// 状態・進捗・部分結果をポーリングできます。
    ///
    /// # 引数
    ///
    /// * `dictionary` - 検索対象の辞書
    /// * `query` - コンパイル済みクエリ
    /// * `flags` - 実行フラグ
    /// * `progress` - 進捗報告とキャンセルのためのハンドル
    ///
    /// # エラー
    ///
    /// クエリが別の種類の辞書に対してコンパイルされていた場合に
    /// 無効な引数エラーを返します。
    pub fn start(
        dictionary: Arc<Dictionary>,
        query: Query,
        flags: SearchFlags,
        progress: Progress,
    ) -> Result<Search> {
        if query.kind() != dictionary.kind() {
            return Err(JibikiError::invalid_argument(
                "query",
                format!(
                    "The query was compiled for a {} dictionary but the target is {}.",
                    query.kind().name(),
                    dictionary.kind().name()
                ),
            ));
        }

        let inner = Arc::new(SearchInner {
            status: Mutex::new(SearchStatus::Idle),
            results: Mutex::new(ResultTable::default()),
            progress,
        });

        let worker_inner = Arc::clone(&inner);
        let handle = std::thread::spawn(move || {
            run_search(&dictionary, &query, flags, &worker_inner);
        });

        Ok(Search {
            inner,
            handle: Some(handle),
        })
    }
}

/// 実行中または完了した1つの検索
///
/// ワーカーと消費者の間で共有される状態はミューテックスで保護されており、
/// 実行中でも安全に進捗と部分結果を読み取れます。
pub struct Search {
    inner: Arc<SearchInner>,
    handle: Option<JoinHandle<()>>,
}

impl Search {
    /// 現在の検索状態を取得します。
    pub fn status(&self) -> SearchStatus {
        *self.inner.status.lock().unwrap()
    }

    /// 進捗ハンドルを取得します。
    pub fn progress(&self) -> &Progress {
        &self.inner.progress
    }

    /// 検索にキャンセルを要求します。
    ///
    /// キャンセルは協調的です。ワーカーは現在のチャンクを終えてから
    /// 停止し、それまでに収集された結果は有効なままです。
    pub fn cancel(&self) {
        self.inner.progress.cancel();
    }

    /// ワーカースレッドの完了を待ちます。
    ///
    /// 2回目以降の呼び出しは何もしません。
    pub fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[jibiki] Search worker thread panicked.");
            }
        }
    }

    /// 現在までの結果に対するイテレータを作成します。
    ///
    /// イテレータは作成時点のスナップショットを走査します。複数のテーブルに
    /// 現れた同じ行オフセットは1回だけ返されます。完了した検索に対して
    /// 作り直したイテレータは、毎回同じオフセットを同じ順序で返します。
    pub fn result_iter(&self) -> ResultIterator {
        let results = self.inner.results.lock().unwrap();
        ResultIterator::new(results.tables.clone())
    }
}

impl Drop for Search {
    fn drop(&mut self) {
        self.cancel();
        self.wait();
    }
}

/// 検索結果のイテレータ
///
/// テーブルを階層順に走査し、既に返した行オフセットを読み飛ばします。
pub struct ResultIterator {
    tables: [Vec<u64>; NormalizationLevel::COUNT],
    table: usize,
    position: usize,
    visited: HashSet<u64>,
}

impl ResultIterator {
    fn new(tables: [Vec<u64>; NormalizationLevel::COUNT]) -> Self {
        Self {
            tables,
            table: 0,
            position: 0,
            visited: HashSet::new(),
        }
    }

    /// 異なる行オフセットの総数を取得します。
    pub fn count(&self) -> usize {
        let mut distinct: HashSet<u64> = HashSet::new();
        for table in &self.tables {
            distinct.extend(table.iter().copied());
        }
        distinct.len()
    }

    /// すべての結果を返し終えたかどうかを確認します。
    pub fn finished(&self) -> bool {
        self.visited.len() == self.count()
    }

    /// スナップショットに結果が1つもないかどうかを確認します。
    pub fn empty(&self) -> bool {
        self.tables.iter().all(Vec::is_empty)
    }
}

impl Iterator for ResultIterator {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        while self.table < self.tables.len() {
            let table = &self.tables[self.table];
            while self.position < table.len() {
                let offset = table[self.position];
                self.position += 1;
                if self.visited.insert(offset) {
                    return Some(offset);
                }
            }
            self.table += 1;
            self.position = 0;
        }
        None
    }
}

fn set_status(inner: &SearchInner, status: SearchStatus) {
    *inner.status.lock().unwrap() = status;
}

fn run_search(dictionary: &Dictionary, query: &Query, flags: SearchFlags, inner: &SearchInner) {
    set_status(inner, SearchStatus::Searching);

    let canceled = if flags.use_index {
        index_search(dictionary, query, inner)
    } else {
        linear_scan(dictionary, query, flags, inner)
    };

    if !canceled {
        set_status(inner, SearchStatus::Finishing);
        let mut results = inner.results.lock().unwrap();
        for table in results.tables.iter_mut() {
            table.sort_unstable();
            table.dedup();
        }
        inner.progress.set_fraction(1.0);
    }

    set_status(inner, SearchStatus::Idle);
}

/// インデックス検索。キャンセルされた場合は`true`を返します。
fn index_search(dictionary: &Dictionary, query: &Query, inner: &SearchInner) -> bool {
    for (i, level) in NormalizationLevel::ALL.into_iter().enumerate() {
        if inner.progress.should_abort() {
            set_status(inner, SearchStatus::Canceling);
            return true;
        }
        let offsets = eval_index(dictionary, query.root(), level);
        let mut results = inner.results.lock().unwrap();
        results.tables[level as usize] = offsets.into_iter().collect();
        drop(results);
        inner
            .progress
            .set_fraction((i + 1) as f64 / NormalizationLevel::COUNT as f64);
    }
    false
}

/// 1つの階層に対してクエリ木を評価します。
fn eval_index(
    dictionary: &Dictionary,
    node: &QueryNode,
    level: NormalizationLevel,
) -> BTreeSet<u64> {
    match node {
        QueryNode::Leaf(leaf) => {
            let mut offsets = BTreeSet::new();
            for (form_level, form) in &leaf.forms {
                if *form_level != level {
                    continue;
                }
                offsets.extend(dictionary.index().lookup(level, form));
            }
            if leaf.column.is_some() {
                // Keyed leaves verify the named column before emitting; the
                // index itself keys whole lines, not columns.
                offsets.retain(|&offset| {
                    dictionary
                        .store()
                        .line_at_offset(offset)
                        .is_some_and(|line| leaf_matches_line(dictionary, leaf, line))
                });
            }
            offsets
        }
        QueryNode::And(left, right) => {
            let left = eval_index(dictionary, left, level);
            let right = eval_index(dictionary, right, level);
            left.intersection(&right).copied().collect()
        }
        QueryNode::Or(left, right) => {
            let mut left = eval_index(dictionary, left, level);
            left.extend(eval_index(dictionary, right, level));
            left
        }
    }
}

/// 線形スキャン。キャンセルされた場合は`true`を返します。
fn linear_scan(
    dictionary: &Dictionary,
    query: &Query,
    flags: SearchFlags,
    inner: &SearchInner,
) -> bool {
    let store = dictionary.store();
    let total = store.buffer().len().max(1) as f64;
    let chunk_size = flags.chunk_size.max(1);

    for chunk in store.lines().chunks(chunk_size) {
        let mut matched = Vec::new();
        let mut last_offset = 0;
        for line in chunk {
            let Some(offset) = line.offset() else {
                continue;
            };
            last_offset = offset;
            if node_matches_line(dictionary, query.root(), line) {
                matched.push(offset);
            }
        }

        if !matched.is_empty() {
            let mut results = inner.results.lock().unwrap();
            results.tables[NormalizationLevel::Raw as usize].extend(matched);
        }
        inner.progress.set_fraction(last_offset as f64 / total);

        if inner.progress.should_abort() {
            set_status(inner, SearchStatus::Canceling);
            return true;
        }
    }
    false
}

/// クエリ木を1行に対して評価します。
fn node_matches_line(dictionary: &Dictionary, node: &QueryNode, line: &DictionaryLine) -> bool {
    match node {
        QueryNode::Leaf(leaf) => leaf_matches_line(dictionary, leaf, line),
        QueryNode::And(left, right) => {
            node_matches_line(dictionary, left, line) && node_matches_line(dictionary, right, line)
        }
        QueryNode::Or(left, right) => {
            node_matches_line(dictionary, left, line) || node_matches_line(dictionary, right, line)
        }
    }
}

/// 葉を1行に対して評価します。
///
/// カラム指定のある葉はそのカラムのトークンだけを、匿名の葉はすべての
/// 検索対象カラムのトークンを正規表現で照合します。
fn leaf_matches_line(dictionary: &Dictionary, leaf: &QueryLeaf, line: &DictionaryLine) -> bool {
    let store = dictionary.store();
    let buffer = store.buffer();
    match leaf.column {
        Some(column) => store
            .spans(line, column)
            .iter()
            .any(|span| leaf.regex.is_match(span.text(buffer))),
        None => dictionary
            .kind()
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, def)| def.is_searchable())
            .any(|(position, _)| {
                line.column_spans(position)
                    .iter()
                    .any(|span| leaf.regex.is_match(span.text(buffer)))
            }),
    }
}
