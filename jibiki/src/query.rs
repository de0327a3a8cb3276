//! クエリ文字列のコンパイル
//!
//! このモジュールは、クエリ文字列をブール木[`QueryNode`]にコンパイルします。
//! コンパイルは2段階で行われます:
//!
//! 1. 括弧木の構築（[`paren`]モジュール）
//! 2. 区間列の左から右への走査によるブールコンパイル。トップレベルの
//!    `&&`/`||`で区間を分割し、明示的な演算子を持たない隣接した葉は
//!    `And`で結合されます。
//!
//! 葉のテキストは、認識されるカラム名を左辺に持つ最初の非エスケープ`:`で
//! 分割され、`{カラム, パターン}`の葉になります。それ以外の区間は全カラム
//! 対象の匿名の葉です。各葉の照合パターンは、テキストの形態素形
//! （表層・正規化・語幹・基本形）をORで束ねた正規表現としてコンパイル
//! されます。これにより、クエリトークンはインデックスに存在するどの
//! 活用形にも一致します。
//!
//! クエリ構文: `token`、`column:token`、`(group)`、`a&&b`、`a||b`。
//! 隣接するトークンの間は暗黙のANDです。予約文字`( ) & | :`を字義どおり
//! 使用するには`\`でエスケープします。

mod paren;

use regex::Regex;

use crate::dictionary::kind::{ColumnId, DictionaryKind};
use crate::dictionary::index::NormalizationLevel;
use crate::errors::{JibikiError, Result};
use crate::morphology::Morphology;
use crate::query::paren::ParenSpan;

/// コンパイル済みクエリ
///
/// ブール木のルートを所有します。1つのクエリは1つの辞書種類に対して
/// コンパイルされます。
pub struct Query {
    text: String,
    kind: DictionaryKind,
    root: QueryNode,
}

impl Query {
    /// 元のクエリ文字列を取得します。
    #[inline(always)]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// コンパイル対象の辞書種類を取得します。
    #[inline(always)]
    pub fn kind(&self) -> DictionaryKind {
        self.kind
    }

    /// ブール木のルートを取得します。
    #[inline(always)]
    pub fn root(&self) -> &QueryNode {
        &self.root
    }
}

/// ブール木のノード
///
/// ノードの寿命は親が所有し、ルートはコンパイル済み[`Query`]が所有します。
#[derive(Debug)]
pub enum QueryNode {
    /// 1つの照合パターンを持つ葉
    Leaf(QueryLeaf),
    /// 両方の子に一致する行を選択する論理積
    And(Box<QueryNode>, Box<QueryNode>),
    /// いずれかの子に一致する行を選択する論理和
    Or(Box<QueryNode>, Box<QueryNode>),
}

impl QueryNode {
    /// この木のすべての葉を深さ優先順で走査します。
    pub fn leaves(&self) -> Vec<&QueryLeaf> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a QueryLeaf>) {
        match self {
            Self::Leaf(leaf) => leaves.push(leaf),
            Self::And(left, right) | Self::Or(left, right) => {
                left.collect_leaves(leaves);
                right.collect_leaves(leaves);
            }
        }
    }
}

/// ブール木の葉
#[derive(Debug)]
pub struct QueryLeaf {
    /// 照合対象のカラム。`None`は全検索対象カラムを意味します。
    pub column: Option<ColumnId>,
    /// エスケープ解除済みのパターンテキスト
    pub pattern: String,
    /// 階層ごとの形態素形（インデックス検索に使用）
    pub(crate) forms: Vec<(NormalizationLevel, String)>,
    /// 全形態素形をORで束ねたコンパイル済み正規表現（線形スキャンに使用）
    pub(crate) regex: Regex,
}

/// クエリ文字列をブール木にコンパイルするコンパイラ
pub struct QueryCompiler<'m> {
    kind: DictionaryKind,
    morphology: &'m dyn Morphology,
}

impl<'m> QueryCompiler<'m> {
    /// 新しいコンパイラを作成します。
    ///
    /// # 引数
    ///
    /// * `kind` - クエリの対象となる辞書の種類
    /// * `morphology` - 葉のパターン展開に使用する形態素解析アダプタ
    pub fn new(kind: DictionaryKind, morphology: &'m dyn Morphology) -> Self {
        Self { kind, morphology }
    }

    /// クエリ文字列をコンパイルします。
    ///
    /// # 引数
    ///
    /// * `query` - クエリ文字列
    ///
    /// # エラー
    ///
    /// - 括弧が対応しない場合は[`JibikiError::UnbalancedQuery`]
    /// - 展開後の正規表現がコンパイルできない場合は[`JibikiError::InvalidPattern`]
    /// - 葉を1つも含まないクエリの場合は無効な引数エラー
    pub fn compile(&self, query: &str) -> Result<Query> {
        let spans = paren::parse_spans(query)?;
        let root = self.compile_spans(&spans)?.ok_or_else(|| {
            JibikiError::invalid_argument("query", "A query must contain at least one pattern.")
        })?;
        Ok(Query {
            text: query.to_string(),
            kind: self.kind,
            root,
        })
    }

    /// 区間列を左から右へ走査し、ブール木を構築します。
    ///
    /// `||`は最も弱く結合し、`&&`と暗黙の隣接はそれより強く結合します。
    fn compile_spans(&self, spans: &[ParenSpan<'_>]) -> Result<Option<QueryNode>> {
        // Operand groups separated by top-level `||`.
        let mut or_groups: Vec<Vec<QueryNode>> = vec![Vec::new()];

        for span in spans {
            match span {
                ParenSpan::Group(inner) => {
                    if let Some(node) = self.compile_spans(inner)? {
                        or_groups.last_mut().unwrap().push(node);
                    }
                }
                ParenSpan::Text(text) => {
                    for piece in split_operators(text) {
                        match piece {
                            OperatorPiece::Or => or_groups.push(Vec::new()),
                            OperatorPiece::And => {}
                            OperatorPiece::Operand(fragment) => {
                                let fragment = fragment.trim();
                                if fragment.is_empty() {
                                    continue;
                                }
                                let leaf = self.compile_leaf(fragment)?;
                                or_groups.last_mut().unwrap().push(QueryNode::Leaf(leaf));
                            }
                        }
                    }
                }
            }
        }

        let mut or_nodes = or_groups
            .into_iter()
            .filter_map(|group| {
                group
                    .into_iter()
                    .reduce(|left, right| QueryNode::And(Box::new(left), Box::new(right)))
            })
            .collect::<Vec<_>>()
            .into_iter();

        let first = or_nodes.next();
        Ok(or_nodes.fold(first, |acc, node| {
            Some(match acc {
                Some(left) => QueryNode::Or(Box::new(left), Box::new(node)),
                None => node,
            })
        }))
    }

    /// 1つの区間テキストを葉にコンパイルします。
    fn compile_leaf(&self, fragment: &str) -> Result<QueryLeaf> {
        let (column, pattern_text) = match find_column_split(fragment) {
            Some(split) => {
                let name = unescape(fragment[..split].trim());
                match self.kind.column_for_query(&name) {
                    Some(column) => (Some(column), &fragment[split + 1..]),
                    None => (None, fragment),
                }
            }
            None => (None, fragment),
        };

        let pattern = unescape(pattern_text.trim());
        if pattern.is_empty() {
            return Err(JibikiError::invalid_argument(
                "query",
                "A column key must be followed by a pattern.",
            ));
        }

        let forms = self.expand_forms(&pattern);
        let mut alternatives: Vec<&str> = Vec::with_capacity(forms.len());
        for (_, form) in &forms {
            if !alternatives.contains(&form.as_str()) {
                alternatives.push(form.as_str());
            }
        }
        let regex = Regex::new(&format!("(?:{})", alternatives.join("|")))?;

        Ok(QueryLeaf {
            column,
            pattern,
            forms,
            regex,
        })
    }

    /// パターンの形態素形を階層ごとに1つずつ列挙します。
    ///
    /// アダプタが下位の形と同一なために省いた形は、下位の形を引き継ぎます。
    /// これにより、活用しないクエリトークンでも語幹テーブル内の
    /// 他の語の語幹に一致できます。解析が複数トークンに分かれる入力
    /// （空白を含むフレーズなど）は表層形のみに退化します。
    fn expand_forms(&self, pattern: &str) -> Vec<(NormalizationLevel, String)> {
        let raw = pattern.to_string();
        let analyzed = self.morphology.analyze(pattern);
        let (normalized, stem, canonical) = match analyzed.as_slice() {
            [token] if token.surface == pattern => {
                let normalized = token.normalized.clone().unwrap_or_else(|| raw.clone());
                let stem = token.stem.clone().unwrap_or_else(|| raw.clone());
                // 基本形が省かれたのは下位の形と同一だったため。語幹が独自なら
                // 語幹を、そうでなければ正規化形を引き継ぐ。
                let canonical = token.canonical.clone().unwrap_or_else(|| {
                    if token.stem.is_some() {
                        stem.clone()
                    } else {
                        normalized.clone()
                    }
                });
                (normalized, stem, canonical)
            }
            _ => (raw.clone(), raw.clone(), raw.clone()),
        };
        vec![
            (NormalizationLevel::Raw, raw),
            (NormalizationLevel::Normalized, normalized),
            (NormalizationLevel::Stem, stem),
            (NormalizationLevel::Canonical, canonical),
        ]
    }
}

/// トップレベルの演算子で分割した区間テキストの断片
enum OperatorPiece<'a> {
    Operand(&'a str),
    And,
    Or,
}

/// 区間テキストを非エスケープの`&&`/`||`で分割します。
///
/// 角括弧グループの内部は不透明として読み飛ばします。
fn split_operators(text: &str) -> Vec<OperatorPiece<'_>> {
    let bytes = text.as_bytes();
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut pos = 0;
    let mut escaped = false;
    while pos < bytes.len() {
        if escaped {
            escaped = false;
            pos += 1;
            continue;
        }
        match bytes[pos] {
            b'\\' => {
                escaped = true;
                pos += 1;
            }
            b'[' => {
                pos += 1;
                let mut inner_escaped = false;
                while pos < bytes.len() {
                    if inner_escaped {
                        inner_escaped = false;
                    } else if bytes[pos] == b'\\' {
                        inner_escaped = true;
                    } else if bytes[pos] == b']' {
                        pos += 1;
                        break;
                    }
                    pos += 1;
                }
            }
            b'&' | b'|' if pos + 1 < bytes.len() && bytes[pos + 1] == bytes[pos] => {
                pieces.push(OperatorPiece::Operand(&text[start..pos]));
                pieces.push(if bytes[pos] == b'&' {
                    OperatorPiece::And
                } else {
                    OperatorPiece::Or
                });
                pos += 2;
                start = pos;
            }
            _ => {
                pos += 1;
            }
        }
    }
    pieces.push(OperatorPiece::Operand(&text[start..]));
    pieces
}

/// 最初の非エスケープ`:`のバイト位置を探します。
fn find_column_split(fragment: &str) -> Option<usize> {
    let bytes = fragment.as_bytes();
    let mut pos = 0;
    let mut escaped = false;
    while pos < bytes.len() {
        if escaped {
            escaped = false;
        } else {
            match bytes[pos] {
                b'\\' => escaped = true,
                b':' => return Some(pos),
                _ => {}
            }
        }
        pos += 1;
    }
    None
}

/// エスケープ記号を取り除きます。
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
