//! 形態素解析アダプタ
//!
//! このモジュールは、外部の形態素解析バックエンドをエンジンから切り離すための
//! アダプタ境界を定義します。エンジンはトークンごとに最大4つの形
//! （表層形・正規化形・語幹形・基本形）を受け取り、インデックスの各階層に
//! 振り分けます。解析が失敗または欠落した場合は表層形のみに退化します。
//!
//! 既定実装の[`FoldingMorphology`]は外部プロセスを必要としない純粋な
//! 文字種折り畳み（大文字小文字の折り畳みとカタカナ→ひらがな変換）と
//! 小さな活用語尾テーブルによる近似語幹抽出を提供します。

/// 1トークンの形態素解析結果
///
/// 各フィールドはインデックスの正規化階層に対応します。
/// `surface`以外は、解析できなかった場合や下位の形と同一になる場合に
/// `None`となることがあります。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MorphForms {
    /// 表層形（入力そのまま）
    pub surface: String,
    /// 正規化形（大文字小文字の折り畳み + カタカナ→ひらがな変換）
    pub normalized: Option<String>,
    /// 語幹形
    pub stem: Option<String>,
    /// 基本形（語幹形の正規化）
    pub canonical: Option<String>,
}

/// 形態素解析バックエンドの境界トレイト
///
/// エンジンはこのトレイトを副作用のない純粋関数として扱います。
/// 実装は内部キャッシュを持っても構いませんが、同じ入力に対して
/// 同じ結果を返す必要があります。
pub trait Morphology: Send + Sync {
    /// テキストをトークン列に分解し、各トークンの形を返します。
    ///
    /// # 引数
    ///
    /// * `text` - 解析対象のテキスト
    ///
    /// # 戻り値
    ///
    /// 出現順のトークン解析結果。解析できない入力に対しては
    /// 表層形のみのエントリに退化します。
    fn analyze(&self, text: &str) -> Vec<MorphForms>;
}

/// 外部バックエンドを使わない既定の形態素解析アダプタ
///
/// 空白とASCII区切り文字でトークンに分割し、各トークンに対して
/// 文字種折り畳みと近似語幹抽出を適用します。日本語の活用展開は
/// 小さな語尾テーブルによる近似であり、完全な解析は外部バックエンドに
/// 委ねられます。
#[derive(Default, Debug, Clone, Copy)]
pub struct FoldingMorphology;

impl FoldingMorphology {
    /// 新しいインスタンスを作成します。
    pub fn new() -> Self {
        Self
    }
}

// Approximate deinflection endings. Longest match wins.
const JA_STEM_ENDINGS: &[(&str, &str)] = &[
    ("しました", "する"),
    ("しません", "する"),
    ("します", "する"),
    ("ました", "る"),
    ("ません", "る"),
    ("ます", "る"),
    ("かった", "い"),
    ("くない", "い"),
];

const EN_STEM_ENDINGS: &[&str] = &["ing", "ies", "ed", "es", "s"];

impl Morphology for FoldingMorphology {
    fn analyze(&self, text: &str) -> Vec<MorphForms> {
        split_tokens(text)
            .map(|token| {
                let normalized = some_if_distinct(fold(token), &[token]);
                let stem = approximate_stem(token).and_then(|s| {
                    some_if_distinct(s, &[token, normalized.as_deref().unwrap_or("")])
                });
                let canonical = stem.as_deref().map(fold_owned).and_then(|c| {
                    some_if_distinct(
                        c,
                        &[
                            token,
                            normalized.as_deref().unwrap_or(""),
                            stem.as_deref().unwrap_or(""),
                        ],
                    )
                });
                MorphForms {
                    surface: token.to_string(),
                    normalized,
                    stem,
                    canonical,
                }
            })
            .collect()
    }
}

/// 空白とASCII区切り文字の連続でテキストをトークンに分割します。
///
/// 日本語の連続文字列（空白を含まない）は1トークンとして扱われます。
fn split_tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| c.is_whitespace() || is_separator_punct(c))
        .filter(|t| !t.is_empty())
}

#[inline(always)]
fn is_separator_punct(c: char) -> bool {
    c.is_ascii_punctuation() && c != '-' && c != '\''
}

/// 大文字小文字の折り畳みとカタカナ→ひらがな変換を適用します。
pub(crate) fn fold(token: &str) -> String {
    token
        .chars()
        .flat_map(|c| fold_char(c).to_lowercase())
        .collect()
}

fn fold_owned(token: &str) -> String {
    fold(token)
}

/// カタカナをひらがなに折り畳みます。対象外の文字はそのまま返します。
#[inline(always)]
fn fold_char(c: char) -> char {
    match c {
        // Katakana ァ..ヶ maps directly onto the hiragana block.
        '\u{30A1}'..='\u{30F6}' => {
            char::from_u32(c as u32 - 0x60).unwrap_or(c)
        }
        _ => c,
    }
}

/// 小さな語尾テーブルによる近似語幹抽出。
///
/// 完全な活用解析は外部バックエンドの責務であり、ここでは検索の再現率を
/// わずかに上げるための保守的な近似のみを行います。
fn approximate_stem(token: &str) -> Option<String> {
    for (ending, replacement) in JA_STEM_ENDINGS {
        if let Some(base) = token.strip_suffix(ending) {
            if !base.is_empty() {
                return Some(format!("{base}{replacement}"));
            }
        }
    }
    if token.is_ascii() && token.len() >= 5 {
        for ending in EN_STEM_ENDINGS {
            if let Some(base) = token.strip_suffix(ending) {
                if base.len() >= 3 {
                    return Some(base.to_string());
                }
            }
        }
    }
    None
}

/// 下位の形と同一な形を`None`に落とします。
fn some_if_distinct(form: String, lower: &[&str]) -> Option<String> {
    if lower.iter().any(|l| *l == form) {
        None
    } else {
        Some(form)
    }
}
