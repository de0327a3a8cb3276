//! 辞書の種類とカラム定義
//!
//! このモジュールは、対応する辞書フォーマットの種類と、種類ごとに固定された
//! カラム集合（能力テーブル）を定義します。カラムの集合・クエリでの呼び名・
//! 取り扱いモードは辞書の種類ごとに静的に決まっており、実行時に変更されることは
//! ありません。

use std::str::FromStr;

/// 対応する辞書フォーマットの種類
#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
#[repr(u8)]
pub enum DictionaryKind {
    /// EDICT形式の語彙辞書（`表記 [よみ] /語義/.../EntL…/`）
    Edict,
    /// KANJIDIC形式の漢字辞書
    Kanjidic,
    /// 田中コーパス形式の例文辞書
    Examples,
    /// KRADFILE形式の部首分解テーブル
    Radicals,
}

impl DictionaryKind {
    /// 種類の名前を取得します。
    ///
    /// キャッシュディレクトリのパス要素としても使用されます。
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Edict => "edict",
            Self::Kanjidic => "kanjidic",
            Self::Examples => "examples",
            Self::Radicals => "radicals",
        }
    }

    /// この種類のカラム定義テーブルを取得します。
    ///
    /// テーブルの順序はシリアライズ時のカラム順序と一致します。
    pub const fn columns(&self) -> &'static [ColumnDef] {
        match self {
            Self::Edict => EDICT_COLUMNS,
            Self::Kanjidic => KANJIDIC_COLUMNS,
            Self::Examples => EXAMPLES_COLUMNS,
            Self::Radicals => RADICALS_COLUMNS,
        }
    }

    /// クエリ内のカラム名から[`ColumnId`]を解決します。
    ///
    /// # 引数
    ///
    /// * `name` - クエリ文字列に現れたカラム名（例: `"reading"`）
    ///
    /// # 戻り値
    ///
    /// この種類で認識されるカラム名の場合は`Some(ColumnId)`
    pub fn column_for_query(&self, name: &str) -> Option<ColumnId> {
        self.columns()
            .iter()
            .find(|def| def.query_name == name)
            .map(|def| def.id)
    }

    /// 指定されたカラムのテーブル内位置を取得します。
    pub(crate) fn column_position(&self, id: ColumnId) -> Option<usize> {
        self.columns().iter().position(|def| def.id == id)
    }
}

impl FromStr for DictionaryKind {
    type Err = &'static str;

    /// 文字列から辞書の種類をパースします。
    ///
    /// # 引数
    ///
    /// * `kind` - パース対象の文字列（"edict"、"kanjidic"、"examples"、"radicals"のいずれか）
    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "edict" => Ok(Self::Edict),
            "kanjidic" => Ok(Self::Kanjidic),
            "examples" => Ok(Self::Examples),
            "radicals" => Ok(Self::Radicals),
            _ => Err("Could not parse a dictionary kind"),
        }
    }
}

/// 行内のカラムの識別子
///
/// すべての辞書種類のカラムをまとめた列挙型です。1つの種類が使用するのは
/// このうちの固定された部分集合のみで、その集合は
/// [`DictionaryKind::columns`]が返します。
#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
#[repr(u8)]
pub enum ColumnId {
    /// 見出しの漢字表記
    Kanji,
    /// 読み（かな）
    Reading,
    /// 語義
    Definition,
    /// エントリID
    EntryId,
    /// 画数
    Strokes,
    /// 学年
    Grade,
    /// 使用頻度順位
    Frequency,
    /// 音読み
    OnReading,
    /// 訓読み
    KunReading,
    /// 意味
    Meaning,
    /// 例文
    Phrase,
    /// 構成部首
    Radicals,
}

/// カラムの取り扱いモード
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ColumnHandling {
    /// インデックスに登録され、検索対象となるカラム
    IndexedAndSearchable,
    /// 保持のみのカラム（検索対象外）
    Stored,
}

/// 辞書種類ごとのカラム定義
#[derive(Debug)]
pub struct ColumnDef {
    /// カラムの識別子
    pub id: ColumnId,
    /// クエリ文字列で使用される名前
    pub query_name: &'static str,
    /// 取り扱いモード
    pub handling: ColumnHandling,
}

impl ColumnDef {
    /// このカラムが検索対象かどうかを確認します。
    #[inline(always)]
    pub fn is_searchable(&self) -> bool {
        matches!(self.handling, ColumnHandling::IndexedAndSearchable)
    }
}

const EDICT_COLUMNS: &[ColumnDef] = &[
    ColumnDef {
        id: ColumnId::Kanji,
        query_name: "kanji",
        handling: ColumnHandling::IndexedAndSearchable,
    },
    ColumnDef {
        id: ColumnId::Reading,
        query_name: "reading",
        handling: ColumnHandling::IndexedAndSearchable,
    },
    ColumnDef {
        id: ColumnId::Definition,
        query_name: "definition",
        handling: ColumnHandling::IndexedAndSearchable,
    },
    ColumnDef {
        id: ColumnId::EntryId,
        query_name: "id",
        handling: ColumnHandling::Stored,
    },
];

const KANJIDIC_COLUMNS: &[ColumnDef] = &[
    ColumnDef {
        id: ColumnId::Kanji,
        query_name: "kanji",
        handling: ColumnHandling::IndexedAndSearchable,
    },
    ColumnDef {
        id: ColumnId::Strokes,
        query_name: "strokes",
        handling: ColumnHandling::Stored,
    },
    ColumnDef {
        id: ColumnId::Grade,
        query_name: "grade",
        handling: ColumnHandling::Stored,
    },
    ColumnDef {
        id: ColumnId::Frequency,
        query_name: "frequency",
        handling: ColumnHandling::Stored,
    },
    ColumnDef {
        id: ColumnId::OnReading,
        query_name: "on",
        handling: ColumnHandling::IndexedAndSearchable,
    },
    ColumnDef {
        id: ColumnId::KunReading,
        query_name: "kun",
        handling: ColumnHandling::IndexedAndSearchable,
    },
    ColumnDef {
        id: ColumnId::Meaning,
        query_name: "meaning",
        handling: ColumnHandling::IndexedAndSearchable,
    },
];

const EXAMPLES_COLUMNS: &[ColumnDef] = &[
    ColumnDef {
        id: ColumnId::Phrase,
        query_name: "phrase",
        handling: ColumnHandling::IndexedAndSearchable,
    },
    ColumnDef {
        id: ColumnId::Meaning,
        query_name: "meaning",
        handling: ColumnHandling::IndexedAndSearchable,
    },
    ColumnDef {
        id: ColumnId::EntryId,
        query_name: "id",
        handling: ColumnHandling::Stored,
    },
];

const RADICALS_COLUMNS: &[ColumnDef] = &[
    ColumnDef {
        id: ColumnId::Kanji,
        query_name: "kanji",
        handling: ColumnHandling::IndexedAndSearchable,
    },
    ColumnDef {
        id: ColumnId::Radicals,
        query_name: "radicals",
        handling: ColumnHandling::IndexedAndSearchable,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_for_query() {
        assert_eq!(
            DictionaryKind::Edict.column_for_query("reading"),
            Some(ColumnId::Reading)
        );
        assert_eq!(DictionaryKind::Edict.column_for_query("on"), None);
        assert_eq!(
            DictionaryKind::Kanjidic.column_for_query("on"),
            Some(ColumnId::OnReading)
        );
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("edict".parse(), Ok(DictionaryKind::Edict));
        assert!("unknown".parse::<DictionaryKind>().is_err());
    }

    #[test]
    fn test_column_position_matches_table_order() {
        assert_eq!(
            DictionaryKind::Examples.column_position(ColumnId::Meaning),
            Some(1)
        );
        assert_eq!(
            DictionaryKind::Examples.column_position(ColumnId::Radicals),
            None
        );
    }
}
