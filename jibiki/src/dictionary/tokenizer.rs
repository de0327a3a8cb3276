//! 辞書フォーマットごとの行トークナイザ
//!
//! このモジュールは、ソースバッファをその場でトークン化する
//! フォーマット別の状態機械を提供します。トークナイザはトークンの開始位置を
//! 記録しながら区切りバイトをNUL終端で上書きするだけで、トークンごとの
//! コピーは一切行いません。
//!
//! 連続する区切りバイトは1つの終端として扱われます（長さ1..Nの終端連続）。
//! 行に必須の目印バイトが欠けている場合、トークナイザはそこまでに完成した
//! カラムを保持したまま打ち切ります。これは部分的成功でありエラーではありません。

use crate::dictionary::kind::DictionaryKind;
use crate::dictionary::line::{DictionaryLine, TextSpan};
use crate::dictionary::source::{SourceBuffer, TERMINATOR};

// Column positions fixed by the DictionaryKind::columns() table order.
// test_column_positions_match_tables verifies these against the tables.
const EDICT_KANJI: usize = 0;
const EDICT_READING: usize = 1;
const EDICT_DEFINITION: usize = 2;
const EDICT_ENTRY_ID: usize = 3;

const KANJIDIC_KANJI: usize = 0;
const KANJIDIC_STROKES: usize = 1;
const KANJIDIC_GRADE: usize = 2;
const KANJIDIC_FREQUENCY: usize = 3;
const KANJIDIC_ON: usize = 4;
const KANJIDIC_KUN: usize = 5;
const KANJIDIC_MEANING: usize = 6;

const EXAMPLES_PHRASE: usize = 0;
const EXAMPLES_MEANING: usize = 1;
const EXAMPLES_ENTRY_ID: usize = 2;

const RADICALS_KANJI: usize = 0;
const RADICALS_RADICALS: usize = 1;

/// トークン化の結果
pub(crate) struct TokenizeSummary {
    /// パースされた行（基準オフセット昇順）
    pub lines: Vec<DictionaryLine>,
    /// 目印バイトの欠落により打ち切られた行数
    pub incomplete: usize,
}

/// バッファ全体をその場でトークン化します。
///
/// 改行バイトと各フォーマットの区切りバイトはNUL終端で上書きされます。
/// 呼び出し後のバッファをトークン化前の内容として再利用することはできません。
///
/// # 引数
///
/// * `kind` - 辞書の種類
/// * `buffer` - トークン化対象のソースバッファ
pub(crate) fn tokenize(kind: DictionaryKind, buffer: &mut SourceBuffer) -> TokenizeSummary {
    let bytes = buffer.bytes_mut();
    let mut lines = Vec::new();
    let mut incomplete = 0;

    let mut start = 0;
    while start < bytes.len() {
        let end = bytes[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| start + i)
            .unwrap_or(bytes.len());
        if end < bytes.len() {
            bytes[end] = TERMINATOR;
        }
        // Strip a carriage return left by CRLF sources.
        let mut content_end = end;
        if content_end > start && bytes[content_end - 1] == b'\r' {
            content_end -= 1;
            bytes[content_end] = TERMINATOR;
        }

        if content_end > start {
            let mut line = DictionaryLine::empty(kind);
            let complete = tokenize_line(kind, bytes, start, content_end, &mut line);
            if !complete {
                incomplete += 1;
            }
            if line.offset().is_some() {
                lines.push(line);
            }
        }
        start = end + 1;
    }

    TokenizeSummary { lines, incomplete }
}

fn tokenize_line(
    kind: DictionaryKind,
    bytes: &mut [u8],
    start: usize,
    end: usize,
    line: &mut DictionaryLine,
) -> bool {
    match kind {
        DictionaryKind::Edict => tokenize_edict(bytes, start, end, line),
        DictionaryKind::Kanjidic => tokenize_kanjidic(bytes, start, end, line),
        DictionaryKind::Examples => tokenize_examples(bytes, start, end, line),
        DictionaryKind::Radicals => tokenize_radicals(bytes, start, end, line),
    }
}

/// `表記 [よみ] /(n) 語義/語義/EntL1234567X/`
///
/// 読み括弧は省略可能です。`EntL`の目印を持つ最後のセグメントがエントリIDに
/// なります。目印が現れない場合、それまでのカラムを保持して打ち切ります。
fn tokenize_edict(bytes: &mut [u8], start: usize, end: usize, line: &mut DictionaryLine) -> bool {
    let mut pos = start;
    zero_run(bytes, &mut pos, end, is_space);

    // Headword up to the first space run.
    if let Some(span) = take_until(bytes, &mut pos, end, is_space) {
        line.columns[EDICT_KANJI].push(span);
    }
    zero_run(bytes, &mut pos, end, is_space);

    // Optional reading in brackets.
    if pos < end && bytes[pos] == b'[' {
        bytes[pos] = TERMINATOR;
        pos += 1;
        if let Some(span) = take_until(bytes, &mut pos, end, |b| b == b']') {
            line.columns[EDICT_READING].push(span);
        }
        if pos < end {
            bytes[pos] = TERMINATOR;
            pos += 1;
        }
        zero_run(bytes, &mut pos, end, is_space);
    }

    // Slash-separated senses; the EntL segment is the ID anchor.
    let mut found_id = false;
    while pos < end && bytes[pos] == b'/' {
        bytes[pos] = TERMINATOR;
        pos += 1;
        let Some(span) = take_until(bytes, &mut pos, end, |b| b == b'/') else {
            continue;
        };
        let seg = &bytes[span.offset() as usize..span.offset() as usize + span.len as usize];
        if seg.starts_with(b"EntL") {
            line.columns[EDICT_ENTRY_ID].push(span);
            found_id = true;
        } else {
            line.columns[EDICT_DEFINITION].push(span);
        }
    }

    found_id
}

/// `亜 3021 U4e9c B7 ... S7 F1509 ア つ.ぐ T1 や {Asia} {rank next}`
///
/// フィールドは空白区切りです。`S`/`G`/`F`接頭辞の数値フィールド、
/// かなの読みフィールド、波括弧の意味フィールドを認識し、それ以外の
/// フィールド（コードポイント、部首番号など）は読み飛ばします。
/// `T1`以降の読みフィールドは名乗りであり、登録しません。
fn tokenize_kanjidic(
    bytes: &mut [u8],
    start: usize,
    end: usize,
    line: &mut DictionaryLine,
) -> bool {
    if bytes[start] == b'#' {
        return true;
    }

    let mut pos = start;
    zero_run(bytes, &mut pos, end, is_space);

    if let Some(span) = take_until(bytes, &mut pos, end, is_space) {
        line.columns[KANJIDIC_KANJI].push(span);
    }

    let mut in_names = false;
    loop {
        zero_run(bytes, &mut pos, end, is_space);
        if pos >= end {
            break;
        }

        if bytes[pos] == b'{' {
            bytes[pos] = TERMINATOR;
            pos += 1;
            if let Some(span) = take_until(bytes, &mut pos, end, |b| b == b'}') {
                line.columns[KANJIDIC_MEANING].push(span);
            }
            if pos < end {
                bytes[pos] = TERMINATOR;
                pos += 1;
            }
            continue;
        }

        let Some(span) = take_until(bytes, &mut pos, end, is_space) else {
            continue;
        };
        let field_start = span.offset() as usize;
        let field = &bytes[field_start..field_start + span.len as usize];

        match classify_kanjidic_field(field) {
            KanjidicField::Numeric(column) => {
                // Drop the single-letter prefix from the stored token.
                bytes[field_start] = TERMINATOR;
                line.columns[column].push(TextSpan::new(span.offset() + 1, span.len - 1));
            }
            KanjidicField::NameMarker => in_names = true,
            KanjidicField::OnReading if !in_names => {
                line.columns[KANJIDIC_ON].push(span);
            }
            KanjidicField::KunReading if !in_names => {
                line.columns[KANJIDIC_KUN].push(span);
            }
            _ => {}
        }
    }

    true
}

enum KanjidicField {
    Numeric(usize),
    OnReading,
    KunReading,
    NameMarker,
    Skipped,
}

fn classify_kanjidic_field(field: &[u8]) -> KanjidicField {
    if field.len() >= 2 && field[1..].iter().all(u8::is_ascii_digit) {
        match field[0] {
            b'S' => return KanjidicField::Numeric(KANJIDIC_STROKES),
            b'G' => return KanjidicField::Numeric(KANJIDIC_GRADE),
            b'F' => return KanjidicField::Numeric(KANJIDIC_FREQUENCY),
            b'T' => return KanjidicField::NameMarker,
            _ => {}
        }
    }
    match std::str::from_utf8(field).ok().and_then(|s| s.chars().next()) {
        Some('\u{30A0}'..='\u{30FF}') => KanjidicField::OnReading,
        Some('\u{3040}'..='\u{309F}') => KanjidicField::KunReading,
        _ => KanjidicField::Skipped,
    }
}

/// 田中コーパスの例文行。
///
/// `A: 日本語文\t英文#ID=12345_67890`は最初の空白でタグと本体に分かれ、
/// 本体は`#`で文対とIDに分かれます。`B: `行は分かち書きされた語列で、
/// 各語を例文カラムに登録します。`#`の目印を欠くA行は文対までで打ち切ります。
fn tokenize_examples(
    bytes: &mut [u8],
    start: usize,
    end: usize,
    line: &mut DictionaryLine,
) -> bool {
    let mut pos = start;
    let Some(tag) = take_until(bytes, &mut pos, end, is_space) else {
        return true;
    };
    let tag_start = tag.offset() as usize;
    let tag_bytes = &bytes[tag_start..tag_start + tag.len as usize];
    let is_a_line = tag_bytes == &b"A:"[..];
    let is_b_line = tag_bytes == &b"B:"[..];
    // The tag itself is not a column; blank it out of the buffer.
    bytes[tag_start..tag_start + tag.len as usize].fill(TERMINATOR);
    zero_run(bytes, &mut pos, end, is_space);

    if is_b_line {
        // Pre-segmented words, one span each.
        loop {
            zero_run(bytes, &mut pos, end, is_space);
            match take_until(bytes, &mut pos, end, is_space) {
                Some(span) => line.columns[EXAMPLES_PHRASE].push(span),
                None => break,
            }
        }
        return true;
    }
    if !is_a_line {
        return true;
    }

    if let Some(span) = take_until(bytes, &mut pos, end, |b| b == b'\t') {
        line.columns[EXAMPLES_PHRASE].push(span);
    }
    zero_run(bytes, &mut pos, end, |b| b == b'\t');

    if let Some(span) = take_until(bytes, &mut pos, end, |b| b == b'#') {
        line.columns[EXAMPLES_MEANING].push(span);
    }
    if pos >= end {
        // Missing ID anchor: keep the completed columns.
        return false;
    }
    bytes[pos] = TERMINATOR;
    pos += 1;

    if let Some(span) = take_until(bytes, &mut pos, end, |_| false) {
        line.columns[EXAMPLES_ENTRY_ID].push(span);
    }
    true
}

/// `亜 : ｜ 一 口`
///
/// 最初の句読点・空白の連続で見出し漢字と部首列に分かれ、部首列は
/// 空白の連続で分割されます。`#`で始まる行はコメントです。
fn tokenize_radicals(
    bytes: &mut [u8],
    start: usize,
    end: usize,
    line: &mut DictionaryLine,
) -> bool {
    if bytes[start] == b'#' {
        return true;
    }

    let mut pos = start;
    zero_run(bytes, &mut pos, end, is_radical_separator);

    if let Some(span) = take_until(bytes, &mut pos, end, is_radical_separator) {
        line.columns[RADICALS_KANJI].push(span);
    }

    loop {
        zero_run(bytes, &mut pos, end, is_radical_separator);
        match take_until(bytes, &mut pos, end, is_space) {
            Some(span) => line.columns[RADICALS_RADICALS].push(span),
            None => break,
        }
    }

    true
}

// Terminators written by an earlier pass collapse like any separator run,
// which keeps tokenization idempotent on already-tokenized text.
#[inline(always)]
fn is_space(b: u8) -> bool {
    b == b' ' || b == b'\t' || b == TERMINATOR
}

#[inline(always)]
fn is_radical_separator(b: u8) -> bool {
    is_space(b) || b == b':'
}

/// `pos`から区切り述語が真になるまでのトークン範囲を切り出します。
///
/// 長さ0のトークンは`None`を返します。`pos`はトークン終端（区切りまたは
/// 行末）に進みます。区切りバイト自体の上書きは呼び出し側が行います。
fn take_until<F>(bytes: &[u8], pos: &mut usize, end: usize, is_delimiter: F) -> Option<TextSpan>
where
    F: Fn(u8) -> bool,
{
    let start = *pos;
    while *pos < end && !is_delimiter(bytes[*pos]) {
        *pos += 1;
    }
    if *pos > start {
        Some(TextSpan::new(start as u64, (*pos - start) as u32))
    } else {
        None
    }
}

/// `pos`から連続する区切りバイトをNUL終端で上書きして読み飛ばします。
fn zero_run<F>(bytes: &mut [u8], pos: &mut usize, end: usize, is_delimiter: F)
where
    F: Fn(u8) -> bool,
{
    while *pos < end && is_delimiter(bytes[*pos]) {
        bytes[*pos] = TERMINATOR;
        *pos += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::kind::{ColumnId, DictionaryKind};
    use crate::dictionary::source::SourceBuffer;

    fn parse(kind: DictionaryKind, text: &str) -> (SourceBuffer, TokenizeSummary) {
        let mut buffer = SourceBuffer::from_bytes(text.as_bytes().to_vec()).unwrap();
        let summary = tokenize(kind, &mut buffer);
        (buffer, summary)
    }

    fn texts<'a>(
        buffer: &'a SourceBuffer,
        line: &DictionaryLine,
        position: usize,
    ) -> Vec<&'a str> {
        line.columns[position]
            .iter()
            .map(|span| span.text(buffer))
            .collect()
    }

    #[test]
    fn test_column_positions_match_tables() {
        use DictionaryKind::*;
        assert_eq!(Edict.column_position(ColumnId::Kanji), Some(EDICT_KANJI));
        assert_eq!(Edict.column_position(ColumnId::Reading), Some(EDICT_READING));
        assert_eq!(
            Edict.column_position(ColumnId::Definition),
            Some(EDICT_DEFINITION)
        );
        assert_eq!(Edict.column_position(ColumnId::EntryId), Some(EDICT_ENTRY_ID));
        assert_eq!(
            Kanjidic.column_position(ColumnId::Meaning),
            Some(KANJIDIC_MEANING)
        );
        assert_eq!(
            Examples.column_position(ColumnId::EntryId),
            Some(EXAMPLES_ENTRY_ID)
        );
        assert_eq!(
            Radicals.column_position(ColumnId::Radicals),
            Some(RADICALS_RADICALS)
        );
    }

    #[test]
    fn test_edict_full_line() {
        let (buffer, summary) = parse(
            DictionaryKind::Edict,
            "食べる [たべる] /(v1) to eat/to live on/EntL1358280X/\n",
        );
        assert_eq!(summary.lines.len(), 1);
        assert_eq!(summary.incomplete, 0);
        let line = &summary.lines[0];
        assert_eq!(texts(&buffer, line, EDICT_KANJI), ["食べる"]);
        assert_eq!(texts(&buffer, line, EDICT_READING), ["たべる"]);
        assert_eq!(
            texts(&buffer, line, EDICT_DEFINITION),
            ["(v1) to eat", "to live on"]
        );
        assert_eq!(texts(&buffer, line, EDICT_ENTRY_ID), ["EntL1358280X"]);
    }

    #[test]
    fn test_edict_without_reading() {
        let (buffer, summary) = parse(
            DictionaryKind::Edict,
            "ノート /(n) notebook/EntL1092570X/\n",
        );
        let line = &summary.lines[0];
        assert_eq!(texts(&buffer, line, EDICT_KANJI), ["ノート"]);
        assert!(texts(&buffer, line, EDICT_READING).is_empty());
        assert_eq!(texts(&buffer, line, EDICT_DEFINITION), ["(n) notebook"]);
    }

    #[test]
    fn test_edict_missing_id_anchor_is_partial() {
        let (buffer, summary) = parse(
            DictionaryKind::Edict,
            "食べる [たべる] /(v1) to eat/\n",
        );
        assert_eq!(summary.incomplete, 1);
        let line = &summary.lines[0];
        assert_eq!(texts(&buffer, line, EDICT_DEFINITION), ["(v1) to eat"]);
        assert!(texts(&buffer, line, EDICT_ENTRY_ID).is_empty());
    }

    #[test]
    fn test_edict_single_token_line() {
        let (buffer, summary) = parse(DictionaryKind::Edict, "見出し\n");
        assert_eq!(summary.lines.len(), 1);
        let line = &summary.lines[0];
        assert_eq!(texts(&buffer, line, EDICT_KANJI), ["見出し"]);
        assert!(texts(&buffer, line, EDICT_DEFINITION).is_empty());
    }

    #[test]
    fn test_edict_consecutive_separators_collapse() {
        let (buffer, summary) = parse(
            DictionaryKind::Edict,
            "語  [ご]  /(n) word//EntL1276700X/\n",
        );
        let line = &summary.lines[0];
        assert_eq!(texts(&buffer, line, EDICT_READING), ["ご"]);
        assert_eq!(texts(&buffer, line, EDICT_DEFINITION), ["(n) word"]);
        assert_eq!(texts(&buffer, line, EDICT_ENTRY_ID), ["EntL1276700X"]);
    }

    #[test]
    fn test_kanjidic_line() {
        let (buffer, summary) = parse(
            DictionaryKind::Kanjidic,
            "亜 3021 U4e9c B7 C1 G8 S7 F1509 ア つ.ぐ T1 や {Asia} {rank next}\n",
        );
        let line = &summary.lines[0];
        assert_eq!(texts(&buffer, line, KANJIDIC_KANJI), ["亜"]);
        assert_eq!(texts(&buffer, line, KANJIDIC_STROKES), ["7"]);
        assert_eq!(texts(&buffer, line, KANJIDIC_GRADE), ["8"]);
        assert_eq!(texts(&buffer, line, KANJIDIC_FREQUENCY), ["1509"]);
        assert_eq!(texts(&buffer, line, KANJIDIC_ON), ["ア"]);
        assert_eq!(texts(&buffer, line, KANJIDIC_KUN), ["つ.ぐ"]);
        assert_eq!(
            texts(&buffer, line, KANJIDIC_MEANING),
            ["Asia", "rank next"]
        );
        // 名乗りの「や」は登録されない。
        assert_eq!(texts(&buffer, line, KANJIDIC_KUN).len(), 1);
    }

    #[test]
    fn test_kanjidic_comment_skipped() {
        let (_, summary) = parse(DictionaryKind::Kanjidic, "# KANJIDIC comment\n亜 S7\n");
        assert_eq!(summary.lines.len(), 1);
    }

    #[test]
    fn test_examples_a_line() {
        let (buffer, summary) = parse(
            DictionaryKind::Examples,
            "A: 彼は学生です。\tHe is a student.#ID=300_1001\n",
        );
        let line = &summary.lines[0];
        assert_eq!(texts(&buffer, line, EXAMPLES_PHRASE), ["彼は学生です。"]);
        assert_eq!(texts(&buffer, line, EXAMPLES_MEANING), ["He is a student."]);
        assert_eq!(texts(&buffer, line, EXAMPLES_ENTRY_ID), ["ID=300_1001"]);
    }

    #[test]
    fn test_examples_missing_anchor_is_partial() {
        let (buffer, summary) = parse(
            DictionaryKind::Examples,
            "A: 彼は学生です。\tHe is a student.\n",
        );
        assert_eq!(summary.incomplete, 1);
        let line = &summary.lines[0];
        assert_eq!(texts(&buffer, line, EXAMPLES_MEANING), ["He is a student."]);
        assert!(texts(&buffer, line, EXAMPLES_ENTRY_ID).is_empty());
    }

    #[test]
    fn test_examples_b_line_segments() {
        let (buffer, summary) = parse(DictionaryKind::Examples, "B: 彼 は 学生 です\n");
        let line = &summary.lines[0];
        assert_eq!(
            texts(&buffer, line, EXAMPLES_PHRASE),
            ["彼", "は", "学生", "です"]
        );
    }

    #[test]
    fn test_radicals_line() {
        let (buffer, summary) = parse(DictionaryKind::Radicals, "亜 : ｜ 一 口\n");
        let line = &summary.lines[0];
        assert_eq!(texts(&buffer, line, RADICALS_KANJI), ["亜"]);
        assert_eq!(
            texts(&buffer, line, RADICALS_RADICALS),
            ["｜", "一", "口"]
        );
    }

    #[test]
    fn test_radicals_no_second_token() {
        let (buffer, summary) = parse(DictionaryKind::Radicals, "亜 :\n");
        let line = &summary.lines[0];
        assert_eq!(texts(&buffer, line, RADICALS_KANJI), ["亜"]);
        assert!(texts(&buffer, line, RADICALS_RADICALS).is_empty());
    }

    #[test]
    fn test_retokenizing_tokenized_output_is_stable() {
        // 整形済み入力では、終端は他の区切りと同様に連続として潰れるため、
        // トークン化済みテキストの再トークン化はカラム数を変えない。
        let text = "亜 : ｜ 一 口";
        let (buffer, first_pass) = parse(DictionaryKind::Radicals, text);
        let first: Vec<usize> = first_pass.lines[0].columns.iter().map(Vec::len).collect();

        let mut retokenized =
            SourceBuffer::from_bytes(buffer.as_bytes().to_vec()).unwrap();
        let second_pass = tokenize(DictionaryKind::Radicals, &mut retokenized);
        let second: Vec<usize> = second_pass.lines[0].columns.iter().map(Vec::len).collect();

        assert_eq!(first, second);
    }

    #[test]
    fn test_crlf_line_endings() {
        let (buffer, summary) = parse(DictionaryKind::Radicals, "亜 : 一\r\n口 : 一\r\n");
        assert_eq!(summary.lines.len(), 2);
        assert_eq!(texts(&buffer, &summary.lines[1], RADICALS_KANJI), ["口"]);
    }
}
