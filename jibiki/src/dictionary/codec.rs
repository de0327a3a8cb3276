//! 行ストアのバイナリシリアライゼーション
//!
//! このモジュールは、[`LineStore`]をソースバッファ相対のコンパクトな
//! バイナリ形式に往復変換します。すべての文字列は外部の[`SourceBuffer`]への
//! バイトオフセットとして保存され、文字データそのものは一切含まれません。
//! このためキャッシュは小さく保たれますが、生成元と同一のソースバッファに
//! 恒久的に結び付きます。
//!
//! ワイヤ形式（リトルエンディアン）:
//!
//! ```text
//! [line_count: u64]
//!   { [column_count: u32]
//!       { [offset: u64]... [terminator: u64 = MAX] } x column_count
//!   } x line_count
//! ```
//!
//! トークンの長さは保存されません。デシリアライズ時にソースバッファ内の
//! NUL終端から復元されます。

use std::sync::Arc;

use crate::dictionary::kind::DictionaryKind;
use crate::dictionary::line::{DictionaryLine, LineStore, TextSpan};
use crate::dictionary::source::SourceBuffer;
use crate::errors::{JibikiError, Result};

/// オフセット列の終端マーカー
const OFFSET_TERMINATOR: u64 = u64::MAX;

/// シリアライズ後のバイト数を計算します。
///
/// # 引数
///
/// * `store` - 対象の行ストア
pub fn serialized_len(store: &LineStore) -> usize {
    let mut len = 8;
    for line in store.lines() {
        len += 4;
        for spans in &line.columns {
            len += spans.len() * 8 + 8;
        }
    }
    len
}

/// 行ストアをバイト列にシリアライズします。
///
/// # 引数
///
/// * `store` - 対象の行ストア
/// * `out` - 出力先のバッファ
pub fn serialize(store: &LineStore, out: &mut Vec<u8>) {
    out.reserve(serialized_len(store));
    out.extend_from_slice(&(store.len() as u64).to_le_bytes());
    for line in store.lines() {
        out.extend_from_slice(&(line.columns.len() as u32).to_le_bytes());
        for spans in &line.columns {
            for span in spans {
                out.extend_from_slice(&span.offset().to_le_bytes());
            }
            out.extend_from_slice(&OFFSET_TERMINATOR.to_le_bytes());
        }
    }
}

/// シリアライズ済みペイロードのデコーダ
///
/// 1つのデコーダは厳密に1回だけ使用できます。同じデコーダに対する2回目の
/// [`read_line_store`](Self::read_line_store)は[`JibikiError::CorruptCache`]で
/// 失敗します。ペイロードを再デコードする必要がある場合は、新しいデコーダを
/// 作成してください。
pub struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    consumed: bool,
}

impl<'a> Decoder<'a> {
    /// ペイロードに対する新しいデコーダを作成します。
    ///
    /// # 引数
    ///
    /// * `bytes` - シリアライズ済みペイロード
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            consumed: false,
        }
    }

    /// 行ストアをデシリアライズします。
    ///
    /// すべてのオフセットについて、`buffer`の範囲内にあることと
    /// UTF-8の文字境界を分断しないことを検証します。
    ///
    /// # 引数
    ///
    /// * `kind` - 辞書の種類
    /// * `buffer` - オフセットの参照先となるソースバッファ
    ///
    /// # エラー
    ///
    /// 不正なオフセット、途中で途切れたペイロード、カラム数の不一致、
    /// またはデコーダの再使用に対して[`JibikiError::CorruptCache`]を返します。
    /// パニックすることはありません。
    pub fn read_line_store(
        &mut self,
        kind: DictionaryKind,
        buffer: &Arc<SourceBuffer>,
    ) -> Result<LineStore> {
        if self.consumed {
            return Err(JibikiError::corrupt_cache(
                "the payload has already been decoded; a serialized payload is single-use",
            ));
        }
        self.consumed = true;

        let expected_columns = kind.columns().len();
        let line_count = self.read_u64()?;
        // 8バイトの行ヘッダすら残っていない行数は即座に不正。
        if line_count > (self.bytes.len() as u64 - self.pos as u64) / 4 {
            return Err(JibikiError::corrupt_cache(format!(
                "line count {line_count} exceeds the remaining payload"
            )));
        }

        let mut lines = Vec::with_capacity(line_count as usize);
        for _ in 0..line_count {
            let column_count = self.read_u32()? as usize;
            if column_count != expected_columns {
                return Err(JibikiError::corrupt_cache(format!(
                    "column count {column_count} does not match the {} columns of a {} line",
                    expected_columns,
                    kind.name()
                )));
            }
            let mut line = DictionaryLine::empty(kind);
            for column in line.columns.iter_mut() {
                loop {
                    let offset = self.read_u64()?;
                    if offset == OFFSET_TERMINATOR {
                        break;
                    }
                    let token = buffer.token_at(offset)?;
                    column.push(TextSpan::new(offset, token.len() as u32));
                }
            }
            lines.push(line);
        }

        if self.pos != self.bytes.len() {
            return Err(JibikiError::corrupt_cache(format!(
                "{} trailing bytes after the last line",
                self.bytes.len() - self.pos
            )));
        }

        Ok(LineStore::new(kind, Arc::clone(buffer), lines))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bytes.len() - self.pos < n {
            return Err(JibikiError::corrupt_cache("truncated payload"));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::tokenizer::tokenize;

    fn edict_store() -> LineStore {
        let text = "食べる [たべる] /(v1) to eat/EntL1358280X/\n飲む [のむ] /(v5m) to drink/EntL1169870X/\n";
        let mut buffer = SourceBuffer::from_bytes(text.as_bytes().to_vec()).unwrap();
        let summary = tokenize(DictionaryKind::Edict, &mut buffer);
        LineStore::new(DictionaryKind::Edict, Arc::new(buffer), summary.lines)
    }

    #[test]
    fn test_round_trip() {
        let store = edict_store();
        let mut payload = Vec::new();
        serialize(&store, &mut payload);
        assert_eq!(payload.len(), serialized_len(&store));

        let decoded = Decoder::new(&payload)
            .read_line_store(DictionaryKind::Edict, store.buffer())
            .unwrap();
        assert_eq!(decoded.len(), store.len());
        for (a, b) in decoded.lines().iter().zip(store.lines()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_double_decode_is_corrupt() {
        let store = edict_store();
        let mut payload = Vec::new();
        serialize(&store, &mut payload);

        let mut decoder = Decoder::new(&payload);
        decoder
            .read_line_store(DictionaryKind::Edict, store.buffer())
            .unwrap();
        let second = decoder.read_line_store(DictionaryKind::Edict, store.buffer());
        assert!(matches!(second, Err(JibikiError::CorruptCache(_))));
    }

    #[test]
    fn test_truncated_payload_is_corrupt() {
        let store = edict_store();
        let mut payload = Vec::new();
        serialize(&store, &mut payload);
        payload.truncate(payload.len() - 3);

        let result = Decoder::new(&payload).read_line_store(DictionaryKind::Edict, store.buffer());
        assert!(matches!(result, Err(JibikiError::CorruptCache(_))));
    }

    #[test]
    fn test_out_of_bounds_offset_is_corrupt() {
        let store = edict_store();
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u64.to_le_bytes());
        payload.extend_from_slice(&4u32.to_le_bytes());
        payload.extend_from_slice(&(store.buffer().len() as u64 + 10).to_le_bytes());
        payload.extend_from_slice(&OFFSET_TERMINATOR.to_le_bytes());
        for _ in 0..3 {
            payload.extend_from_slice(&OFFSET_TERMINATOR.to_le_bytes());
        }

        let result = Decoder::new(&payload).read_line_store(DictionaryKind::Edict, store.buffer());
        assert!(matches!(result, Err(JibikiError::CorruptCache(_))));
    }

    #[test]
    fn test_split_code_point_offset_is_corrupt() {
        let store = edict_store();
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u64.to_le_bytes());
        payload.extend_from_slice(&4u32.to_le_bytes());
        // 「食」is multibyte; offset 1 lands inside it.
        payload.extend_from_slice(&1u64.to_le_bytes());
        payload.extend_from_slice(&OFFSET_TERMINATOR.to_le_bytes());
        for _ in 0..3 {
            payload.extend_from_slice(&OFFSET_TERMINATOR.to_le_bytes());
        }

        let result = Decoder::new(&payload).read_line_store(DictionaryKind::Edict, store.buffer());
        assert!(matches!(result, Err(JibikiError::CorruptCache(_))));
    }

    #[test]
    fn test_absurd_line_count_is_corrupt() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&u64::MAX.to_le_bytes());
        let buffer = Arc::new(SourceBuffer::from_bytes(b"a\n".to_vec()).unwrap());
        let result = Decoder::new(&payload).read_line_store(DictionaryKind::Edict, &buffer);
        assert!(matches!(result, Err(JibikiError::CorruptCache(_))));
    }
}
