//! 辞書ソーステキストの所有バッファ
//!
//! このモジュールは、読み込み済み辞書ファイル1つ分のデコード済みテキストを
//! 所有する[`SourceBuffer`]を提供します。他のすべてのコンポーネント
//! （行ストア、インデックス、検索）はこのバッファの部分範囲を参照します。
//!
//! トークン化はバッファを直接書き換えます。区切りバイトはその場でNUL終端に
//! 置き換えられるため、トークン化後のバッファはNUL区切りのUTF-8トークン列に
//! なります。トークン化前のバイト列を期待する呼び出しは成立しません。

use std::io::Read;

use sha2::{Digest, Sha256};

use crate::errors::{JibikiError, Result};

/// トークンの区切りに使用される終端バイト
pub(crate) const TERMINATOR: u8 = 0;

/// 読み込み済み辞書ファイル1つ分の不変テキストバッファ
///
/// チェックサムは読み込み時点の（トークン化前の）内容に対するSHA-256で、
/// このバッファから派生したすべてのキャッシュを識別します。
/// トークン化が完了した後のバッファは不変であり、`Arc`を通じて
/// 行ストア・インデックス・並行検索の間で安全に共有されます。
pub struct SourceBuffer {
    bytes: Vec<u8>,
    checksum: String,
}

impl SourceBuffer {
    /// リーダーからバッファを作成します。
    ///
    /// 内容全体を読み込み、UTF-8であることを検証し、チェックサムを計算します。
    ///
    /// # 引数
    ///
    /// * `rdr` - デコード済み辞書テキストのリーダー
    ///
    /// # エラー
    ///
    /// 読み込みに失敗した場合、または内容がUTF-8でない場合にエラーを返します。
    pub fn from_reader<R>(mut rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let mut bytes = Vec::new();
        rdr.read_to_end(&mut bytes)?;
        Self::from_bytes(bytes)
    }

    /// バイト列からバッファを作成します。
    ///
    /// # 引数
    ///
    /// * `bytes` - デコード済み辞書テキスト
    ///
    /// # エラー
    ///
    /// 内容がUTF-8でない場合にエラーを返します。
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        std::str::from_utf8(&bytes)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let checksum = hex::encode(hasher.finalize());
        Ok(Self { bytes, checksum })
    }

    /// トークン化済みのキャッシュ内容からバッファを復元します。
    ///
    /// チェックサムはキャッシュヘッダに保存されていたソースのチェックサムを
    /// そのまま引き継ぎます。内容は呼び出し側で検証済みであることを前提とします。
    ///
    /// # 引数
    ///
    /// * `bytes` - NUL区切りトークン化済みのテキスト
    /// * `checksum` - ソースファイルのチェックサム
    pub(crate) fn from_tokenized(bytes: Vec<u8>, checksum: String) -> Self {
        Self { bytes, checksum }
    }

    /// ソース内容のSHA-256チェックサム（16進小文字）を取得します。
    #[inline(always)]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// バッファ内容への参照を取得します。
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// バッファ長をバイト単位で取得します。
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// バッファが空かどうかを確認します。
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// トークン化のためにバッファ内容を可変で取得します。
    ///
    /// 初回パース時のみ使用されます。
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// 指定されたバイトオフセットから次のNUL終端までのトークンを取得します。
    ///
    /// # 引数
    ///
    /// * `offset` - トークン先頭のバイトオフセット
    ///
    /// # 戻り値
    ///
    /// オフセットが範囲内でトークンが有効なUTF-8の場合は`Ok(トークン)`
    ///
    /// # エラー
    ///
    /// オフセットが範囲外の場合、またはトークンがUTF-8の文字境界を
    /// 分断している場合に[`JibikiError::CorruptCache`]を返します。
    pub(crate) fn token_at(&self, offset: u64) -> Result<&str> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|&s| s < self.bytes.len())
            .ok_or_else(|| {
                JibikiError::corrupt_cache(format!(
                    "token offset {} out of bounds for buffer of {} bytes",
                    offset,
                    self.bytes.len()
                ))
            })?;
        let rest = &self.bytes[start..];
        let end = rest
            .iter()
            .position(|&b| b == TERMINATOR)
            .unwrap_or(rest.len());
        std::str::from_utf8(&rest[..end]).map_err(|e| {
            JibikiError::corrupt_cache(format!(
                "token at offset {offset} splits a UTF-8 code point: {e}"
            ))
        })
    }
}
