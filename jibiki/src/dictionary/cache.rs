//! チェックサム付きキャッシュファイル
//!
//! このモジュールは、チェックサムで封印されたメモリマップ永続化層を提供します。
//! ファイルレイアウトは次のとおりです:
//!
//! ```text
//! [ASCII checksum] [NUL] [0xFFパディング(16バイト境界まで)] [ペイロード]
//! ```
//!
//! 書き込みは同一ディレクトリ内の一時ファイルを経由し、完成後に
//! アトミックに公開されます。書き込み中は0644、公開後は0444に変更され、
//! 公開済みキャッシュの偶発的な書き換えを防ぎます。
//!
//! 読み込みはファイルを読み取り専用でメモリマップし、先頭のチェックサムを
//! 照合します。検証に失敗した場合はマッピングを破棄して`None`を返し、
//! 呼び出し側はソースから再構築します。

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::errors::{JibikiError, Result};
use crate::progress::Progress;

/// ヘッダとrkyvペイロードの整列境界
pub(crate) const HEADER_ALIGNMENT: usize = 16;

/// 書き込み時のチャンクサイズ
const WRITE_CHUNK: usize = 64 * 1024;

/// ペイロードの内容検証モード
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum CacheContents {
    /// ペイロードはUTF-8テキストでなければならない
    Utf8Text,
    /// ペイロードはバイナリで、検証は専用のデコーダが行う
    Binary,
}

/// チェックサムで封印された1つのキャッシュファイル
///
/// ライフサイクルは `Empty → Writing → Frozen(valid) | 破棄` です。
/// 書き込み済みまたは読み込み済みの状態ではペイロードへの借用参照を
/// 提供し、ハンドルのドロップでマッピングは確定的に解放されます。
pub struct CacheFile {
    path: PathBuf,
    map: Option<Mmap>,
    payload_start: usize,
}

impl CacheFile {
    /// 指定されたパスに対する空のハンドルを作成します。
    ///
    /// ファイル自体はまだ作成も検証もされません。
    pub fn new<P>(path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        Self {
            path: path.into(),
            map: None,
            payload_start: 0,
        }
    }

    /// キャッシュファイルのパスを取得します。
    #[inline(always)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// チェックサムとペイロードを書き込み、読み取り専用で公開します。
    ///
    /// 書き込みは同一ディレクトリの一時ファイルに対して行われ、
    /// 成功した場合のみ最終パスへアトミックに移動されます。
    /// 完了後、このハンドルは公開済みファイルをマップした状態になります。
    ///
    /// # 引数
    ///
    /// * `checksum` - ソースファイルのチェックサム（ASCII）
    /// * `payload` - キャッシュするペイロード
    /// * `progress` - 進捗報告とキャンセルのためのハンドル
    ///
    /// # 戻り値
    ///
    /// 書き込まれた総バイト数
    ///
    /// # エラー
    ///
    /// I/Oエラー、永続化の失敗、または書き込み中のキャンセル
    /// ([`JibikiError::Aborted`])でエラーを返します。
    pub fn write(&mut self, checksum: &str, payload: &[u8], progress: &Progress) -> Result<u64> {
        self.clear();

        let dir = self.path.parent().ok_or_else(|| {
            JibikiError::invalid_argument("path", "A cache path must have a parent directory.")
        })?;
        fs::create_dir_all(dir).map_err(|e| JibikiError::io_at(dir, e))?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        set_writable_permissions(temp.as_file())?;

        let header = header_bytes(checksum);
        temp.write_all(&header)?;

        let total = header.len() + payload.len();
        let mut written = header.len();
        for chunk in payload.chunks(WRITE_CHUNK) {
            if progress.should_abort() {
                return Err(JibikiError::Aborted);
            }
            temp.write_all(chunk)?;
            written += chunk.len();
            progress.set_fraction(written as f64 / total as f64);
        }
        temp.as_file().sync_all()?;

        // Publishing over a previously frozen (0444) cache requires the old
        // file to be replaceable; rename does not follow its permissions.
        temp.persist(&self.path)?;
        let file = File::open(&self.path).map_err(|e| JibikiError::io_at(&self.path, e))?;
        set_frozen_permissions(&file)?;

        let map = unsafe { Mmap::map(&file) }.map_err(|e| JibikiError::io_at(&self.path, e))?;
        self.payload_start = header.len();
        self.map = Some(map);
        progress.set_fraction(1.0);

        Ok(total as u64)
    }

    /// キャッシュを読み込み、検証します。
    ///
    /// ファイルを読み取り専用でマップし、先頭のチェックサムが
    /// `expected_checksum`に一致すること、およびペイロードが`contents`の
    /// モードに従って妥当であることを確認します。いずれかの検証に失敗した
    /// 場合はマッピングを破棄して`None`を返します。ファイルは変更されません。
    ///
    /// # 引数
    ///
    /// * `expected_checksum` - ソースファイルのチェックサム
    /// * `contents` - ペイロードの内容検証モード
    /// * `progress` - 進捗報告のためのハンドル
    ///
    /// # 戻り値
    ///
    /// 検証に成功した場合はペイロードへの借用参照
    pub fn read(
        &mut self,
        expected_checksum: &str,
        contents: CacheContents,
        progress: &Progress,
    ) -> Option<&[u8]> {
        self.clear();

        let meta = fs::metadata(&self.path).ok()?;
        if !meta.is_file() {
            log::warn!(
                "Cache path {} is not a regular file; ignoring it.",
                self.path.display()
            );
            return None;
        }

        let file = File::open(&self.path).ok()?;
        let map = unsafe { Mmap::map(&file) }.ok()?;

        let payload_start = match validate_header(&map, expected_checksum) {
            Some(start) => start,
            None => {
                log::warn!(
                    "Cache file {} failed checksum validation; it will be rebuilt.",
                    self.path.display()
                );
                return None;
            }
        };

        if contents == CacheContents::Utf8Text
            && std::str::from_utf8(&map[payload_start..]).is_err()
        {
            log::warn!(
                "Cache file {} contains invalid UTF-8; it will be rebuilt.",
                self.path.display()
            );
            return None;
        }

        self.payload_start = payload_start;
        self.map = Some(map);
        progress.set_fraction(1.0);
        self.payload()
    }

    /// 検証済みペイロードへの参照を取得します。
    ///
    /// # 戻り値
    ///
    /// このハンドルが有効なキャッシュをマップしている場合はペイロード
    pub fn payload(&self) -> Option<&[u8]> {
        self.map.as_ref().map(|map| &map[self.payload_start..])
    }

    /// マッピングを破棄して空の状態に戻します。
    pub fn clear(&mut self) {
        self.map = None;
        self.payload_start = 0;
    }
}

/// チェックサムヘッダのバイト列を構築します。
///
/// `checksum + NUL`を0xFFで[`HEADER_ALIGNMENT`]の倍数まで詰めます。
/// ページ整列されたマッピングの先頭からこの長さだけ進んだペイロードは
/// rkyvのゼロコピーアクセスに必要な整列を満たします。
fn header_bytes(checksum: &str) -> Vec<u8> {
    let mut header = Vec::with_capacity(checksum.len() + 1 + HEADER_ALIGNMENT);
    header.extend_from_slice(checksum.as_bytes());
    header.push(0);
    while header.len() % HEADER_ALIGNMENT != 0 {
        header.push(0xFF);
    }
    header
}

/// マップ済みキャッシュのヘッダを検証し、ペイロードの開始位置を返します。
pub(crate) fn validate_header(bytes: &[u8], expected_checksum: &str) -> Option<usize> {
    let nul = bytes.iter().take(256).position(|&b| b == 0)?;
    if &bytes[..nul] != expected_checksum.as_bytes() {
        return None;
    }
    let mut start = nul + 1;
    while start % HEADER_ALIGNMENT != 0 {
        if bytes.get(start) != Some(&0xFF) {
            return None;
        }
        start += 1;
    }
    if start > bytes.len() {
        return None;
    }
    Some(start)
}

#[cfg(unix)]
fn set_writable_permissions(file: &File) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_writable_permissions(_file: &File) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_frozen_permissions(file: &File) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o444))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_frozen_permissions(file: &File) -> Result<()> {
    let mut permissions = file.metadata()?.permissions();
    permissions.set_readonly(true);
    file.set_permissions(permissions)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKSUM: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CacheFile::new(dir.path().join("lines.cache"));
        let progress = Progress::new();

        let written = cache.write(CHECKSUM, b"payload bytes", &progress).unwrap();
        assert!(written > b"payload bytes".len() as u64);

        let mut reader = CacheFile::new(dir.path().join("lines.cache"));
        let payload = reader
            .read(CHECKSUM, CacheContents::Binary, &progress)
            .unwrap();
        assert_eq!(payload, b"payload bytes");
    }

    #[test]
    fn test_wrong_checksum_returns_none_and_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.cache");
        let progress = Progress::new();

        CacheFile::new(&path)
            .write(CHECKSUM, b"payload", &progress)
            .unwrap();
        let before = fs::read(&path).unwrap();

        let mut reader = CacheFile::new(&path);
        assert!(reader
            .read("ffff", CacheContents::Binary, &progress)
            .is_none());
        assert!(reader.payload().is_none());

        let after = fs::read(&path).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_utf8_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("text.cache");
        let progress = Progress::new();

        CacheFile::new(&path)
            .write(CHECKSUM, &[0xff, 0xfe, 0xfd], &progress)
            .unwrap();

        let mut reader = CacheFile::new(&path);
        assert!(reader
            .read(CHECKSUM, CacheContents::Utf8Text, &progress)
            .is_none());
        assert!(reader
            .read(CHECKSUM, CacheContents::Binary, &progress)
            .is_some());
    }

    #[test]
    fn test_nul_separated_text_passes_utf8_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("text.cache");
        let progress = Progress::new();

        CacheFile::new(&path)
            .write(CHECKSUM, "亜\0一\0口\0".as_bytes(), &progress)
            .unwrap();

        let mut reader = CacheFile::new(&path);
        assert!(reader
            .read(CHECKSUM, CacheContents::Utf8Text, &progress)
            .is_some());
    }

    #[test]
    fn test_frozen_cache_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.cache");
        let progress = Progress::new();

        CacheFile::new(&path)
            .write(CHECKSUM, b"payload", &progress)
            .unwrap();
        assert!(fs::metadata(&path).unwrap().permissions().readonly());
    }

    #[test]
    fn test_rewrite_over_frozen_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.cache");
        let progress = Progress::new();

        CacheFile::new(&path)
            .write(CHECKSUM, b"first", &progress)
            .unwrap();
        CacheFile::new(&path)
            .write(CHECKSUM, b"second", &progress)
            .unwrap();

        let mut reader = CacheFile::new(&path);
        assert_eq!(
            reader
                .read(CHECKSUM, CacheContents::Binary, &progress)
                .unwrap(),
            b"second"
        );
    }

    #[test]
    fn test_canceled_write_fails_with_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let progress = Progress::new();
        progress.cancel();

        let result =
            CacheFile::new(dir.path().join("lines.cache")).write(CHECKSUM, b"payload", &progress);
        assert!(matches!(result, Err(JibikiError::Aborted)));
    }

    #[test]
    fn test_directory_path_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let progress = Progress::new();
        let mut reader = CacheFile::new(dir.path());
        assert!(reader
            .read(CHECKSUM, CacheContents::Binary, &progress)
            .is_none());
    }
}
