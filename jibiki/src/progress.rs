//! 進捗報告とキャンセルのためのハンドル
//!
//! このモジュールは、時間のかかる処理（キャッシュ書き込み、インデックス構築、
//! 線形スキャン検索）と呼び出し側を結ぶポーリング可能なハンドルを提供します。
//! ワーカー側は進捗割合とメッセージを更新しながらチャンク境界でキャンセル要求を
//! 確認し、呼び出し側はいつでも同じハンドルから状態を読み取れます。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// 進捗報告とキャンセルのための共有ハンドル
///
/// クローンは内部状態を共有するため、ワーカーと消費者の両スレッドから
/// 同じインスタンスを安全に操作できます。
///
/// # 例
///
/// ```
/// use jibiki::Progress;
///
/// let progress = Progress::new();
/// let for_worker = progress.clone();
///
/// for_worker.set_fraction(0.5);
/// assert_eq!(progress.fraction(), 0.5);
///
/// progress.cancel();
/// assert!(for_worker.should_abort());
/// ```
#[derive(Clone, Default)]
pub struct Progress {
    inner: Arc<ProgressInner>,
}

#[derive(Default)]
struct ProgressInner {
    // f64 bits stored atomically so readers never observe a torn value.
    fraction_bits: AtomicU64,
    message: Mutex<String>,
    canceled: AtomicBool,
}

impl Progress {
    /// 新しいハンドルを作成します。
    ///
    /// 進捗割合は`0.0`、メッセージは空、キャンセル要求なしの状態で始まります。
    pub fn new() -> Self {
        Self::default()
    }

    /// 現在の進捗割合を取得します。
    ///
    /// # 戻り値
    ///
    /// `0.0`から`1.0`の範囲の進捗割合
    pub fn fraction(&self) -> f64 {
        f64::from_bits(self.inner.fraction_bits.load(Ordering::Relaxed))
    }

    /// 進捗割合を更新します。
    ///
    /// # 引数
    ///
    /// * `fraction` - 新しい進捗割合。`0.0`から`1.0`の範囲にクランプされます。
    pub fn set_fraction(&self, fraction: f64) {
        let clamped = fraction.clamp(0.0, 1.0);
        self.inner
            .fraction_bits
            .store(clamped.to_bits(), Ordering::Relaxed);
    }

    /// 現在の主要メッセージを取得します。
    ///
    /// # 戻り値
    ///
    /// 処理中の内容を示す文字列
    pub fn primary_message(&self) -> String {
        self.inner.message.lock().unwrap().clone()
    }

    /// 主要メッセージを更新します。
    ///
    /// # 引数
    ///
    /// * `message` - 新しいメッセージ
    pub fn set_primary_message<S>(&self, message: S)
    where
        S: Into<String>,
    {
        *self.inner.message.lock().unwrap() = message.into();
    }

    /// 実行中の処理にキャンセルを要求します。
    ///
    /// キャンセルは協調的です。ワーカーは次のチャンク境界で
    /// [`should_abort`](Self::should_abort)を確認して停止します。
    pub fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::Relaxed);
    }

    /// キャンセルが要求されているかどうかを確認します。
    ///
    /// # 戻り値
    ///
    /// キャンセルが要求されている場合は`true`
    #[inline(always)]
    pub fn should_abort(&self) -> bool {
        self.inner.canceled.load(Ordering::Relaxed)
    }
}
