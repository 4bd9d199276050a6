//! 層コンテキスト
//!
//! 1 層分のサブ呼び出し列にまたがって持ち越される状態。
//! スケジュール先頭エントリの「新バッチ」フラグでのみリセットされ、
//! それ以外のエントリでは前のエントリの終了時の値をそのまま引き継ぐ。

use crate::constants::Word;

/// 最終層の暫定最大スコア
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestScore {
    /// 小数部 14bit の固定小数点スコア
    pub score: i64,
    pub index: usize,
}

/// 層スコープのカーソルと持ち越し状態
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerContext {
    /// 次に書く出力チャネル（全結合では出力ビット）の層内番号
    pub(crate) output_cursor: usize,
    /// 次に読む閾値の層内番号
    pub(crate) threshold_cursor: usize,
    /// 次に読む重み要素の層内番号（単位は層の種類による）
    pub(crate) weight_cursor: usize,
    /// 幅 8 のプーリング出力で 1/4 ワードずつ溜める作業ワード
    pub(crate) pool_word: Word,
    /// 最終層の arg-max
    pub(crate) best: Option<BestScore>,
}

impl LayerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新しい層の開始
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// これまでに出力したチャネル数
    #[inline]
    pub fn outputs_done(&self) -> usize {
        self.output_cursor
    }

    #[inline]
    pub fn weight_cursor(&self) -> usize {
        self.weight_cursor
    }

    #[inline]
    pub fn threshold_cursor(&self) -> usize {
        self.threshold_cursor
    }

    /// 最終層の暫定予測
    #[inline]
    pub fn best(&self) -> Option<BestScore> {
        self.best
    }

    /// スコアを arg-max に加える。同点は先に見たチャネルを残す。
    pub(crate) fn offer(&mut self, score: i64, index: usize) {
        match self.best {
            Some(best) if score <= best.score => {}
            _ => self.best = Some(BestScore { score, index }),
        }
    }
}
