//! ストリーミング推論エンジン
//!
//! 1 回の呼び出し（サブ呼び出し）は、ロード済みの重み・閾値ストアと
//! 特徴マップのダブルバッファに対して 1 バッチ分の出力チャネルを計算する。
//!
//! ```text
//! 入力領域 ──▶ bin_conv / fp_conv / dense ──▶ norm（閾値・プーリング）──▶ 出力領域
//!                 ▲            ▲
//!            WeightStore  ThresholdStore      LayerContext（カーソル持ち越し）
//! ```
//!
//! 前提条件はすべてストアに触れる前に検証する。失敗した呼び出しは何も書かない。

mod bin_conv;
mod dense;
mod fp_conv;
pub mod norm;

pub use dense::{last_score, word_score};

use log::trace;

use crate::config::AccelConfig;
use crate::constants::{LOG_BANK_WIDTH, Word};
use crate::context::LayerContext;
use crate::error::{AccelError, Result};
use crate::store::{
    FeatureMapStore, FmapLayout, Half, ThresholdSlice, ThresholdStore, WeightSlice, WeightStore,
};

/// 層の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    /// 実数値入力の第1層畳み込み
    FirstConv,
    /// 二値畳み込み
    BinConv,
    /// 二値全結合
    Dense,
    /// 最終分類層
    Last,
}

impl LayerKind {
    #[inline]
    pub const fn is_conv(self) -> bool {
        matches!(self, LayerKind::FirstConv | LayerKind::BinConv)
    }

    /// 閾値ストア 1 ワードあたりの出力チャネル数
    #[inline]
    pub const fn thresholds_per_word(self) -> usize {
        match self {
            LayerKind::Last => crate::constants::LAST_KH_PER_WORD,
            _ => crate::constants::KH_PER_WORD,
        }
    }
}

/// 画像幅の符号化（0 = 8px, 1 = 16px, 2 = 32px）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidthMode {
    W8,
    W16,
    W32,
}

impl WidthMode {
    pub fn from_width(width: usize) -> Result<Self> {
        match width {
            8 => Ok(WidthMode::W8),
            16 => Ok(WidthMode::W16),
            32 => Ok(WidthMode::W32),
            _ => Err(AccelError::UnsupportedWidth(width)),
        }
    }

    #[inline]
    pub const fn mode(self) -> usize {
        match self {
            WidthMode::W8 => 0,
            WidthMode::W16 => 1,
            WidthMode::W32 => 2,
        }
    }

    #[inline]
    pub const fn log_width(self) -> usize {
        self.mode() + LOG_BANK_WIDTH
    }

    #[inline]
    pub const fn width(self) -> usize {
        1 << self.log_width()
    }

    /// 1 画像のワード数
    #[inline]
    pub const fn words_per_image(self) -> usize {
        1 << (2 * self.mode())
    }

    /// 1 行のバンク数
    #[inline]
    pub const fn slices_per_line(self) -> usize {
        self.width() / crate::constants::BANK_WIDTH
    }
}

/// 正規化モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormMode {
    /// 何もしない（全結合系のみ。全結合は常に閾値／スコアで出力する）
    None,
    /// 閾値で二値化
    Threshold,
    /// 閾値で二値化した後 2x2 AND プーリング
    ThresholdPool,
}

impl NormMode {
    #[inline]
    pub const fn pools(self) -> bool {
        matches!(self, NormMode::ThresholdPool)
    }
}

/// 1 サブ呼び出しの記述子
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    pub kind: LayerKind,
    pub n_inputs: usize,
    /// このサブ呼び出しで計算する出力チャネル数
    pub n_outputs: usize,
    /// 全結合系では使わない
    pub width: WidthMode,
    pub norm: NormMode,
    /// 層の最初のサブ呼び出し（カーソルをリセットする）
    pub new_batch: bool,
}

impl Invocation {
    /// 入力領域への外部ワード列の配置
    pub fn input_layout(&self) -> FmapLayout {
        match self.kind {
            LayerKind::BinConv => {
                FmapLayout::Images { words_per_image: self.width.words_per_image() }
            }
            LayerKind::FirstConv => FmapLayout::Linear,
            LayerKind::Dense | LayerKind::Last => FmapLayout::Interleaved,
        }
    }

    /// 出力領域からの外部ワード列の取り出し方
    pub fn output_layout(&self) -> FmapLayout {
        let pooled_w8 = self.norm.pools() && self.width == WidthMode::W8;
        if self.kind.is_conv() && !pooled_w8 {
            let div = if self.norm.pools() { 4 } else { 1 };
            FmapLayout::Images { words_per_image: self.width.words_per_image() / div }
        } else {
            FmapLayout::Interleaved
        }
    }
}

/// エンジン本体: 3 つのオンチップストアを所有する
#[derive(Debug, Clone)]
pub struct Accelerator {
    config: AccelConfig,
    fmap: FeatureMapStore,
    weights: WeightStore,
    thresholds: ThresholdStore,
}

impl Accelerator {
    pub fn new(config: AccelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            fmap: FeatureMapStore::new(&config),
            weights: WeightStore::new(&config),
            thresholds: ThresholdStore::new(&config),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &AccelConfig {
        &self.config
    }

    #[inline]
    pub fn fmap(&self) -> &FeatureMapStore {
        &self.fmap
    }

    pub fn load_weights(&mut self, slice: &WeightSlice) -> Result<()> {
        self.weights.load(slice)
    }

    pub fn load_thresholds(&mut self, slice: &ThresholdSlice) -> Result<()> {
        self.thresholds.load(slice)
    }

    /// 外部入力を `half` に配置する
    pub fn load_input(&mut self, half: Half, op: &Invocation, words: &[Word]) -> Result<()> {
        self.fmap.load(half, op.input_layout(), words)
    }

    /// `half` から出力を取り出す
    pub fn drain_output(&self, half: Half, op: &Invocation, n_words: usize) -> Result<Vec<Word>> {
        self.fmap.drain(half, op.output_layout(), n_words)
    }

    /// 最終層の予測値（出力領域のレーン 0 先頭ワードの下位 8bit）
    pub fn prediction(&self, half: Half) -> i8 {
        self.fmap.word(half, 0, 0) as u8 as i8
    }

    /// 1 サブ呼び出しを実行する
    ///
    /// `input` が入力領域、その反対側が出力領域になる。
    pub fn invoke(&mut self, ctx: &mut LayerContext, op: &Invocation, input: Half) -> Result<()> {
        if op.new_batch {
            ctx.reset();
        }
        if op.n_inputs == 0 || op.n_outputs == 0 {
            return Err(AccelError::EmptyLayer { n_inputs: op.n_inputs, n_outputs: op.n_outputs });
        }
        trace!(
            "invoke {:?}: in={} out={} width={} norm={:?} new_batch={} cursors(o={}, kh={}, wt={})",
            op.kind,
            op.n_inputs,
            op.n_outputs,
            op.width.width(),
            op.norm,
            op.new_batch,
            ctx.output_cursor,
            ctx.threshold_cursor,
            ctx.weight_cursor
        );

        let stores = Stores {
            config: &self.config,
            weights: &self.weights,
            thresholds: &self.thresholds,
        };
        let io = FmapIo { fmap: &mut self.fmap, input, output: input.other() };
        match op.kind {
            LayerKind::BinConv => bin_conv::run(&stores, io, ctx, op),
            LayerKind::FirstConv => fp_conv::run(&stores, io, ctx, op),
            LayerKind::Dense | LayerKind::Last => dense::run(&stores, io, ctx, op),
        }
    }
}

/// 読み出し専用のストア群
pub(crate) struct Stores<'a> {
    pub config: &'a AccelConfig,
    pub weights: &'a WeightStore,
    pub thresholds: &'a ThresholdStore,
}

impl Stores<'_> {
    /// カーソル位置から `count` 個の閾値が載っているか
    pub fn check_thresholds(&self, cursor: usize, count: usize, per_word: usize) -> Result<usize> {
        let start = self.thresholds.local_index(cursor)?;
        let required = (start + count).div_ceil(per_word);
        if required > self.thresholds.capacity() {
            return Err(AccelError::ThresholdOverflow {
                required,
                capacity: self.thresholds.capacity(),
            });
        }
        Ok(start)
    }

    /// カーソル位置から 1 レーンあたり `per_lane_words` ワードが載っているか
    pub fn check_weight_words(&self, per_lane_words: usize) -> Result<()> {
        let capacity = self.weights.words_per_lane();
        if per_lane_words > capacity {
            return Err(AccelError::WeightOverflow { required: per_lane_words, capacity });
        }
        Ok(())
    }
}

/// 入出力領域の組
pub(crate) struct FmapIo<'a> {
    pub fmap: &'a mut FeatureMapStore,
    pub input: Half,
    pub output: Half,
}

impl FmapIo<'_> {
    /// 出力の最大オフセットがレーンに収まるか
    pub fn check_output(&self, last_offset: usize) -> Result<()> {
        let capacity = self.fmap.words_per_lane();
        if last_offset >= capacity {
            return Err(AccelError::OutputTooLarge { required: last_offset + 1, capacity });
        }
        Ok(())
    }

    /// 入力がレーンに収まるか
    pub fn check_input(&self, words_per_lane: usize) -> Result<()> {
        let capacity = self.fmap.words_per_lane();
        if words_per_lane > capacity {
            return Err(AccelError::InputTooLarge { required: words_per_lane, capacity });
        }
        Ok(())
    }
}
