//! バッチスケジューラ
//!
//! 層全体の重み・閾値を、固定容量のストアに収まるサブ呼び出しの列に分割する。
//! すべてのサブ呼び出しは同じバッチサイズ（出力数の約数）を持ち、
//! 先頭のエントリだけが「新バッチ」としてカーソルをリセットする。
//!
//! エントリは必ずスケジュール順に実行すること。重み・閾値のカーソルは
//! 前のエントリの終了位置から引き継がれる。

mod batch;
mod relayout;

pub use batch::{BatchBounds, search_batch_size};
pub use relayout::{conv_weights, conv1_weights, dense_weights, threshold_slice};

use log::debug;

use crate::config::AccelConfig;
use crate::constants::{CONV_W_PER_WORD, CONV1_CHANNELS, CONV1_WIDTH, WORD_SIZE, Word};
use crate::context::LayerContext;
use crate::engine::{Accelerator, Invocation, LayerKind, NormMode, WidthMode};
use crate::error::{AccelError, Result};
use crate::store::{Half, ThresholdSlice, WeightSlice};

/// 1 層の形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSpec {
    pub kind: LayerKind,
    pub n_inputs: usize,
    pub n_outputs: usize,
    /// 入力画像の幅（全結合系では無視）
    pub width: usize,
    /// 出力を 2x2 プーリングするか（畳み込み系のみ）
    pub pool: bool,
}

impl LayerSpec {
    /// 出力画像の幅
    #[inline]
    pub fn width_out(&self) -> usize {
        if self.pool { self.width / 2 } else { self.width }
    }

    /// 層全体のパック済み重みのワード数
    pub fn weight_words(&self) -> usize {
        match self.kind {
            LayerKind::FirstConv => (self.n_outputs * CONV1_CHANNELS).div_ceil(CONV_W_PER_WORD),
            LayerKind::BinConv => (self.n_outputs * self.n_inputs).div_ceil(CONV_W_PER_WORD),
            LayerKind::Dense | LayerKind::Last => self.n_outputs * self.n_inputs / WORD_SIZE,
        }
    }

    /// 層全体のパック済み閾値のワード数
    #[inline]
    pub fn threshold_words(&self) -> usize {
        self.n_outputs.div_ceil(self.kind.thresholds_per_word())
    }

    fn width_mode(&self) -> Result<WidthMode> {
        if self.kind.is_conv() { WidthMode::from_width(self.width) } else { Ok(WidthMode::W8) }
    }

    fn norm_mode(&self) -> NormMode {
        if self.pool { NormMode::ThresholdPool } else { NormMode::Threshold }
    }
}

/// 1 サブ呼び出し分の記述子と、そのとき載せる重み・閾値
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub op: Invocation,
    pub weights: WeightSlice,
    pub thresholds: ThresholdSlice,
}

/// 1 層分のスケジュール
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub layer: LayerSpec,
    pub batch_size: usize,
    pub entries: Vec<ScheduleEntry>,
}

impl Schedule {
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 層の形状と構成からバッチサイズの上限を求める
///
/// 入力側は分割されないので、収まらなければエラー。
pub fn batch_bounds(config: &AccelConfig, layer: &LayerSpec) -> Result<BatchBounds> {
    let lanes = config.lanes;
    let thresholds = config.threshold_words * layer.kind.thresholds_per_word();
    match layer.kind {
        LayerKind::FirstConv | LayerKind::BinConv => {
            let width_mode = WidthMode::from_width(layer.width)?;
            let width_o = layer.width_out();
            let weights = if layer.kind == LayerKind::FirstConv {
                if layer.n_inputs != CONV1_CHANNELS {
                    return Err(AccelError::FirstLayerChannels(layer.n_inputs));
                }
                if width_mode.width() != CONV1_WIDTH {
                    return Err(AccelError::UnsupportedWidth(layer.width));
                }
                if !config.fits_first_layer_input() {
                    return Err(AccelError::InputTooLarge {
                        required: CONV1_WIDTH * CONV1_WIDTH,
                        capacity: config.fmap_words,
                    });
                }
                config.weight_words()
            } else {
                if layer.n_inputs % lanes != 0 {
                    let n_inputs = layer.n_inputs;
                    return Err(AccelError::InputsNotLaneAligned { n_inputs, lanes });
                }
                let capacity = config.fmap_bits() / (layer.width * layer.width);
                if layer.n_inputs > capacity {
                    return Err(AccelError::InputTooLarge { required: layer.n_inputs, capacity });
                }
                config.conv_filters() / layer.n_inputs
            };
            if weights == 0 {
                return Err(AccelError::WeightOverflow {
                    required: layer.n_inputs.div_ceil(CONV_W_PER_WORD),
                    capacity: config.weight_words(),
                });
            }
            Ok(BatchBounds { fmap: config.fmap_bits() / (width_o * width_o), weights, thresholds })
        }
        LayerKind::Dense | LayerKind::Last => {
            if layer.n_inputs % WORD_SIZE != 0 || (layer.n_inputs / WORD_SIZE) % lanes != 0 {
                return Err(AccelError::DenseInputNotAligned { n_inputs: layer.n_inputs, lanes });
            }
            let weight_bits = config.weight_words() * WORD_SIZE;
            if weight_bits < layer.n_inputs {
                return Err(AccelError::WeightOverflow {
                    required: layer.n_inputs / WORD_SIZE,
                    capacity: config.weight_words(),
                });
            }
            if layer.n_inputs > config.fmap_bits() {
                return Err(AccelError::InputTooLarge {
                    required: layer.n_inputs,
                    capacity: config.fmap_bits(),
                });
            }
            Ok(BatchBounds {
                fmap: config.fmap_bits(),
                weights: weight_bits / layer.n_inputs,
                thresholds,
            })
        }
    }
}

/// 層全体の重み・閾値からスケジュールを組み立てる
pub fn compute_schedule(
    config: &AccelConfig,
    layer: &LayerSpec,
    weights: &[Word],
    thresholds: &[Word],
) -> Result<Schedule> {
    if layer.n_inputs == 0 || layer.n_outputs == 0 {
        return Err(AccelError::EmptyLayer { n_inputs: layer.n_inputs, n_outputs: layer.n_outputs });
    }
    if layer.pool && !layer.kind.is_conv() {
        return Err(AccelError::UnsupportedNormMode { kind: layer.kind, mode: layer.norm_mode() });
    }
    if weights.len() != layer.weight_words() {
        return Err(AccelError::LengthMismatch {
            what: "layer weights",
            expected: layer.weight_words(),
            actual: weights.len(),
        });
    }
    if thresholds.len() != layer.threshold_words() {
        return Err(AccelError::LengthMismatch {
            what: "layer thresholds",
            expected: layer.threshold_words(),
            actual: thresholds.len(),
        });
    }

    let width = layer.width_mode()?;
    let bounds = batch_bounds(config, layer)?;
    if layer.n_outputs > bounds.fmap {
        return Err(AccelError::OutputTooLarge { required: layer.n_outputs, capacity: bounds.fmap });
    }
    let batch_size = search_batch_size(layer.n_outputs, &bounds).ok_or(
        AccelError::NoBatchDivisor { n_outputs: layer.n_outputs, bound: bounds.tightest() },
    )?;
    debug!(
        "{:?} {}x{} width={}: bounds (fmap={}, wt={}, kh={}) -> batch {} x {}",
        layer.kind,
        layer.n_inputs,
        layer.n_outputs,
        layer.width,
        bounds.fmap,
        bounds.weights,
        bounds.thresholds,
        batch_size,
        layer.n_outputs / batch_size
    );
    let norm = layer.norm_mode();
    if norm.pools() && width == WidthMode::W8 && batch_size % 4 != 0 {
        return Err(AccelError::PoolingNotQuarterAligned(batch_size));
    }

    let per_word = layer.kind.thresholds_per_word();
    let mut entries = Vec::with_capacity(layer.n_outputs / batch_size);
    for o_start in (0..layer.n_outputs).step_by(batch_size) {
        let slice = match layer.kind {
            LayerKind::FirstConv => conv1_weights(weights, o_start, batch_size),
            LayerKind::BinConv => {
                conv_weights(weights, o_start, layer.n_inputs, batch_size, config.lanes)
            }
            LayerKind::Dense | LayerKind::Last => {
                dense_weights(weights, o_start, layer.n_inputs, batch_size)
            }
        };
        entries.push(ScheduleEntry {
            op: Invocation {
                kind: layer.kind,
                n_inputs: layer.n_inputs,
                n_outputs: batch_size,
                width,
                norm,
                new_batch: o_start == 0,
            },
            weights: slice,
            thresholds: threshold_slice(thresholds, o_start, batch_size, per_word),
        });
    }

    Ok(Schedule { layer: *layer, batch_size, entries })
}

/// スケジュールを順に実行する
///
/// `input` は先頭エントリの前に `half` へ配置し、最後のエントリの後で
/// 反対側の領域から `output_words` ワードを取り出す。
pub fn run_schedule(
    accel: &mut Accelerator,
    schedule: &Schedule,
    input: Option<&[Word]>,
    half: Half,
    output_words: usize,
) -> Result<Vec<Word>> {
    let mut ctx = LayerContext::new();
    let Some(last) = schedule.entries.last() else {
        return Ok(Vec::new());
    };
    for (i, entry) in schedule.entries.iter().enumerate() {
        accel.load_weights(&entry.weights)?;
        accel.load_thresholds(&entry.thresholds)?;
        if i == 0 {
            if let Some(words) = input {
                accel.load_input(half, &entry.op, words)?;
            }
        }
        accel.invoke(&mut ctx, &entry.op, half)?;
    }
    debug!(
        "{:?}: ran {} entries, {} outputs",
        schedule.layer.kind,
        schedule.len(),
        ctx.outputs_done()
    );
    if output_words == 0 {
        return Ok(Vec::new());
    }
    accel.drain_output(half.other(), &last.op, output_words)
}
