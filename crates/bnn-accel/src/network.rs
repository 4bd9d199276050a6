//! 9 層固定トポロジの推論
//!
//! | 層 | 種類 | 幅 | 入力 | 出力 | プーリング |
//! |---|---|---|---|---|---|
//! | 1 | 第1層畳み込み | 32 | 3 | 128 | |
//! | 2 | 二値畳み込み | 32 | 128 | 128 | ✓ |
//! | 3 | 二値畳み込み | 16 | 128 | 256 | |
//! | 4 | 二値畳み込み | 16 | 256 | 256 | ✓ |
//! | 5 | 二値畳み込み | 8 | 256 | 512 | |
//! | 6 | 二値畳み込み | 8 | 512 | 512 | ✓ |
//! | 7 | 全結合 | 4 | 8192 | 1024 | |
//! | 8 | 全結合 | 1 | 1024 | 1024 | |
//! | 9 | 分類 | 1 | 1024 | 10 | |
//!
//! 層 n の入力領域は `n mod 2` で選び、出力は反対側に書く。
//! 次の層はその出力領域をそのまま入力として読む。

use anyhow::{Context, ensure};
use log::info;

use crate::config::AccelConfig;
use crate::constants::Word;
use crate::engine::{Accelerator, LayerKind};
use crate::pack;
use crate::schedule::{LayerSpec, Schedule, compute_schedule, run_schedule};
use crate::store::Half;

const fn spec(
    kind: LayerKind,
    width: usize,
    n_inputs: usize,
    n_outputs: usize,
    pool: bool,
) -> LayerSpec {
    LayerSpec { kind, n_inputs, n_outputs, width, pool }
}

/// 層の数
pub const N_LAYERS: usize = 9;

/// 層の形状表
pub const LAYERS: [LayerSpec; N_LAYERS] = [
    spec(LayerKind::FirstConv, 32, 3, 128, false),
    spec(LayerKind::BinConv, 32, 128, 128, true),
    spec(LayerKind::BinConv, 16, 128, 256, false),
    spec(LayerKind::BinConv, 16, 256, 256, true),
    spec(LayerKind::BinConv, 8, 256, 512, false),
    spec(LayerKind::BinConv, 8, 512, 512, true),
    spec(LayerKind::Dense, 4, 8192, 1024, false),
    spec(LayerKind::Dense, 1, 1024, 1024, false),
    spec(LayerKind::Last, 1, 1024, 10, false),
];

/// 1 層分のパック済みパラメータ
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerParams {
    pub weights: Vec<Word>,
    pub thresholds: Vec<Word>,
}

impl LayerParams {
    /// 学習済みの実数パラメータをパックする
    ///
    /// 畳み込みの重みは `[出力][入力][3x3]`、全結合の重みは `[入力][出力]` の順。
    pub fn pack(
        layer: &LayerSpec,
        weights: &[f32],
        scales: &[f32],
        biases: &[f32],
    ) -> crate::error::Result<Self> {
        let weights = match layer.kind {
            LayerKind::FirstConv | LayerKind::BinConv => pack::pack_conv_weights(weights)?,
            LayerKind::Dense | LayerKind::Last => {
                pack::pack_dense_weights(weights, layer.n_inputs, layer.n_outputs)?
            }
        };
        let thresholds = match layer.kind {
            LayerKind::FirstConv => pack::pack_conv1_thresholds(scales, biases)?,
            LayerKind::BinConv | LayerKind::Dense => pack::pack_thresholds(scales, biases)?,
            LayerKind::Last => pack::pack_last_params(scales, biases)?,
        };
        Ok(Self { weights, thresholds })
    }
}

/// 層ごとのスケジュールを持つ推論器
#[derive(Debug, Clone)]
pub struct Network {
    accel: Accelerator,
    schedules: Vec<Schedule>,
}

impl Network {
    /// 全層のスケジュールを組み立てる
    pub fn new(config: AccelConfig, params: &[LayerParams]) -> anyhow::Result<Self> {
        ensure!(
            params.len() == N_LAYERS,
            "expected parameters for {} layers, got {}",
            N_LAYERS,
            params.len()
        );
        let accel = Accelerator::new(config).context("invalid accelerator configuration")?;
        let schedules = LAYERS
            .iter()
            .zip(params)
            .enumerate()
            .map(|(i, (layer, p))| {
                compute_schedule(&config, layer, &p.weights, &p.thresholds)
                    .with_context(|| format!("failed to schedule layer {}", i + 1))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { accel, schedules })
    }

    #[inline]
    pub fn schedules(&self) -> &[Schedule] {
        &self.schedules
    }

    #[inline]
    pub fn accelerator(&self) -> &Accelerator {
        &self.accel
    }

    /// パック済み画像（1 ピクセル 1 ワード）を分類する
    pub fn predict(&mut self, image: &[Word]) -> anyhow::Result<i8> {
        let mut output = Half::Ping;
        for (i, schedule) in self.schedules.iter().enumerate() {
            let layer = i + 1;
            let input = Half::from_mode(layer);
            let words = (i == 0).then_some(image);
            info!(
                "layer {}: {:?} {} -> {} x{} in {} entries",
                layer,
                schedule.layer.kind,
                schedule.layer.n_inputs,
                schedule.layer.n_outputs,
                schedule.layer.width,
                schedule.len()
            );
            run_schedule(&mut self.accel, schedule, words, input, 0)
                .with_context(|| format!("layer {layer} failed"))?;
            output = input.other();
        }
        Ok(self.accel.prediction(output))
    }

    /// 実数の 3×32×32 画像を量子化して分類する
    pub fn predict_image(&mut self, pixels: &[f32]) -> anyhow::Result<i8> {
        let image = pack::pack_input_image(pixels).context("failed to pack input image")?;
        self.predict(&image)
    }
}
