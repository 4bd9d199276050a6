//! 統合テスト共通のユーティリティ

#![allow(dead_code)] // テストファイルごとに使う関数が異なる

use bnn_accel::layout::{ScaleBias, with_scale_bias, with_threshold};
use bnn_accel::{
    AccelConfig, Accelerator, Half, LayerKind, LayerSpec, Word, compute_schedule, pack,
    run_schedule,
};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn rng(seed: u64) -> Xoshiro256PlusPlus {
    Xoshiro256PlusPlus::seed_from_u64(seed)
}

pub fn layer(
    kind: LayerKind,
    n_inputs: usize,
    n_outputs: usize,
    width: usize,
    pool: bool,
) -> LayerSpec {
    LayerSpec { kind, n_inputs, n_outputs, width, pool }
}

/// 2 レーン、ストアを小さく絞った構成（ほとんどの層が分割される）
pub fn small_config() -> AccelConfig {
    AccelConfig {
        lanes: 2,
        weight_words_per_lane: 3,
        threshold_words: 4,
        fmap_words: 1024,
        pix_per_phase: 1024,
    }
}

pub fn random_words(rng: &mut Xoshiro256PlusPlus, n: usize) -> Vec<Word> {
    (0..n).map(|_| rng.random()).collect()
}

/// 和が閾値の両側にばらつく程度の閾値幅
fn threshold_spread(layer: &LayerSpec) -> i16 {
    match layer.kind {
        LayerKind::FirstConv => 3 << 12,
        LayerKind::BinConv => (2 * (9 * layer.n_inputs).isqrt()) as i16,
        LayerKind::Dense | LayerKind::Last => (2 * layer.n_inputs.isqrt()) as i16,
    }
}

/// 層全体のパック済み閾値（最終層は scale/bias）
pub fn random_thresholds(rng: &mut Xoshiro256PlusPlus, layer: &LayerSpec) -> Vec<Word> {
    let per_word = layer.kind.thresholds_per_word();
    let mut words = vec![0; layer.threshold_words()];
    for n in 0..layer.n_outputs {
        let w = &mut words[n / per_word];
        *w = if layer.kind == LayerKind::Last {
            let value = ScaleBias {
                scale: rng.random_range(-(1 << 14)..(1 << 14)),
                bias: rng.random_range(-(1 << 12)..(1 << 12)),
            };
            with_scale_bias(*w, n % per_word, value)
        } else {
            let spread = threshold_spread(layer);
            with_threshold(*w, n % per_word, rng.random_range(-spread..=spread))
        };
    }
    words
}

/// 層全体のパック済み重みと閾値
pub fn random_params(rng: &mut Xoshiro256PlusPlus, layer: &LayerSpec) -> (Vec<Word>, Vec<Word>) {
    let weights = random_words(rng, layer.weight_words());
    let thresholds = random_thresholds(rng, layer);
    (weights, thresholds)
}

/// [-1, 1) の一様乱数画像を量子化してパックする
pub fn random_image(rng: &mut Xoshiro256PlusPlus) -> Vec<Word> {
    let pixels: Vec<f32> = (0..3 * 32 * 32).map(|_| rng.random_range(-1.0f32..1.0)).collect();
    pack::pack_input_image(&pixels).unwrap()
}

/// 1 層をスケジュールして実行し、出力を取り出す
pub fn run_layer(
    config: AccelConfig,
    layer: &LayerSpec,
    weights: &[Word],
    thresholds: &[Word],
    input: &[Word],
    output_words: usize,
) -> (Accelerator, Vec<Word>) {
    let schedule = compute_schedule(&config, layer, weights, thresholds).unwrap();
    let mut accel = Accelerator::new(config).unwrap();
    let out = run_schedule(&mut accel, &schedule, Some(input), Half::Ping, output_words).unwrap();
    (accel, out)
}
