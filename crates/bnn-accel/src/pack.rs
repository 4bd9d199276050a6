//! 学習済み実数パラメータのパック
//!
//! 浮動小数点の重み・正規化パラメータ・入力画像を、エンジンが読む
//! ワード形式に変換する。
//!
//! - 重み: 値 ≥ 0 → ビット 0（+1）、値 < 0 → ビット 1（-1）
//! - 閾値: `-(bias / scale)`。scale が 0 のときは ∓32767
//! - 固定小数点への変換はすべて飽和する

use crate::constants::{
    BIAS_FRAC, C1_COMP_FRAC, C1_INPUT_BITS, C1_INPUT_FRAC, CONV_W_PER_WORD, CONV1_CHANNELS,
    CONV1_WIDTH, KH_PER_WORD, LAST_KH_PER_WORD, SCALE_FRAC, THRESH_SATURATION, WORD_SIZE, WT_SIZE,
    Word,
};
use crate::error::{AccelError, Result};
use crate::layout::{self, Filter, ScaleBias};
use crate::word::set_bit;

#[inline]
fn weight_bit(value: f32) -> bool {
    value < 0.0
}

/// 符号をビット列に詰める（要素 i → 大域ビット i）
pub fn pack_bits(values: &[f32]) -> Vec<Word> {
    let mut words = vec![0; values.len().div_ceil(WORD_SIZE)];
    for (i, &v) in values.iter().enumerate() {
        set_bit(&mut words, i, weight_bit(v));
    }
    words
}

/// 3x3 フィルタ列を 1 ワード 7 個に詰める
///
/// `wts[m*9 + i]` がフィルタ m のビット i になる。
pub fn pack_conv_weights(wts: &[f32]) -> Result<Vec<Word>> {
    if wts.len() % WT_SIZE != 0 {
        return Err(AccelError::LengthMismatch {
            what: "conv weights",
            expected: wts.len().next_multiple_of(WT_SIZE),
            actual: wts.len(),
        });
    }
    let n_filters = wts.len() / WT_SIZE;
    let mut words = vec![0; n_filters.div_ceil(CONV_W_PER_WORD)];
    for (m, taps) in wts.chunks_exact(WT_SIZE).enumerate() {
        let bits = taps
            .iter()
            .enumerate()
            .fold(0u16, |acc, (i, &v)| acc | ((weight_bit(v) as u16) << i));
        let w = &mut words[m / CONV_W_PER_WORD];
        *w = layout::with_conv_filter(*w, m % CONV_W_PER_WORD, Filter::from_bits(bits));
    }
    Ok(words)
}

/// 全結合の重み行列（入力優先 `wts[m*N + n]`）を出力ごとの行に詰める
pub fn pack_dense_weights(wts: &[f32], n_inputs: usize, n_outputs: usize) -> Result<Vec<Word>> {
    if n_inputs % WORD_SIZE != 0 {
        return Err(AccelError::DenseInputNotAligned { n_inputs, lanes: 1 });
    }
    check_len("dense weights", n_inputs * n_outputs, wts.len())?;
    let row = n_inputs / WORD_SIZE;
    let mut words = vec![0; n_outputs * row];
    for n in 0..n_outputs {
        for m in 0..n_inputs {
            set_bit(&mut words[n * row..(n + 1) * row], m, weight_bit(wts[m * n_outputs + n]));
        }
    }
    Ok(words)
}

/// 正規化パラメータから閾値 `-(bias / scale)` を求める
pub fn threshold(scale: f32, bias: f32) -> f32 {
    let sat = THRESH_SATURATION as f32;
    if scale == 0.0 {
        if bias >= 0.0 { -sat } else { sat }
    } else {
        -(bias / scale)
    }
}

#[inline]
fn saturate_i16(v: f64) -> i16 {
    v.clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// 0 から遠い方へ丸めて 16bit 整数へ
#[inline]
fn round_away_from_zero(v: f32) -> i16 {
    let v = v as f64;
    saturate_i16(if v < 0.0 { v.floor() } else { v.ceil() })
}

/// 小数部 `frac` ビットの固定小数点へ（切り捨て）
#[inline]
fn to_fixed_floor(v: f32, frac: u32) -> i16 {
    saturate_i16((v as f64 * (1u32 << frac) as f64).floor())
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(AccelError::LengthMismatch { what, expected, actual });
    }
    Ok(())
}

fn pack_threshold_values(values: impl ExactSizeIterator<Item = i16>) -> Vec<Word> {
    let mut words = vec![0; values.len().div_ceil(KH_PER_WORD)];
    for (n, v) in values.enumerate() {
        let w = &mut words[n / KH_PER_WORD];
        *w = layout::with_threshold(*w, n % KH_PER_WORD, v);
    }
    words
}

/// 中間層（第1層以外）の整数閾値
pub fn pack_thresholds(scales: &[f32], biases: &[f32]) -> Result<Vec<Word>> {
    check_len("biases", scales.len(), biases.len())?;
    let values =
        scales.iter().zip(biases).map(|(&k, &h)| round_away_from_zero(threshold(k, h)));
    Ok(pack_threshold_values(values))
}

/// 第1層の Q4.12 閾値
pub fn pack_conv1_thresholds(scales: &[f32], biases: &[f32]) -> Result<Vec<Word>> {
    check_len("biases", scales.len(), biases.len())?;
    let values =
        scales.iter().zip(biases).map(|(&k, &h)| to_fixed_floor(threshold(k, h), C1_COMP_FRAC));
    Ok(pack_threshold_values(values))
}

/// 最終層の (scale Q2.14, bias Q4.12) ペア
pub fn pack_last_params(scales: &[f32], biases: &[f32]) -> Result<Vec<Word>> {
    check_len("biases", scales.len(), biases.len())?;
    let mut words = vec![0; scales.len().div_ceil(LAST_KH_PER_WORD)];
    for (n, (&k, &h)) in scales.iter().zip(biases).enumerate() {
        let value = ScaleBias {
            scale: to_fixed_floor(k, SCALE_FRAC),
            bias: to_fixed_floor(h, BIAS_FRAC),
        };
        let w = &mut words[n / LAST_KH_PER_WORD];
        *w = layout::with_scale_bias(*w, n % LAST_KH_PER_WORD, value);
    }
    Ok(words)
}

/// 入力ピクセル 1 つを Q2.18 へ（0.5 は切り上げ、飽和）
#[inline]
pub fn quantize_pixel(v: f32) -> i32 {
    let max = (1i64 << (C1_INPUT_BITS - 1)) - 1;
    let raw = (v as f64 * (1u32 << C1_INPUT_FRAC) as f64 + 0.5).floor();
    raw.clamp(-(max + 1) as f64, max as f64) as i32
}

/// チャネル分離（3×32×32）の画像を 1 ピクセル 1 ワードに詰める
pub fn pack_input_image(pixels: &[f32]) -> Result<Vec<Word>> {
    const PIXELS: usize = CONV1_WIDTH * CONV1_WIDTH;
    check_len("input image", CONV1_CHANNELS * PIXELS, pixels.len())?;
    Ok((0..PIXELS)
        .map(|s| {
            (0..CONV1_CHANNELS).fold(0, |w, c| {
                layout::with_input_pixel(w, c, quantize_pixel(pixels[c * PIXELS + s]))
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{conv_filter, input_pixel, scale_bias};

    #[test]
    fn test_pack_bits_sign_convention() {
        let words = pack_bits(&[1.0, -0.5, 0.0, -0.0, -3.0]);
        // -0.0 は負ではない
        assert_eq!(words, vec![0b10010]);
    }

    #[test]
    fn test_pack_conv_weights_filter_order() {
        let mut wts = vec![1.0; 8 * WT_SIZE];
        wts[0] = -1.0; // フィルタ 0 のビット 0
        wts[7 * WT_SIZE + 8] = -1.0; // フィルタ 7 のビット 8
        let words = pack_conv_weights(&wts).unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(conv_filter(words[0], 0).bits(), 1);
        assert_eq!(conv_filter(words[1], 0).bits(), 1 << 8);
        assert!(pack_conv_weights(&wts[1..]).is_err());
    }

    #[test]
    fn test_pack_dense_weights_is_input_major() {
        // 入力 64 × 出力 2: 入力 3 → 出力 1 の重みだけ負
        let mut wts = vec![0.5; 128];
        wts[3 * 2 + 1] = -0.5;
        let words = pack_dense_weights(&wts, 64, 2).unwrap();
        assert_eq!(words, vec![0, 1 << 3]);
        assert!(pack_dense_weights(&wts, 32, 4).is_err());
    }

    #[test]
    fn test_threshold_zero_scale_saturates() {
        assert_eq!(threshold(0.0, 1.0), -32767.0);
        assert_eq!(threshold(0.0, -1.0), 32767.0);
        assert_eq!(threshold(2.0, 3.0), -1.5);
    }

    #[test]
    fn test_integer_thresholds_round_away_from_zero() {
        let words = pack_thresholds(&[2.0, 2.0, 1.0, 1e-6], &[3.0, -3.0, 0.0, -1.0]).unwrap();
        let t: Vec<i16> = (0..4).map(|i| layout::threshold(words[0], i)).collect();
        assert_eq!(t, vec![-2, 2, 0, i16::MAX]);
    }

    #[test]
    fn test_conv1_thresholds_q4_12() {
        let words = pack_conv1_thresholds(&[1.0, 4.0], &[-0.5, 1.0]).unwrap();
        assert_eq!(layout::threshold(words[0], 0), 2048);
        assert_eq!(layout::threshold(words[0], 1), -1024);
        assert!(pack_conv1_thresholds(&[1.0], &[]).is_err());
    }

    #[test]
    fn test_last_params_pairs() {
        let words = pack_last_params(&[1.0, -0.5, 0.25], &[0.5, 2.0, -1.0]).unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(scale_bias(words[0], 0), ScaleBias { scale: 1 << 14, bias: 1 << 11 });
        assert_eq!(scale_bias(words[0], 1), ScaleBias { scale: -(1 << 13), bias: 1 << 13 });
        assert_eq!(scale_bias(words[1], 0), ScaleBias { scale: 1 << 12, bias: -(1 << 12) });
        // 2.0 は Q2.14 の範囲外
        let words = pack_last_params(&[2.0], &[0.0]).unwrap();
        assert_eq!(scale_bias(words[0], 0).scale, i16::MAX);
    }

    #[test]
    fn test_quantize_pixel_rounding() {
        assert_eq!(quantize_pixel(0.0), 0);
        assert_eq!(quantize_pixel(1.0), 1 << 18);
        assert_eq!(quantize_pixel(-1.0), -(1 << 18));
        // 半分は正の無限大方向へ
        assert_eq!(quantize_pixel(-0.5 / (1 << 18) as f32), 0);
        assert_eq!(quantize_pixel(0.5 / (1 << 18) as f32), 1);
        assert_eq!(quantize_pixel(10.0), (1 << 19) - 1);
        assert_eq!(quantize_pixel(-10.0), -(1 << 19));
    }

    #[test]
    fn test_pack_input_image_channel_fields() {
        let mut pixels = vec![0.0; 3 * 1024];
        pixels[5] = 0.25;
        pixels[1024 + 5] = -0.25;
        pixels[2048 + 5] = 1.0;
        let words = pack_input_image(&pixels).unwrap();
        assert_eq!(words.len(), 1024);
        assert_eq!(input_pixel(words[5], 0), 1 << 16);
        assert_eq!(input_pixel(words[5], 1), -(1 << 16));
        assert_eq!(input_pixel(words[5], 2), 1 << 18);
        assert_eq!(words[4], 0);
        assert!(pack_input_image(&pixels[1..]).is_err());
    }
}
