//! 直接計算による参照実装
//!
//! ストア容量・レーン・ストリーミングを一切持たない素朴な計算。
//! 特徴マップはチャネル優先の線形ビット列（チャネル c の画素 (r, col) は
//! ビット `c·S² + r·S + col`）、パラメータは `pack` の出力形式をそのまま読む。
//! エンジンとスケジューラの出力はこれとビット単位で一致しなければならない。

use crate::constants::{
    C1_COMP_FRAC, C1_INPUT_FRAC, CONV_W_PER_WORD, CONV1_CHANNELS, CONV1_WIDTH, K, KH_PER_WORD,
    LAST_KH_PER_WORD, WORD_SIZE, Word,
};
use crate::engine::{last_score, norm::binarize, word_score};
use crate::layout::{self, Filter};
use crate::word::{get_bit, set_bit, words_for_bits};

fn filter(weights: &[Word], index: usize) -> Filter {
    layout::conv_filter(weights[index / CONV_W_PER_WORD], index % CONV_W_PER_WORD)
}

fn threshold(thresholds: &[Word], o: usize) -> i32 {
    layout::threshold(thresholds[o / KH_PER_WORD], o % KH_PER_WORD) as i32
}

/// 二値化済みマップの 2x2 AND プーリング
pub fn pool(map: &[Word], n_channels: usize, width: usize) -> Vec<Word> {
    let wo = width / 2;
    let mut out = vec![0; words_for_bits(n_channels * wo * wo)];
    for c in 0..n_channels {
        for r in 0..wo {
            for col in 0..wo {
                let px = |dr: usize, dc: usize| {
                    get_bit(map, c * width * width + (2 * r + dr) * width + 2 * col + dc)
                };
                let v = px(0, 0) & px(0, 1) & px(1, 0) & px(1, 1);
                set_bit(&mut out, c * wo * wo + r * wo + col, v);
            }
        }
    }
    out
}

/// 二値 3x3 畳み込み（ゼロパディング）＋閾値＋任意のプーリング
pub fn bin_conv(
    input: &[Word],
    weights: &[Word],
    thresholds: &[Word],
    n_inputs: usize,
    n_outputs: usize,
    width: usize,
    pool_output: bool,
) -> Vec<Word> {
    let plane = width * width;
    let mut out = vec![0; words_for_bits(n_outputs * plane)];
    for o in 0..n_outputs {
        let nc = threshold(thresholds, o);
        for r in 0..width {
            for c in 0..width {
                let mut sum = 0;
                for m in 0..n_inputs {
                    let f = filter(weights, o * n_inputs + m);
                    for kr in 0..K {
                        for kc in 0..K {
                            let (Some(y), Some(x)) =
                                ((r + kr).checked_sub(1), (c + kc).checked_sub(1))
                            else {
                                continue;
                            };
                            if y >= width || x >= width {
                                continue;
                            }
                            let neg = get_bit(input, m * plane + y * width + x);
                            sum += if neg ^ f.weight_at(kr, kc) { -1 } else { 1 };
                        }
                    }
                }
                set_bit(&mut out, o * plane + r * width + c, binarize(sum, nc));
            }
        }
    }
    if pool_output { pool(&out, n_outputs, width) } else { out }
}

/// 第1層: Q2.18 の 3 チャネル画像（1 ピクセル 1 ワード）
pub fn first_conv(
    image: &[Word],
    weights: &[Word],
    thresholds: &[Word],
    n_outputs: usize,
) -> Vec<Word> {
    const S: usize = CONV1_WIDTH;
    let mut out = vec![0; words_for_bits(n_outputs * S * S)];
    for o in 0..n_outputs {
        let nc = threshold(thresholds, o) << (C1_INPUT_FRAC - C1_COMP_FRAC);
        for r in 0..S {
            for c in 0..S {
                let mut sum = 0i32;
                for m in 0..CONV1_CHANNELS {
                    let f = filter(weights, o * CONV1_CHANNELS + m);
                    for kr in 0..K {
                        for kc in 0..K {
                            let (y, x) = (r + kr, c + kc);
                            if y == 0 || x == 0 || y > S || x > S {
                                continue;
                            }
                            let px = layout::input_pixel(image[(y - 1) * S + (x - 1)], m);
                            sum += if f.weight_at(kr, kc) { -px } else { px };
                        }
                    }
                }
                set_bit(&mut out, o * S * S + r * S + c, binarize(sum, nc));
            }
        }
    }
    out
}

fn dense_sum(input: &[Word], weights: &[Word], n_inputs: usize, o: usize) -> i32 {
    let row = n_inputs / WORD_SIZE;
    input[..row]
        .iter()
        .zip(&weights[o * row..(o + 1) * row])
        .map(|(&x, &w)| word_score(w, x))
        .sum()
}

/// 二値全結合＋閾値
pub fn dense(
    input: &[Word],
    weights: &[Word],
    thresholds: &[Word],
    n_inputs: usize,
    n_outputs: usize,
) -> Vec<Word> {
    let mut out = vec![0; words_for_bits(n_outputs)];
    for o in 0..n_outputs {
        let sum = dense_sum(input, weights, n_inputs, o);
        set_bit(&mut out, o, binarize(sum, threshold(thresholds, o)));
    }
    out
}

/// 最終層のスコア（小数部 14bit）
pub fn scores(
    input: &[Word],
    weights: &[Word],
    params: &[Word],
    n_inputs: usize,
    n_outputs: usize,
) -> Vec<i64> {
    (0..n_outputs)
        .map(|o| {
            let sb = layout::scale_bias(params[o / LAST_KH_PER_WORD], o % LAST_KH_PER_WORD);
            last_score(dense_sum(input, weights, n_inputs, o), sb.scale, sb.bias)
        })
        .collect()
}

/// 最終層の予測（最大スコアのうち最小の番号）
pub fn classify(
    input: &[Word],
    weights: &[Word],
    params: &[Word],
    n_inputs: usize,
    n_outputs: usize,
) -> i8 {
    let scores = scores(input, weights, params, n_inputs, n_outputs);
    let mut best: Option<(usize, i64)> = None;
    for (o, &s) in scores.iter().enumerate() {
        if best.is_none_or(|(_, b)| s > b) {
            best = Some((o, s));
        }
    }
    best.map_or(-1, |(o, _)| o as i8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ScaleBias, with_scale_bias, with_threshold};

    #[test]
    fn test_pool_and_semantics() {
        // 4x4 の 1 チャネル: 左上の窓だけ全 -1、右上の窓は 3 画素だけ -1
        let mut map = vec![0];
        for i in [0, 1, 4, 5, 2, 3, 6] {
            set_bit(&mut map, i, true);
        }
        assert_eq!(pool(&map, 1, 4), vec![0b0001]);
    }

    #[test]
    fn test_bin_conv_corner_counts() {
        // 全 +1 入力、全 0 重み: 角 4、辺 6、内部 9
        let kh = vec![with_threshold(0, 0, 5)];
        let out = bin_conv(&[0], &[0], &kh, 1, 1, 8, false);
        assert_eq!(out[0] & 0x81, 0x81);
        assert!(!get_bit(&out, 1));
        assert!(!get_bit(&out, 9));
    }

    #[test]
    fn test_classify_first_max_wins() {
        let a = ScaleBias { scale: 1 << 14, bias: 0 };
        let b = ScaleBias { scale: 1 << 14, bias: 1 << 12 };
        let params =
            vec![with_scale_bias(with_scale_bias(0, 0, a), 1, b), with_scale_bias(0, 0, b)];
        assert_eq!(classify(&[0], &[0, 0, 0], &params, 64, 3), 1);
    }
}
