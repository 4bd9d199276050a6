//! 重み・閾値のサブ呼び出し単位への切り出し
//!
//! ソースは層全体のパック済み配列（`pack` の出力形式）。
//! 返すスライスの `words` はストアへの転送順で、ワード i は
//! レーン i mod L、オフセット i div L に入る。

use crate::constants::{CONV_W_PER_WORD, CONV1_CHANNELS, WORD_SIZE, Word};
use crate::layout::{self, Filter};
use crate::store::{ThresholdSlice, WeightSlice};
use crate::word;

/// 層内通し番号 `index` のフィルタ（範囲外はゼロ）
#[inline]
fn source_filter(src: &[Word], index: usize) -> Filter {
    src.get(index / CONV_W_PER_WORD)
        .map_or(Filter::ZERO, |&w| layout::conv_filter(w, index % CONV_W_PER_WORD))
}

/// 二値畳み込み層
///
/// 出力 `o_start` からの i 番目のフィルタはレーン i mod L の
/// k = i div L 番目に入り、各レーンは 7 フィルタずつワードに詰める。
/// `base` はレーンあたりのフィルタ番号。
pub fn conv_weights(
    src: &[Word],
    o_start: usize,
    n_inputs: usize,
    n_outputs: usize,
    lanes: usize,
) -> WeightSlice {
    let filters = n_outputs * n_inputs;
    let per_lane = filters / lanes;
    let words_per_lane = per_lane.div_ceil(CONV_W_PER_WORD);
    let first = o_start * n_inputs;

    let mut words = vec![0; words_per_lane * lanes];
    for i in 0..filters {
        let (lane, k) = (i % lanes, i / lanes);
        let idx = (k / CONV_W_PER_WORD) * lanes + lane;
        words[idx] = layout::with_conv_filter(
            words[idx],
            k % CONV_W_PER_WORD,
            source_filter(src, first + i),
        );
    }
    WeightSlice { words, base: first / lanes }
}

/// 第1層: 出力 1 つにつき 1 ワード（入力 3 チャネル分のフィルタ）
pub fn conv1_weights(src: &[Word], o_start: usize, n_outputs: usize) -> WeightSlice {
    let words = (o_start..o_start + n_outputs)
        .map(|o| {
            (0..CONV1_CHANNELS).fold(0, |w, ch| {
                layout::with_conv1_filter(w, ch, source_filter(src, o * CONV1_CHANNELS + ch))
            })
        })
        .collect();
    WeightSlice { words, base: o_start }
}

/// 全結合層: 出力行のワード列をそのまま切り出す
///
/// 呼び出し側でソースの長さを検証済みであること。
pub fn dense_weights(
    src: &[Word],
    o_start: usize,
    n_inputs: usize,
    n_outputs: usize,
) -> WeightSlice {
    let row = n_inputs / WORD_SIZE;
    let first = o_start * row;
    WeightSlice { words: src[first..first + n_outputs * row].to_vec(), base: first }
}

/// 閾値: 出力 `o_start` を先頭スロットに詰め直した `n_outputs` 個分
///
/// 値の幅は 1 ワードに `per_word` 個並ぶ幅。`base` は `o_start`。
pub fn threshold_slice(
    src: &[Word],
    o_start: usize,
    n_outputs: usize,
    per_word: usize,
) -> ThresholdSlice {
    let bits = (WORD_SIZE / per_word) as u32;
    let mut words = vec![0; n_outputs.div_ceil(per_word)];
    for i in 0..n_outputs {
        let o = o_start + i;
        let value = word::field(src[o / per_word], (o % per_word) as u32 * bits, bits);
        let w = &mut words[i / per_word];
        *w = word::with_field(*w, (i % per_word) as u32 * bits, bits, value);
    }
    ThresholdSlice { words, base: o_start }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ScaleBias, with_conv_filter};

    fn packed_filters(n: usize) -> Vec<Word> {
        let mut src = vec![0; n.div_ceil(CONV_W_PER_WORD)];
        for i in 0..n {
            let w = &mut src[i / CONV_W_PER_WORD];
            *w = with_conv_filter(*w, i % CONV_W_PER_WORD, Filter::from_bits(i as u16 + 1));
        }
        src
    }

    #[test]
    fn test_conv_weights_round_robin_lanes() {
        // 出力 4 × 入力 4、2 レーン: 出力 2 から 2 出力分
        let src = packed_filters(16);
        let slice = conv_weights(&src, 2, 4, 2, 2);
        assert_eq!(slice.base, 4);
        assert_eq!(slice.words.len(), 2);
        // レーン 0: フィルタ 8, 10, 12, 14
        let lane = |m: usize| -> Vec<u16> {
            (0..4).map(|k| layout::conv_filter(slice.words[m], k).bits()).collect()
        };
        assert_eq!(lane(0), vec![9, 11, 13, 15]);
        assert_eq!(lane(1), vec![10, 12, 14, 16]);
    }

    #[test]
    fn test_conv_weights_spill_to_next_word() {
        // 1 レーン 9 フィルタ → 2 ワード
        let src = packed_filters(9);
        let slice = conv_weights(&src, 0, 9, 1, 1);
        assert_eq!(slice.words.len(), 2);
        assert_eq!(layout::conv_filter(slice.words[1], 1).bits(), 9);
        assert_eq!(layout::conv_filter(slice.words[1], 2), Filter::ZERO);
    }

    #[test]
    fn test_conv1_weights_one_word_per_output() {
        let src = packed_filters(12);
        let slice = conv1_weights(&src, 1, 3);
        assert_eq!(slice.base, 1);
        assert_eq!(slice.words.len(), 3);
        let filters: Vec<u16> =
            (0..3).map(|ch| layout::conv1_filter(slice.words[2], ch).bits()).collect();
        assert_eq!(filters, vec![10, 11, 12]);
    }

    #[test]
    fn test_dense_weights_rows() {
        let src: Vec<Word> = (0..12).collect();
        let slice = dense_weights(&src, 2, 128, 3);
        assert_eq!(slice.words, vec![4, 5, 6, 7, 8, 9]);
        assert_eq!(slice.base, 4);
    }

    #[test]
    fn test_threshold_slice_starts_at_slot_zero() {
        // 閾値 0..16 を 4 ワードに詰め、出力 6 から 5 個
        let kh = (0..16).fold(vec![0; 4], |mut kh, n| {
            kh[n / 4] = layout::with_threshold(kh[n / 4], n % 4, n as i16 * 10 - 50);
            kh
        });
        let slice = threshold_slice(&kh, 6, 5, 4);
        assert_eq!(slice.base, 6);
        assert_eq!(slice.words.len(), 2);
        let values: Vec<i16> =
            (0..5).map(|i| layout::threshold(slice.words[i / 4], i % 4)).collect();
        assert_eq!(values, vec![10, 20, 30, 40, 50]);
        // 末尾の空きスロットはゼロ
        assert_eq!(layout::threshold(slice.words[1], 1), 0);
    }

    #[test]
    fn test_scale_bias_slice_keeps_pairs() {
        let pair = |n: i16| ScaleBias { scale: n, bias: -n };
        let src = (0..6).fold(vec![0; 3], |mut src, n| {
            src[n / 2] = layout::with_scale_bias(src[n / 2], n % 2, pair(n as i16 + 1));
            src
        });
        let slice = threshold_slice(&src, 3, 3, 2);
        assert_eq!(slice.base, 3);
        assert_eq!(slice.words.len(), 2);
        assert_eq!(layout::scale_bias(slice.words[0], 0), pair(4));
        assert_eq!(layout::scale_bias(slice.words[0], 1), pair(5));
        assert_eq!(layout::scale_bias(slice.words[1], 0), pair(6));
    }
}
