//! 二値全結合層と最終分類層
//!
//! 入力ベクトルと重み行はどちらもワード単位でパックされ、ワード `k` は
//! レーン `k mod L`、オフセット `k div L` に置かれる。1 ワードあたりの内積は
//! `64 - 2·popcount(w ^ x)`。
//!
//! 中間層は和を閾値と比べて出力ビットを立てる。最終層は `sum·scale + bias` を
//! 小数部 14bit の固定小数点で評価し、層全体の arg-max をコンテキストに持ち越す。

use rayon::prelude::*;

use super::norm::binarize;
use super::{FmapIo, Invocation, LayerKind, NormMode, Stores};
use crate::constants::{BIAS_FRAC, SCALE_FRAC, WORD_SIZE, Word};
use crate::context::LayerContext;
use crate::error::{AccelError, Result};
use crate::word::{popcount, with_bit};

/// 1 ワード分の ±1 内積
#[inline]
pub const fn word_score(wt: Word, input: Word) -> i32 {
    WORD_SIZE as i32 - 2 * popcount(wt ^ input) as i32
}

/// 最終層のスコア（小数部 14bit）
///
/// 小数部は切り詰めずに厳密に比較する。
#[inline]
pub const fn last_score(sum: i32, scale: i16, bias: i16) -> i64 {
    sum as i64 * scale as i64 + ((bias as i64) << (SCALE_FRAC - BIAS_FRAC))
}

fn validate(
    stores: &Stores<'_>,
    io: &FmapIo<'_>,
    ctx: &LayerContext,
    op: &Invocation,
) -> Result<()> {
    let lanes = stores.config.lanes;
    if op.n_inputs % WORD_SIZE != 0 || (op.n_inputs / WORD_SIZE) % lanes != 0 {
        return Err(AccelError::DenseInputNotAligned { n_inputs: op.n_inputs, lanes });
    }
    if op.norm == NormMode::ThresholdPool {
        return Err(AccelError::UnsupportedNormMode { kind: op.kind, mode: op.norm });
    }
    let in_words = op.n_inputs / WORD_SIZE;
    io.check_input(in_words / lanes)?;
    match op.kind {
        LayerKind::Last => io.check_output(0)?,
        _ => {
            let addr = (ctx.output_cursor + op.n_outputs - 1) / WORD_SIZE;
            io.check_output(addr / lanes)?;
        }
    }

    let first = stores.weights.local_index(ctx.weight_cursor)?;
    if first % lanes != 0 {
        return Err(AccelError::WeightsNotLaneAligned { offset: first, lanes });
    }
    stores.check_weight_words((first + op.n_outputs * in_words).div_ceil(lanes))?;
    stores.check_thresholds(ctx.threshold_cursor, op.n_outputs, op.kind.thresholds_per_word())?;
    Ok(())
}

pub(super) fn run(
    stores: &Stores<'_>,
    io: FmapIo<'_>,
    ctx: &mut LayerContext,
    op: &Invocation,
) -> Result<()> {
    validate(stores, &io, ctx, op)?;
    let lanes = stores.config.lanes;
    let in_words = op.n_inputs / WORD_SIZE;
    let first_weight = stores.weights.local_index(ctx.weight_cursor)?;
    let first_kh = stores.thresholds.local_index(ctx.threshold_cursor)?;

    let fmap = &*io.fmap;
    let sums: Vec<i32> = (0..op.n_outputs)
        .into_par_iter()
        .map(|o| {
            let wt_start = first_weight + o * in_words;
            let mut sum = 0;
            for i in (0..in_words).step_by(lanes) {
                for j in 0..lanes {
                    let x = fmap.word(io.input, j, i / lanes);
                    let w = stores.weights.word(j, (wt_start + i) / lanes);
                    sum += word_score(w, x);
                }
            }
            sum
        })
        .collect();

    for (o, &sum) in sums.iter().enumerate() {
        let og = ctx.output_cursor;
        match op.kind {
            LayerKind::Last => {
                let sb = stores.thresholds.scale_bias(first_kh + o);
                ctx.offer(last_score(sum, sb.scale, sb.bias), og);
            }
            _ => {
                let nc = stores.thresholds.threshold(first_kh + o) as i32;
                let addr = og / WORD_SIZE;
                let (lane, off) = (addr % lanes, addr / lanes);
                let word = io.fmap.word(io.output, lane, off);
                let word = with_bit(word, (og % WORD_SIZE) as u32, binarize(sum, nc));
                io.fmap.set_word(io.output, lane, off, word);
            }
        }
        ctx.output_cursor += 1;
        ctx.threshold_cursor += 1;
        ctx.weight_cursor += in_words;
    }

    if op.kind == LayerKind::Last {
        // 予測は下位 8bit（2 の補数）、残りは 0
        let prediction = ctx.best.map_or(-1, |b| b.index as i8);
        io.fmap.set_word(io.output, 0, 0, prediction as u8 as Word);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_word_score_extremes() {
        assert_eq!(word_score(0, 0), 64);
        assert_eq!(word_score(Word::MAX, 0), -64);
        assert_eq!(word_score(0xff, 0), 48);
    }

    #[test]
    fn test_last_score_fixed_point() {
        // scale = 1.0 (Q2.14), bias = 0.5 (Q4.12) → 3 + 0.5
        assert_eq!(last_score(3, 1 << 14, 1 << 11), (7 << 14) / 2);
        assert_eq!(last_score(-2, -(1 << 13), 0), 1 << 14);
    }

    proptest! {
        #[test]
        fn prop_word_score_is_64_minus_twice_hamming(a in any::<u64>(), b in any::<u64>()) {
            let hamming = (a ^ b).count_ones() as i32;
            prop_assert_eq!(word_score(a, b), 64 - 2 * hamming);
        }
    }
}
