//! 第1層畳み込み（実数値入力・二値重み）
//!
//! 入力は 32x32、3 チャネルの Q2.18 固定小数点ピクセル（1 ワードに 3 チャネル分）。
//! 二値畳み込みと同じくラインバッファ（2 行）と 3x3 ウィンドウで 1 ピクセルずつ流し、
//! 行・列とも 1 つ余分に回してゼロパディングの右端・下端を押し出す。
//! 重みは符号反転のみで、和は小数部 18bit のまま閾値（Q4.12）と比べる。

use rayon::prelude::*;

use super::{FmapIo, Invocation, NormMode, Stores, WidthMode};
use crate::constants::{
    C1_COMP_FRAC, C1_INPUT_FRAC, CONV1_CHANNELS, CONV1_OUT_WORDS, CONV1_WIDTH, K, Word,
};
use crate::context::LayerContext;
use crate::error::{AccelError, Result};
use crate::layout::{self, Filter};
use crate::word::set_bit;

const S: usize = CONV1_WIDTH;
const M: usize = CONV1_CHANNELS;

type Pixel = [i32; M];

/// 1 出力チャネル分のウィンドウ状態
struct InputWindow {
    lbuf: [[[i32; S]; K - 1]; M],
    win: [[[i32; K]; K]; M],
}

impl InputWindow {
    fn new() -> Self {
        Self { lbuf: [[[0; S]; K - 1]; M], win: [[[0; K]; K]; M] }
    }

    /// 列 `c` に新しいピクセルを入れてウィンドウを 1 列進める
    fn push(&mut self, c: usize, pix: Pixel) {
        for m in 0..M {
            let win = &mut self.win[m];
            for row in win.iter_mut() {
                row.rotate_left(1);
            }
            for wr in 0..K - 1 {
                win[wr][K - 1] = if c != S { self.lbuf[m][wr][c] } else { 0 };
            }
            win[K - 1][K - 1] = pix[m];

            if c != S {
                let lbuf = &mut self.lbuf[m];
                for lr in 0..K - 2 {
                    lbuf[lr][c] = lbuf[lr + 1][c];
                }
                lbuf[K - 2][c] = pix[m];
            }
        }
    }

    /// 現在のウィンドウの畳み込み和（小数部 18bit）
    fn conv(&self, filters: &[Filter; M]) -> i32 {
        let mut res = 0;
        for (win, filter) in self.win.iter().zip(filters) {
            for wr in 0..K {
                for wc in 0..K {
                    let pix = win[wr][wc];
                    res += if filter.weight_at(wr, wc) { -pix } else { pix };
                }
            }
        }
        res
    }
}

/// 1 出力チャネルを計算し、二値化済みの 16 ワードを返す
fn conv_channel(pixels: &[Pixel], filters: [Filter; M], nc: i16) -> [Word; CONV1_OUT_WORDS] {
    let threshold = (nc as i32) << (C1_INPUT_FRAC - C1_COMP_FRAC);
    let mut out = [0; CONV1_OUT_WORDS];
    let mut window = InputWindow::new();
    for r in 0..=S {
        for c in 0..=S {
            let pix = if r < S && c < S { pixels[r * S + c] } else { [0; M] };
            window.push(c, pix);
            if r > 0 && c > 0 {
                let res = window.conv(&filters);
                set_bit(&mut out, (r - 1) * S + (c - 1), res < threshold);
            }
        }
    }
    out
}

fn validate(
    stores: &Stores<'_>,
    io: &FmapIo<'_>,
    ctx: &LayerContext,
    op: &Invocation,
) -> Result<()> {
    if op.n_inputs != M {
        return Err(AccelError::FirstLayerChannels(op.n_inputs));
    }
    if op.width != WidthMode::W32 {
        return Err(AccelError::UnsupportedWidth(op.width.width()));
    }
    if op.norm != NormMode::Threshold {
        return Err(AccelError::UnsupportedNormMode { kind: op.kind, mode: op.norm });
    }
    if !stores.config.fits_first_layer_input() {
        return Err(AccelError::InputTooLarge {
            required: S * S,
            capacity: stores.config.fmap_words,
        });
    }
    let lanes = stores.config.lanes;
    let last = ctx.output_cursor + op.n_outputs - 1;
    io.check_output((last / lanes) * CONV1_OUT_WORDS + CONV1_OUT_WORDS - 1)?;

    let first = stores.weights.local_index(ctx.weight_cursor)?;
    stores.check_weight_words((first + op.n_outputs).div_ceil(lanes))?;
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
    let wpl = io.fmap.words_per_lane();

    // 入力はレーン 0 から線形に並ぶ
    let pixels: Vec<Pixel> = (0..S * S)
        .map(|addr| {
            let word = io.fmap.word(io.input, addr / wpl, addr % wpl);
            std::array::from_fn(|m| layout::input_pixel(word, m))
        })
        .collect();

    let first_weight = stores.weights.local_index(ctx.weight_cursor)?;
    let first_kh = stores.thresholds.local_index(ctx.threshold_cursor)?;
    let outputs: Vec<[Word; CONV1_OUT_WORDS]> = (0..op.n_outputs)
        .into_par_iter()
        .map(|n| {
            let idx = first_weight + n;
            let wt_word = stores.weights.word(idx % lanes, idx / lanes);
            let filters = std::array::from_fn(|m| layout::conv1_filter(wt_word, m));
            let nc = stores.thresholds.threshold(first_kh + n);
            conv_channel(&pixels, filters, nc)
        })
        .collect();

    for words in outputs {
        let o = ctx.output_cursor;
        let (bank_idx, bank_off) = (o % lanes, o / lanes);
        for (i, &w) in words.iter().enumerate() {
            io.fmap.set_word(io.output, bank_idx, bank_off * CONV1_OUT_WORDS + i, w);
        }
        ctx.output_cursor += 1;
        ctx.threshold_cursor += 1;
        ctx.weight_cursor += 1;
    }
    Ok(())
}
