//! 二値 3x3 畳み込み
//!
//! 1 出力チャネルごとに、各レーンが担当する入力チャネル群を 1 ワードずつ流し込み、
//! ラインバッファ上で 3x3 の三値畳み込みを行う。
//!
//! # ワードとバンク
//!
//! 1 ワード = 8 バンク × 8 ピクセル。幅 `W` の画像では 1 行が `W/8` バンクを占め、
//! 1 ワードに `64/W` 行が入る。ラインバッファは各バンクについて
//! 3 行 × 10 列（左右に隣接バンクの端ピクセル）を保持する。
//!
//! # ストリーミング
//!
//! ワード `i` を読み込んだ時点で、ワード `i-1` の全出力が計算可能になる。
//! 1 画像あたり `words_per_image + 1` ステップを回し、最後の 1 ステップは
//! 下端をゼロで埋めて末尾の行を押し出すためだけに使う。
//!
//! # 部分和
//!
//! レーンは画像をフェーズ単位（`pix_per_phase` ピクセル）で処理し、
//! 各画像の結果をフェーズバッファの対応スロットへ加算する。
//! 全フェーズ後、同じワード位置のスロットを畳み込み、全レーンの和を取る。

use rayon::prelude::*;

use super::norm::{binarize_word, pool_quarter, push_quarter};
use super::{FmapIo, Invocation, NormMode, Stores, WidthMode};
use crate::constants::{
    BANK_WIDTH, CONV_BANKS, CONV_COLS, CONV_ROWS, CONV_W_PER_WORD, K, WORD_SIZE, Word,
};
use crate::context::LayerContext;
use crate::error::{AccelError, Result};
use crate::layout::{self, Filter};
use crate::store::{FeatureMapStore, Half};
use crate::word::{TwoBit, encode_bit};

type BankRow = [TwoBit; CONV_COLS];
type WordBuffer = [BankRow; CONV_BANKS];
type LineBuffer = [[BankRow; CONV_ROWS]; CONV_BANKS];
type PartialSums = [i32; WORD_SIZE];

/// バンクごとの左右端フラグ
#[derive(Debug, Clone, Copy)]
struct EdgeFlags {
    left: [bool; CONV_BANKS],
    right: [bool; CONV_BANKS],
}

impl EdgeFlags {
    fn new(width: WidthMode) -> Self {
        let spl = width.slices_per_line();
        let mut left = [false; CONV_BANKS];
        let mut right = [false; CONV_BANKS];
        for bank in 0..CONV_BANKS {
            left[bank] = bank % spl == 0;
            right[bank] = bank % spl == spl - 1;
        }
        Self { left, right }
    }
}

/// ワードをバンク行に展開する
///
/// 列 1..=8 がバンク自身のピクセル、列 0 と列 9 は隣接バンクの端ピクセル。
/// ワードの両端では隣接バンクがないのでゼロ。
fn load_word(word: Word) -> WordBuffer {
    let px = |i: usize| encode_bit(layout::activation(word, i));
    let mut buf = [[TwoBit::ZERO; CONV_COLS]; CONV_BANKS];
    for (bank, row) in buf.iter_mut().enumerate() {
        let base = bank * BANK_WIDTH;
        for cc in 0..BANK_WIDTH {
            row[cc + 1] = px(base + cc);
        }
        row[0] = if bank == 0 { TwoBit::ZERO } else { px(base - 1) };
        row[CONV_COLS - 1] =
            if bank == CONV_BANKS - 1 { TwoBit::ZERO } else { px(base + BANK_WIDTH) };
    }
    buf
}

/// 端フラグに従って左右の列をゼロにしたバンク行
#[inline]
fn masked(row: &BankRow, left: bool, right: bool) -> BankRow {
    let mut out = *row;
    if left {
        out[0] = TwoBit::ZERO;
    }
    if right {
        out[CONV_COLS - 1] = TwoBit::ZERO;
    }
    out
}

/// 1 出力ピクセルの 3x3 和
///
/// 2bit 表現のまま、重みビットが立っていれば符号ビットを反転して足し込む。
#[inline]
fn conv3x3b(lbuf: &LineBuffer, filter: Filter, bank: usize, cc: usize) -> i32 {
    let mut sum = 0;
    for kr in 0..K {
        for kc in 0..K {
            sum += lbuf[bank][kr][cc + kc].flip(filter.weight_at(kr, kc)).value();
        }
    }
    sum
}

/// 1 レーン分のストリーミング状態
struct LaneConv {
    edges: EdgeFlags,
    width: WidthMode,
    line: LineBuffer,
    word: WordBuffer,
    old_word: WordBuffer,
}

impl LaneConv {
    fn new(width: WidthMode) -> Self {
        let zero_word = [[TwoBit::ZERO; CONV_COLS]; CONV_BANKS];
        Self {
            edges: EdgeFlags::new(width),
            width,
            line: [[[TwoBit::ZERO; CONV_COLS]; CONV_ROWS]; CONV_BANKS],
            word: zero_word,
            old_word: zero_word,
        }
    }

    /// 1 ステップ: 下段を埋めて畳み込み、上段・中段を新しいワードで更新する
    ///
    /// `wrd == words_per_image` のステップは新しいワードを持たない（押し出し用）。
    fn process_word(&mut self, filter: Filter, wrd: usize, out: &mut PartialSums) {
        let spl = self.width.slices_per_line() as isize;
        let first_wrd = wrd == 0;
        let last_wrd = wrd == self.width.words_per_image();
        let EdgeFlags { left, right } = self.edges;
        const ZERO_ROW: BankRow = [TwoBit::ZERO; CONV_COLS];

        // 下段: バンクを spl だけ左へずらす。はみ出す分は次のワードから取る
        for bank in 0..CONV_BANKS {
            let s_idx = bank as isize + spl - CONV_BANKS as isize;
            self.line[bank][CONV_ROWS - 1] = if s_idx < 0 {
                let src = &self.old_word[(CONV_BANKS as isize + s_idx) as usize];
                masked(src, left[bank], right[bank])
            } else if last_wrd {
                ZERO_ROW
            } else {
                masked(&self.word[s_idx as usize], left[bank], right[bank])
            };
        }

        for bank in 0..CONV_BANKS {
            for cc in 0..BANK_WIDTH {
                out[bank * BANK_WIDTH + cc] = conv3x3b(&self.line, filter, bank, cc);
            }
        }

        // 上段: バンクを spl だけ右へずらす。足りない分は前のワードの中段から
        for bank in 0..CONV_BANKS {
            let s_idx0 = bank as isize - spl;
            self.line[bank][0] = if s_idx0 >= 0 {
                masked(&self.word[s_idx0 as usize], left[bank], right[bank])
            } else if first_wrd {
                ZERO_ROW
            } else {
                let src = &self.old_word[(CONV_BANKS as isize + s_idx0) as usize];
                masked(src, left[bank], right[bank])
            };
            // 中段: 新しいワードそのもの
            self.line[bank][1] = masked(&self.word[bank], left[bank], right[bank]);
        }
    }

    /// 1 レーン分の全入力画像を流し、フェーズを畳み込んだ部分和を返す
    fn run(&mut self, plan: &LanePlan<'_>) -> Vec<PartialSums> {
        let wpi = self.width.words_per_image();
        let mut phase = vec![[0i32; WORD_SIZE]; plan.words_per_phase];
        let mut conv_out = [0i32; WORD_SIZE];

        let mut p = 0;
        while p < plan.n_images {
            let imgs = plan.images_per_phase.min(plan.n_images - p);
            for img in 0..imgs {
                let filter = plan.filter(p + img);
                for wrd in 0..=wpi {
                    let wrd_phase = img * wpi + wrd;
                    if wrd != wpi {
                        self.word = load_word(plan.input[(p * wpi) + wrd_phase]);
                    }
                    self.process_word(filter, wrd, &mut conv_out);
                    self.old_word = self.word;
                    if wrd > 0 {
                        for (acc, &s) in phase[wrd_phase - 1].iter_mut().zip(conv_out.iter()) {
                            *acc += s;
                        }
                    }
                }
            }
            p += imgs;
        }

        // 同じワード位置の画像スロットを畳み込む
        let (head, rest) = phase.split_at_mut(wpi);
        for chunk in rest.chunks(wpi) {
            for (acc, add) in head.iter_mut().zip(chunk) {
                for (a, &b) in acc.iter_mut().zip(add.iter()) {
                    *a += b;
                }
            }
        }
        phase.truncate(wpi);
        phase
    }
}

/// 1 レーン・1 出力チャネル分の入力とフィルタの所在
struct LanePlan<'a> {
    input: &'a [Word],
    lane: usize,
    n_images: usize,
    images_per_phase: usize,
    words_per_phase: usize,
    /// このチャネルの先頭フィルタのストア内番号
    first_filter: usize,
    stores: &'a Stores<'a>,
}

impl LanePlan<'_> {
    /// `k` 番目の入力画像に掛けるフィルタ
    fn filter(&self, k: usize) -> Filter {
        let idx = self.first_filter + k;
        let word = self.stores.weights.word(self.lane, idx / CONV_W_PER_WORD);
        layout::conv_filter(word, idx % CONV_W_PER_WORD)
    }
}

/// 1 出力チャネルの畳み込み和（全レーン・全入力チャネル合計）
fn conv_channel(
    stores: &Stores<'_>,
    fmap: &FeatureMapStore,
    input: Half,
    width: WidthMode,
    n_images: usize,
    first_filter: usize,
) -> Vec<PartialSums> {
    let wpi = width.words_per_image();
    let config = stores.config;
    let images_per_phase = config.pix_per_phase / (width.width() * width.width());

    let lanes: Vec<Vec<PartialSums>> = (0..config.lanes)
        .into_par_iter()
        .map(|lane| {
            let plan = LanePlan {
                input: fmap.lane(input, lane),
                lane,
                n_images,
                images_per_phase,
                words_per_phase: images_per_phase * wpi,
                first_filter,
                stores,
            };
            LaneConv::new(width).run(&plan)
        })
        .collect();

    let mut total = vec![[0i32; WORD_SIZE]; wpi];
    for lane in &lanes {
        for (acc, add) in total.iter_mut().zip(lane) {
            for (a, &b) in acc.iter_mut().zip(add.iter()) {
                *a += b;
            }
        }
    }
    total
}

/// 1 サブ呼び出し分の前提条件を検証する
fn validate(
    stores: &Stores<'_>,
    io: &FmapIo<'_>,
    ctx: &LayerContext,
    op: &Invocation,
) -> Result<usize> {
    let lanes = stores.config.lanes;
    if op.n_inputs % lanes != 0 {
        return Err(AccelError::InputsNotLaneAligned { n_inputs: op.n_inputs, lanes });
    }
    if op.norm == NormMode::None {
        return Err(AccelError::UnsupportedNormMode { kind: op.kind, mode: op.norm });
    }
    if op.norm.pools() && op.width == WidthMode::W8 && op.n_outputs % 4 != 0 {
        return Err(AccelError::PoolingNotQuarterAligned(op.n_outputs));
    }

    let wpi = op.width.words_per_image();
    let images = op.n_inputs / lanes;
    io.check_input(images * wpi)?;

    let last = ctx.output_cursor + op.n_outputs - 1;
    let last_offset = match (op.norm.pools(), op.width) {
        (true, WidthMode::W8) => (last / 4) / lanes,
        (true, _) => (last / lanes) * wpi / 4 + wpi / 4 - 1,
        (false, _) => (last / lanes) * wpi + wpi - 1,
    };
    io.check_output(last_offset)?;

    let first_filter = stores.weights.local_index(ctx.weight_cursor)?;
    let filters = first_filter + op.n_outputs * images;
    stores.check_weight_words(filters.div_ceil(CONV_W_PER_WORD))?;
    stores.check_thresholds(ctx.threshold_cursor, op.n_outputs, op.kind.thresholds_per_word())?;
    Ok(first_filter)
}

pub(super) fn run(
    stores: &Stores<'_>,
    io: FmapIo<'_>,
    ctx: &mut LayerContext,
    op: &Invocation,
) -> Result<()> {
    let mut first_filter = validate(stores, &io, ctx, op)?;
    let lanes = stores.config.lanes;
    let images = op.n_inputs / lanes;
    let wpi = op.width.words_per_image();

    for _ in 0..op.n_outputs {
        let kh = stores.thresholds.local_index(ctx.threshold_cursor)?;
        let nc = stores.thresholds.threshold(kh) as i32;
        let sums = conv_channel(stores, io.fmap, io.input, op.width, images, first_filter);
        first_filter += images;

        let o = ctx.output_cursor;
        let (bank_idx, bank_off) = (o % lanes, o / lanes);
        let mut poolword: Word = 0;
        for (w, word_sums) in sums.iter().enumerate() {
            let binword = binarize_word(word_sums, nc);
            match (op.norm, op.width) {
                (NormMode::ThresholdPool, WidthMode::W8) => {
                    ctx.pool_word = push_quarter(ctx.pool_word, pool_quarter(binword, op.width));
                    let addr = o / 4;
                    io.fmap.set_word(io.output, addr % lanes, addr / lanes, ctx.pool_word);
                }
                (NormMode::ThresholdPool, _) => {
                    let quarter = pool_quarter(binword, op.width) as Word;
                    poolword |= quarter << ((w % 4) * WORD_SIZE / 4);
                    if w % 4 == 3 {
                        let off = (bank_off * wpi + w) / 4;
                        io.fmap.set_word(io.output, bank_idx, off, poolword);
                        poolword = 0;
                    }
                }
                _ => {
                    io.fmap.set_word(io.output, bank_idx, bank_off * wpi + w, binword);
                }
            }
        }

        ctx.output_cursor += 1;
        ctx.threshold_cursor += 1;
        ctx.weight_cursor += images;
    }
    Ok(())
}
