//! 正規化とプーリング
//!
//! 和を閾値と比べて出力ビットにし（0 = +1、1 = -1）、必要なら
//! 二値化後のマップを 2x2 の AND でプーリングする。
//! AND は 0/1 符号化の上での論理積で、1 ビットでも -1 があれば -1 になる。

use crate::constants::{WORD_SIZE, Word};
use crate::engine::WidthMode;
use crate::word::{bit, with_bit};

/// 閾値判定: 和が閾値以上なら通過（0）、未満なら反転（1）
#[inline]
pub const fn binarize(sum: i32, threshold: i32) -> bool {
    sum < threshold
}

/// 64 個の和を 1 ワードに二値化する
pub fn binarize_word(sums: &[i32; WORD_SIZE], threshold: i32) -> Word {
    sums.iter()
        .enumerate()
        .fold(0, |w, (i, &s)| with_bit(w, i as u32, binarize(s, threshold)))
}

/// 二値化済みワード 1 個を 2x2 AND プーリングし、16bit を返す
///
/// ワードは行優先に `64 / width` 行を含み、出力は `32 / width` 行 × `width / 2` 列。
pub fn pool_quarter(binword: Word, width: WidthMode) -> u16 {
    let lw = width.log_width();
    let half_width = width.width() / 2;

    // 水平方向: 隣り合う 2 ピクセル
    let mut horizontal: u32 = 0;
    for i in 0..WORD_SIZE / 2 {
        let h = bit(binword, 2 * i as u32) & bit(binword, 2 * i as u32 + 1);
        horizontal |= (h as u32) << i;
    }

    // 垂直方向: 上下 2 行
    let mut pooled: u16 = 0;
    for i in 0..WORD_SIZE / 4 {
        let i0 = ((i >> (lw - 1)) << lw) + (i & (half_width - 1));
        let i1 = i0 + half_width;
        let v = (horizontal >> i0) & (horizontal >> i1) & 1;
        pooled |= (v as u16) << i;
    }
    pooled
}

/// 幅 8 のプーリング出力を作業ワードへ押し込む
///
/// 1 チャネル分の 16bit を上位に入れ、既存の内容を 16bit 右へ送る。
/// 4 チャネルで 1 ワードが埋まり、チャネル 4k が下位 16bit に来る。
#[inline]
pub const fn push_quarter(carry: Word, quarter: u16) -> Word {
    (carry >> (WORD_SIZE / 4)) | ((quarter as Word) << (3 * WORD_SIZE / 4))
}
