//! パック済みレイアウトのアクセサ
//!
//! 重み・閾値・入力ピクセルはそれぞれ固有の形でワードに詰められている。
//! レイアウトごとに読み出し／書き込み関数を 1 組ずつ用意し、
//! エンジン・スケジューラ・パッカーはこれらだけを通してフィールドに触れる。
//!
//! | レイアウト | 1ワードあたり | フィールド |
//! |---|---|---|
//! | 二値畳み込みフィルタ | 7 | 9bit × 7（bit 63 未使用） |
//! | 第1層フィルタ | 3 | 9bit × 3（入力チャネル順） |
//! | 中間層閾値 | 4 | 符号付き 16bit × 4 |
//! | 最終層 scale/bias | 2 | (Q2.14, Q4.12) × 2 |
//! | 第1層入力ピクセル | 3 | 符号付き Q2.18 20bit × 3 |

use crate::constants::{
    C1_INPUT_BITS, CONV_W_PER_WORD, CONV1_W_PER_WORD, K, KH_BITS, KH_PER_WORD, LAST_KH_PER_WORD,
    WT_SIZE, Word,
};
use crate::word::{bit, field, signed_field, with_field};

/// 3x3 二値フィルタ（9bit）
///
/// タップはカーネルを反転した順で格納される。
/// ウィンドウ位置 (kr, kc) に掛かる重みは bit `8 - (kr*3 + kc)`。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Filter(u16);

impl Filter {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & ((1 << WT_SIZE) - 1))
    }

    #[inline]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// ウィンドウ位置 (kr, kc) の重みビット（1 = 符号反転）
    #[inline]
    pub const fn weight_at(self, kr: usize, kc: usize) -> bool {
        (self.0 >> (K * K - 1 - (kr * K + kc))) & 1 != 0
    }
}

#[inline]
fn filter_at(word: Word, slot: usize) -> Filter {
    Filter::from_bits(field(word, (slot * WT_SIZE) as u32, WT_SIZE as u32) as u16)
}

#[inline]
fn with_filter_at(word: Word, slot: usize, filter: Filter) -> Word {
    with_field(word, (slot * WT_SIZE) as u32, WT_SIZE as u32, filter.bits() as Word)
}

/// 二値畳み込み層: ワード内 `slot` 番目（0..7）のフィルタ
#[inline]
pub fn conv_filter(word: Word, slot: usize) -> Filter {
    debug_assert!(slot < CONV_W_PER_WORD);
    filter_at(word, slot)
}

#[inline]
pub fn with_conv_filter(word: Word, slot: usize, filter: Filter) -> Word {
    debug_assert!(slot < CONV_W_PER_WORD);
    with_filter_at(word, slot, filter)
}

/// 第1層: 入力チャネル `channel` のフィルタ
#[inline]
pub fn conv1_filter(word: Word, channel: usize) -> Filter {
    debug_assert!(channel < CONV1_W_PER_WORD);
    filter_at(word, channel)
}

#[inline]
pub fn with_conv1_filter(word: Word, channel: usize, filter: Filter) -> Word {
    debug_assert!(channel < CONV1_W_PER_WORD);
    with_filter_at(word, channel, filter)
}

/// 中間層: `slot` 番目（0..4）の 16bit 閾値
///
/// 第1層では Q4.12、それ以外の層では整数として解釈する。
#[inline]
pub fn threshold(word: Word, slot: usize) -> i16 {
    debug_assert!(slot < KH_PER_WORD);
    signed_field(word, slot as u32 * KH_BITS, KH_BITS) as i16
}

#[inline]
pub fn with_threshold(word: Word, slot: usize, value: i16) -> Word {
    debug_assert!(slot < KH_PER_WORD);
    with_field(word, slot as u32 * KH_BITS, KH_BITS, value as u16 as Word)
}

/// 最終層の (scale, bias) ペア（生の固定小数点値）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScaleBias {
    /// Q2.14
    pub scale: i16,
    /// Q4.12
    pub bias: i16,
}

/// 最終層: `slot` 番目（0..2）の (scale, bias)
#[inline]
pub fn scale_bias(word: Word, slot: usize) -> ScaleBias {
    debug_assert!(slot < LAST_KH_PER_WORD);
    let base = slot as u32 * 2 * KH_BITS;
    ScaleBias {
        scale: signed_field(word, base, KH_BITS) as i16,
        bias: signed_field(word, base + KH_BITS, KH_BITS) as i16,
    }
}

#[inline]
pub fn with_scale_bias(word: Word, slot: usize, value: ScaleBias) -> Word {
    debug_assert!(slot < LAST_KH_PER_WORD);
    let base = slot as u32 * 2 * KH_BITS;
    let word = with_field(word, base, KH_BITS, value.scale as u16 as Word);
    with_field(word, base + KH_BITS, KH_BITS, value.bias as u16 as Word)
}

/// 第1層入力: チャネル `channel` の Q2.18 ピクセル（生の値）
#[inline]
pub fn input_pixel(word: Word, channel: usize) -> i32 {
    signed_field(word, channel as u32 * C1_INPUT_BITS, C1_INPUT_BITS) as i32
}

#[inline]
pub fn with_input_pixel(word: Word, channel: usize, raw: i32) -> Word {
    with_field(word, channel as u32 * C1_INPUT_BITS, C1_INPUT_BITS, raw as u32 as Word)
}

/// 活性ワード内のピクセルビット（1 = -1）
#[inline]
pub fn activation(word: Word, offset: usize) -> bool {
    bit(word, offset as u32)
}
