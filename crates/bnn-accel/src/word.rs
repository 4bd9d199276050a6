//! ワードコーデック
//!
//! パック済みワード列に対するビット・ビットフィールドの読み書きと、
//! 二値活性の 2bit 符号化、並列ビットカウント。
//! 生のシフト・マスク演算はこのモジュールと `layout` に閉じ込める。

use crate::constants::{WORD_SIZE, Word};

const M1: Word = 0x5555_5555_5555_5555;
const M2: Word = 0x3333_3333_3333_3333;
const M4: Word = 0x0f0f_0f0f_0f0f_0f0f;

/// 大域ビット番号 → (ワード番号, ワード内オフセット)
#[inline]
pub const fn bit_position(index: usize) -> (usize, u32) {
    (index / WORD_SIZE, (index % WORD_SIZE) as u32)
}

/// `n` ビットを格納するのに必要なワード数
#[inline]
pub const fn words_for_bits(n: usize) -> usize {
    n.div_ceil(WORD_SIZE)
}

/// ワード内の 1 ビット
#[inline]
pub const fn bit(word: Word, offset: u32) -> bool {
    (word >> offset) & 1 != 0
}

/// ワード内の 1 ビットを書き換えたワードを返す
#[inline]
pub const fn with_bit(word: Word, offset: u32, value: bool) -> Word {
    (word & !(1 << offset)) | ((value as Word) << offset)
}

/// ワード列の大域ビット番号 `index` を読む
#[inline]
pub fn get_bit(words: &[Word], index: usize) -> bool {
    let (w, off) = bit_position(index);
    bit(words[w], off)
}

/// ワード列の大域ビット番号 `index` を書く
#[inline]
pub fn set_bit(words: &mut [Word], index: usize, value: bool) {
    let (w, off) = bit_position(index);
    words[w] = with_bit(words[w], off, value);
}

#[inline]
const fn field_mask(width: u32) -> Word {
    if width as usize >= WORD_SIZE { Word::MAX } else { (1 << width) - 1 }
}

/// `offset` から `width` ビットの符号なしフィールド
#[inline]
pub const fn field(word: Word, offset: u32, width: u32) -> Word {
    (word >> offset) & field_mask(width)
}

/// `offset` から `width` ビットの符号付きフィールド（符号拡張）
#[inline]
pub const fn signed_field(word: Word, offset: u32, width: u32) -> i64 {
    let shift = WORD_SIZE as u32 - width;
    ((field(word, offset, width) << shift) as i64) >> shift
}

/// `offset` から `width` ビットを `value` の下位ビットで置き換える
#[inline]
pub const fn with_field(word: Word, offset: u32, width: u32, value: Word) -> Word {
    let mask = field_mask(width) << offset;
    (word & !mask) | ((value << offset) & mask)
}

/// 並列ビットカウント（マスク・シフト・加算の木）
#[inline]
pub const fn popcount(word: Word) -> u32 {
    let mut x = word;
    x -= (x >> 1) & M1;
    x = (x & M2) + ((x >> 2) & M2);
    x = (x + (x >> 4)) & M4;
    x += x >> 8;
    x += x >> 16;
    x += x >> 32;
    (x & 0x7f) as u32
}

/// 三値ピクセルの 2bit 表現
///
/// bit0 = 値ビット（非ゼロ）、bit1 = 符号ビット。
/// `00` = 0（パディング）、`01` = +1、`11` = -1。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TwoBit(u8);

impl TwoBit {
    pub const ZERO: Self = Self(0b00);
    pub const PLUS: Self = Self(0b01);
    pub const MINUS: Self = Self(0b11);

    /// 重みビットが 1 のとき符号を反転する
    ///
    /// ゼロは値ビットが立っていないので反転されない。
    #[inline]
    pub const fn flip(self, wt: bool) -> Self {
        Self(self.0 ^ (((wt as u8) & self.0) << 1))
    }

    /// 2bit の 2 の補数として符号拡張した値
    #[inline]
    pub const fn value(self) -> i32 {
        (((self.0 << 6) as i8) >> 6) as i32
    }
}

/// 活性ビットの符号化: 0 → +1, 1 → -1
#[inline]
pub const fn encode_bit(b: bool) -> TwoBit {
    if b { TwoBit::MINUS } else { TwoBit::PLUS }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bit_roundtrip_across_words() {
        let mut words = vec![0; 3];
        for idx in [0, 1, 63, 64, 127, 128, 191] {
            set_bit(&mut words, idx, true);
            assert!(get_bit(&words, idx), "bit {idx}");
        }
        assert_eq!(words[0], 0x8000_0000_0000_0003);
        assert_eq!(words[1], 0x8000_0000_0000_0001);
        set_bit(&mut words, 63, false);
        assert_eq!(words[0], 0x3);
    }

    #[test]
    fn test_field_boundaries() {
        let w = with_field(0, 48, 16, 0xabcd);
        assert_eq!(field(w, 48, 16), 0xabcd);
        assert_eq!(field(w, 0, 48), 0);
        assert_eq!(with_field(Word::MAX, 0, 64, 5), 5);
        // 幅を超える上位ビットは捨てる
        assert_eq!(with_field(0, 9, 9, 0x3ff), 0x1ff << 9);
    }

    #[test]
    fn test_signed_field_sign_extension() {
        let w = with_field(0, 20, 20, 0xf_ffff);
        assert_eq!(signed_field(w, 20, 20), -1);
        let w = with_field(0, 16, 16, 0x7fff);
        assert_eq!(signed_field(w, 16, 16), 32767);
        let w = with_field(0, 48, 16, 0x8000);
        assert_eq!(signed_field(w, 48, 16), -32768);
    }

    #[test]
    fn test_two_bit_encoding() {
        assert_eq!(encode_bit(false).value(), 1);
        assert_eq!(encode_bit(true).value(), -1);
        assert_eq!(TwoBit::ZERO.value(), 0);
        assert_eq!(TwoBit::PLUS.flip(true), TwoBit::MINUS);
        assert_eq!(TwoBit::MINUS.flip(true), TwoBit::PLUS);
        assert_eq!(TwoBit::ZERO.flip(true), TwoBit::ZERO);
        assert_eq!(TwoBit::MINUS.flip(false), TwoBit::MINUS);
    }

    proptest! {
        #[test]
        fn prop_popcount_matches_count_ones(x in any::<u64>()) {
            prop_assert_eq!(popcount(x), x.count_ones());
        }

        #[test]
        fn prop_field_roundtrip(word in any::<u64>(), offset in 0u32..48, value in any::<u64>()) {
            let w = with_field(word, offset, 16, value);
            prop_assert_eq!(field(w, offset, 16), value & 0xffff);
            // 対象外のビットは変わらない
            let mask = 0xffffu64 << offset;
            prop_assert_eq!(w & !mask, word & !mask);
        }
    }
}
