//! アクセラレータ定数定義
//!
//! ワード幅・フィルタのパッキング幅・ラインバッファ形状と、
//! 各オンチップストアの既定容量。

/// パック済みビットの格納・転送単位
pub type Word = u64;

// =============================================================================
// ワードとパッキング
// =============================================================================

/// 1ワードのビット数
pub const WORD_SIZE: usize = 64;

/// 3x3 二値フィルタ 1 個のビット数
pub const WT_SIZE: usize = 9;

/// 二値畳み込み層: 1ワードあたりのフィルタ数（63bit 使用、最上位 1bit は未使用）
pub const CONV_W_PER_WORD: usize = 7;

/// 第1層: 1ワードあたりのフィルタ数（入力3チャネル分）
pub const CONV1_W_PER_WORD: usize = 3;

/// 中間層: 1ワードあたりの閾値数（16bit × 4）
pub const KH_PER_WORD: usize = 4;

/// 最終層: 1ワードあたりの (scale, bias) ペア数
pub const LAST_KH_PER_WORD: usize = 2;

/// 閾値・スケール・バイアス 1 個のビット幅
pub const KH_BITS: u32 = 16;

// =============================================================================
// ラインバッファ形状
// =============================================================================

/// カーネル幅
pub const K: usize = 3;

/// 1バンクのピクセル数
pub const BANK_WIDTH: usize = 8;

/// log2(BANK_WIDTH)
pub const LOG_BANK_WIDTH: usize = 3;

/// ラインバッファの行数
pub const CONV_ROWS: usize = 3;

/// ラインバッファの列数（左右のパディング列を含む）
pub const CONV_COLS: usize = BANK_WIDTH + 2;

/// 1ワードに含まれるバンク数
pub const CONV_BANKS: usize = WORD_SIZE / BANK_WIDTH;

// =============================================================================
// 第1層（実数値入力）
// =============================================================================

/// 第1層の入力チャネル数
pub const CONV1_CHANNELS: usize = 3;

/// 第1層の画像幅
pub const CONV1_WIDTH: usize = 32;

/// 第1層の出力 1 チャネルあたりのワード数（32x32 / 64）
pub const CONV1_OUT_WORDS: usize = CONV1_WIDTH * CONV1_WIDTH / WORD_SIZE;

/// 入力ピクセルのビット幅（符号付き Q2.18）
pub const C1_INPUT_BITS: u32 = 20;

/// 入力ピクセルの小数部ビット数
pub const C1_INPUT_FRAC: u32 = 18;

/// 第1層の閾値の小数部ビット数（Q4.12）
pub const C1_COMP_FRAC: u32 = 12;

// =============================================================================
// 最終層のスコア
// =============================================================================

/// scale の小数部ビット数（Q2.14）
pub const SCALE_FRAC: u32 = 14;

/// bias の小数部ビット数（Q4.12）
pub const BIAS_FRAC: u32 = 12;

/// scale が 0 のときに用いる飽和閾値
pub const THRESH_SATURATION: i32 = 32767;

// =============================================================================
// 既定容量
// =============================================================================

/// 既定の並列レーン数
pub const DEFAULT_LANES: usize = 2;

/// 重みストアの容量を決めるフィルタ数
pub const WT_L: usize = 16 * 4 * 512;

/// 既定の 1 レーンあたり重みワード数
pub const DEFAULT_WEIGHT_WORDS_PER_LANE: usize =
    WT_L.div_ceil(CONV_W_PER_WORD).div_ceil(DEFAULT_LANES); // 2341

/// 既定の閾値ストアのワード数
pub const DEFAULT_THRESHOLD_WORDS: usize = WT_L / 128 * 16 / WORD_SIZE; // 64

/// 既定の特徴マップストアのワード数（ダブルバッファの片側）
pub const DEFAULT_FMAP_WORDS: usize = 128 * 32 * 32 / WORD_SIZE; // 2048

/// 既定のフェーズあたりピクセル数
pub const DEFAULT_PIX_PER_PHASE: usize = 2 * 32 * 32;

/// 対応する最大画像幅
pub const MAX_WIDTH: usize = 32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacities() {
        assert_eq!(DEFAULT_WEIGHT_WORDS_PER_LANE, 2341);
        assert_eq!(DEFAULT_THRESHOLD_WORDS, 64);
        assert_eq!(DEFAULT_FMAP_WORDS, 2048);
        assert_eq!(CONV_COLS, 10);
        assert_eq!(CONV_BANKS, 8);
        assert!(CONV_W_PER_WORD * WT_SIZE < WORD_SIZE);
    }
}
