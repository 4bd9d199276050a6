//! アクセラレータ構成
//!
//! オンチップストアの固定容量とレーン数。TOML から読み込める。
//!
//! ```toml
//! lanes = 2
//! weight_words_per_lane = 2341
//! threshold_words = 64
//! fmap_words = 2048
//! pix_per_phase = 2048
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CONV1_WIDTH, CONV_W_PER_WORD, DEFAULT_FMAP_WORDS, DEFAULT_LANES, DEFAULT_PIX_PER_PHASE,
    DEFAULT_THRESHOLD_WORDS, DEFAULT_WEIGHT_WORDS_PER_LANE, MAX_WIDTH, WORD_SIZE,
};
use crate::error::{AccelError, Result};

/// ストア容量とレーン数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccelConfig {
    /// 並列レーン（畳み込み器）数
    pub lanes: usize,
    /// 1 レーンあたりの重みワード数
    pub weight_words_per_lane: usize,
    /// 閾値ストアのワード数
    pub threshold_words: usize,
    /// 特徴マップストア片側のワード数（全レーン合計）
    pub fmap_words: usize,
    /// 二値畳み込みの 1 フェーズで処理するピクセル数
    pub pix_per_phase: usize,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            lanes: DEFAULT_LANES,
            weight_words_per_lane: DEFAULT_WEIGHT_WORDS_PER_LANE,
            threshold_words: DEFAULT_THRESHOLD_WORDS,
            fmap_words: DEFAULT_FMAP_WORDS,
            pix_per_phase: DEFAULT_PIX_PER_PHASE,
        }
    }
}

impl AccelConfig {
    /// TOML 文字列から読み込み、検証する
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| AccelError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// TOML ファイルから読み込み、検証する
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// 容量の整合性を検証する
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(AccelError::InvalidConfig(msg));
        if self.lanes == 0 {
            return invalid("lanes must be nonzero".into());
        }
        if self.weight_words_per_lane == 0 || self.threshold_words == 0 {
            return invalid("weight and threshold stores must be nonzero".into());
        }
        if self.fmap_words == 0 || self.fmap_words % self.lanes != 0 {
            return invalid(format!(
                "fmap_words {} must be a nonzero multiple of lanes {}",
                self.fmap_words, self.lanes
            ));
        }
        if self.pix_per_phase % WORD_SIZE != 0 || self.pix_per_phase < MAX_WIDTH * MAX_WIDTH {
            return invalid(format!(
                "pix_per_phase {} must be a multiple of {} holding at least one {}x{} image",
                self.pix_per_phase, WORD_SIZE, MAX_WIDTH, MAX_WIDTH
            ));
        }
        Ok(())
    }

    /// 重みストア全体のワード数
    #[inline]
    pub fn weight_words(&self) -> usize {
        self.lanes * self.weight_words_per_lane
    }

    /// 特徴マップストア片側の 1 レーンあたりワード数
    #[inline]
    pub fn fmap_words_per_lane(&self) -> usize {
        self.fmap_words / self.lanes
    }

    /// 特徴マップストア片側のビット数
    #[inline]
    pub fn fmap_bits(&self) -> usize {
        self.fmap_words * WORD_SIZE
    }

    /// 1 フェーズの部分和バッファのワード数
    #[inline]
    pub fn words_per_phase(&self) -> usize {
        self.pix_per_phase / WORD_SIZE
    }

    /// 重みストアに載る二値畳み込みフィルタの数
    #[inline]
    pub fn conv_filters(&self) -> usize {
        self.weight_words() * CONV_W_PER_WORD
    }

    /// 第1層の入力画像が特徴マップストアに収まるか
    #[inline]
    pub fn fits_first_layer_input(&self) -> bool {
        CONV1_WIDTH * CONV1_WIDTH <= self.fmap_words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = AccelConfig::default();
        config.validate().unwrap();
        assert_eq!(config.weight_words(), 4682);
        assert_eq!(config.fmap_words_per_lane(), 1024);
        assert_eq!(config.words_per_phase(), 32);
        assert!(config.fits_first_layer_input());
    }

    #[test]
    fn test_from_toml_partial_overrides() {
        let config = AccelConfig::from_toml_str("lanes = 4\nthreshold_words = 8\n").unwrap();
        assert_eq!(config.lanes, 4);
        assert_eq!(config.threshold_words, 8);
        assert_eq!(config.fmap_words, DEFAULT_FMAP_WORDS);
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        assert!(matches!(
            AccelConfig::from_toml_str("lanes = 0"),
            Err(AccelError::InvalidConfig(_))
        ));
        assert!(matches!(
            AccelConfig::from_toml_str("lanes = 3"),
            Err(AccelError::InvalidConfig(_))
        ));
        assert!(matches!(
            AccelConfig::from_toml_str("pix_per_phase = 100"),
            Err(AccelError::InvalidConfig(_))
        ));
        assert!(matches!(
            AccelConfig::from_toml_str("unknown_key = 1"),
            Err(AccelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AccelConfig { lanes: 1, weight_words_per_lane: 3, ..Default::default() };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(AccelConfig::from_toml_str(&text).unwrap(), config);
    }
}
