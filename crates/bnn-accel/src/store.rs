//! オンチップストア
//!
//! - `FeatureMapStore`: ping/pong の 2 領域からなる特徴マップのダブルバッファ。
//!   各領域はレーンごとのワード配列。
//! - `WeightStore`: レーンごとのパック済みフィルタ重み。
//! - `ThresholdStore`: パック済み閾値（または scale/bias）。
//!
//! 重み・閾値はスケジュールエントリのスライスから丸ごと詰め替えられる。
//! スライスは自分の先頭要素の層内通し番号（`base`）を持ち、
//! エンジンは層スコープのカーソルから `base` を引いてストア内を指す。

use crate::config::AccelConfig;
use crate::constants::Word;
use crate::error::{AccelError, Result};
use crate::layout::{self, ScaleBias};

/// ダブルバッファの領域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Half {
    Ping,
    Pong,
}

impl Half {
    /// `dmem_mode` ビットから領域を選ぶ（0 = Ping）
    #[inline]
    pub const fn from_mode(mode: usize) -> Self {
        if mode % 2 == 0 { Half::Ping } else { Half::Pong }
    }

    /// 反対側の領域
    #[inline]
    pub const fn other(self) -> Self {
        match self {
            Half::Ping => Half::Pong,
            Half::Pong => Half::Ping,
        }
    }

    #[inline]
    const fn index(self) -> usize {
        match self {
            Half::Ping => 0,
            Half::Pong => 1,
        }
    }
}

/// 外部ワード列と特徴マップストアの対応
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmapLayout {
    /// 画像単位のインターリーブ: 画像 i はレーン i mod L、オフセット (i div L)·wpi
    Images { words_per_image: usize },
    /// レーン 0 から順に線形に埋める
    Linear,
    /// ワード単位のインターリーブ: ワード i はレーン i mod L、オフセット i div L
    Interleaved,
}

impl FmapLayout {
    /// 外部ワード番号 → (レーン, レーン内オフセット)
    #[inline]
    pub fn locate(self, index: usize, lanes: usize, words_per_lane: usize) -> (usize, usize) {
        match self {
            FmapLayout::Images { words_per_image } => {
                let img = index / words_per_image;
                let off = index % words_per_image;
                (img % lanes, (img / lanes) * words_per_image + off)
            }
            FmapLayout::Linear => (index / words_per_lane, index % words_per_lane),
            FmapLayout::Interleaved => (index % lanes, index / lanes),
        }
    }
}

/// 特徴マップのダブルバッファ
#[derive(Debug, Clone)]
pub struct FeatureMapStore {
    lanes: usize,
    words_per_lane: usize,
    halves: [Vec<Word>; 2],
}

impl FeatureMapStore {
    pub fn new(config: &AccelConfig) -> Self {
        let words = config.fmap_words;
        Self {
            lanes: config.lanes,
            words_per_lane: config.fmap_words_per_lane(),
            halves: [vec![0; words], vec![0; words]],
        }
    }

    #[inline]
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    #[inline]
    pub fn words_per_lane(&self) -> usize {
        self.words_per_lane
    }

    /// 1 レーン分のワード列
    #[inline]
    pub fn lane(&self, half: Half, lane: usize) -> &[Word] {
        let start = lane * self.words_per_lane;
        &self.halves[half.index()][start..start + self.words_per_lane]
    }

    #[inline]
    pub fn word(&self, half: Half, lane: usize, offset: usize) -> Word {
        self.halves[half.index()][lane * self.words_per_lane + offset]
    }

    #[inline]
    pub fn set_word(&mut self, half: Half, lane: usize, offset: usize, value: Word) {
        self.halves[half.index()][lane * self.words_per_lane + offset] = value;
    }

    /// 外部ワード列を `half` に配置する
    pub fn load(&mut self, half: Half, layout: FmapLayout, words: &[Word]) -> Result<()> {
        self.check_extent(layout, words.len(), true)?;
        for (i, &w) in words.iter().enumerate() {
            let (lane, off) = layout.locate(i, self.lanes, self.words_per_lane);
            self.set_word(half, lane, off, w);
        }
        Ok(())
    }

    /// `half` から外部ワード列を取り出す
    pub fn drain(&self, half: Half, layout: FmapLayout, n_words: usize) -> Result<Vec<Word>> {
        self.check_extent(layout, n_words, false)?;
        Ok((0..n_words)
            .map(|i| {
                let (lane, off) = layout.locate(i, self.lanes, self.words_per_lane);
                self.word(half, lane, off)
            })
            .collect())
    }

    /// 両領域をゼロクリアする
    pub fn clear(&mut self) {
        for half in &mut self.halves {
            half.fill(0);
        }
    }

    fn check_extent(&self, layout: FmapLayout, n_words: usize, input: bool) -> Result<()> {
        let capacity = self.lanes * self.words_per_lane;
        // 画像インターリーブは最後の画像の行き先がレーン末尾を超えうる
        let fits = match layout {
            FmapLayout::Images { words_per_image } => {
                let images = n_words.div_ceil(words_per_image);
                images.div_ceil(self.lanes) * words_per_image <= self.words_per_lane
            }
            FmapLayout::Linear | FmapLayout::Interleaved => n_words <= capacity,
        };
        if fits {
            Ok(())
        } else if input {
            Err(AccelError::InputTooLarge { required: n_words, capacity })
        } else {
            Err(AccelError::OutputTooLarge { required: n_words, capacity })
        }
    }
}

/// 1 サブ呼び出し分の重み
///
/// `words` はストアへの転送順（ワード i → レーン i mod L、オフセット i div L）。
/// `base` はこのスライスの先頭要素の層内通し番号。要素の単位は層の種類で異なる
/// （二値畳み込み: レーンあたりのフィルタ、第1層: 出力チャネル、全結合: ワード）。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightSlice {
    pub words: Vec<Word>,
    pub base: usize,
}

/// 1 サブ呼び出し分の閾値
///
/// `base` は先頭ワードの最初の値の層内通し番号。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThresholdSlice {
    pub words: Vec<Word>,
    pub base: usize,
}

/// レーンごとの重みストア
#[derive(Debug, Clone)]
pub struct WeightStore {
    lanes: usize,
    words_per_lane: usize,
    words: Vec<Word>,
    base: usize,
}

impl WeightStore {
    pub fn new(config: &AccelConfig) -> Self {
        Self {
            lanes: config.lanes,
            words_per_lane: config.weight_words_per_lane,
            words: vec![0; config.weight_words()],
            base: 0,
        }
    }

    /// スライスを詰め替える。容量を超える場合は何も書かない。
    pub fn load(&mut self, slice: &WeightSlice) -> Result<()> {
        let required = slice.words.len().div_ceil(self.lanes);
        if required > self.words_per_lane {
            return Err(AccelError::WeightOverflow { required, capacity: self.words_per_lane });
        }
        self.words.fill(0);
        for (i, &w) in slice.words.iter().enumerate() {
            self.words[(i % self.lanes) * self.words_per_lane + i / self.lanes] = w;
        }
        self.base = slice.base;
        Ok(())
    }

    #[inline]
    pub fn words_per_lane(&self) -> usize {
        self.words_per_lane
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    #[inline]
    pub fn word(&self, lane: usize, offset: usize) -> Word {
        self.words[lane * self.words_per_lane + offset]
    }

    /// 層内カーソル → ストア内の要素番号
    pub(crate) fn local_index(&self, cursor: usize) -> Result<usize> {
        cursor.checked_sub(self.base).ok_or(AccelError::CursorBeforeSlice {
            store: "weight",
            cursor,
            base: self.base,
        })
    }
}

/// 閾値ストア
#[derive(Debug, Clone)]
pub struct ThresholdStore {
    words: Vec<Word>,
    base: usize,
}

impl ThresholdStore {
    pub fn new(config: &AccelConfig) -> Self {
        Self { words: vec![0; config.threshold_words], base: 0 }
    }

    /// スライスを詰め替える。容量を超える場合は何も書かない。
    pub fn load(&mut self, slice: &ThresholdSlice) -> Result<()> {
        if slice.words.len() > self.words.len() {
            return Err(AccelError::ThresholdOverflow {
                required: slice.words.len(),
                capacity: self.words.len(),
            });
        }
        self.words.fill(0);
        self.words[..slice.words.len()].copy_from_slice(&slice.words);
        self.base = slice.base;
        Ok(())
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// ストア内 `index` 番目の 16bit 閾値
    #[inline]
    pub fn threshold(&self, index: usize) -> i16 {
        let per_word = crate::constants::KH_PER_WORD;
        layout::threshold(self.words[index / per_word], index % per_word)
    }

    /// ストア内 `index` 番目の (scale, bias)
    #[inline]
    pub fn scale_bias(&self, index: usize) -> ScaleBias {
        let per_word = crate::constants::LAST_KH_PER_WORD;
        layout::scale_bias(self.words[index / per_word], index % per_word)
    }

    /// 層内カーソル → ストア内の値番号
    pub(crate) fn local_index(&self, cursor: usize) -> Result<usize> {
        cursor.checked_sub(self.base).ok_or(AccelError::CursorBeforeSlice {
            store: "threshold",
            cursor,
            base: self.base,
        })
    }
}
