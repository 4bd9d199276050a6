//! バッチサイズ探索

/// ストア容量から決まるバッチサイズの上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchBounds {
    /// 出力特徴マップが特徴マップストアに収まる上限
    pub fmap: usize,
    /// 重みスライスが重みストアに収まる上限
    pub weights: usize,
    /// 閾値スライスが閾値ストアに収まる上限
    pub thresholds: usize,
}

impl BatchBounds {
    /// 最も厳しい上限
    #[inline]
    pub fn tightest(&self) -> usize {
        self.fmap.min(self.weights).min(self.thresholds)
    }
}

/// 出力数 `n_outputs` を割り切り、どの上限も超えない最大のバッチサイズ
///
/// 特徴マップの上限（出力数で頭打ち）から始め、重み・閾値の上限まで縮め、
/// さらに `n_outputs` を割り切るまで 1 ずつ減らす。0 になれば `None`。
pub fn search_batch_size(n_outputs: usize, bounds: &BatchBounds) -> Option<usize> {
    let mut size = bounds.fmap.min(n_outputs);
    if size > bounds.weights {
        size = bounds.weights;
    }
    if size > bounds.thresholds {
        size = bounds.thresholds;
    }
    while size > 0 && n_outputs % size != 0 {
        size -= 1;
    }
    (size > 0).then_some(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bounds(fmap: usize, weights: usize, thresholds: usize) -> BatchBounds {
        BatchBounds { fmap, weights, thresholds }
    }

    #[test]
    fn test_natural_fit_above_outputs() {
        // 自然な上限 150 でも出力数 128 で頭打ち
        assert_eq!(search_batch_size(128, &bounds(150, 1000, 1000)), Some(128));
    }

    #[test]
    fn test_shrinks_to_divisor() {
        assert_eq!(search_batch_size(128, &bounds(150, 100, 1000)), Some(64));
        assert_eq!(search_batch_size(10, &bounds(4096, 7, 128)), Some(5));
        assert_eq!(search_batch_size(1024, &bounds(65536, 256, 256)), Some(256));
    }

    #[test]
    fn test_zero_bound_has_no_divisor() {
        assert_eq!(search_batch_size(128, &bounds(150, 0, 1000)), None);
        assert_eq!(search_batch_size(0, &bounds(150, 10, 10)), None);
    }

    proptest! {
        #[test]
        fn prop_result_divides_and_respects_bounds(
            n_outputs in 1usize..2048,
            fmap in 0usize..4096,
            weights in 0usize..4096,
            thresholds in 0usize..512,
        ) {
            let b = bounds(fmap, weights, thresholds);
            match search_batch_size(n_outputs, &b) {
                Some(size) => {
                    prop_assert!(size > 0);
                    prop_assert_eq!(n_outputs % size, 0);
                    prop_assert!(size <= b.tightest());
                    // より大きな約数は上限を超える
                    for larger in size + 1..=n_outputs.min(b.tightest()) {
                        prop_assert_ne!(n_outputs % larger, 0);
                    }
                }
                None => prop_assert_eq!(b.tightest().min(n_outputs), 0),
            }
        }
    }
}
