//! 9 層ネットワーク全体の推論

mod common;

use bnn_accel::network::LAYERS;
use bnn_accel::{AccelConfig, LayerKind, LayerParams, Network, reference};
use common::{random_image, random_params, rng};

fn zero_params() -> Vec<LayerParams> {
    LAYERS
        .iter()
        .map(|l| LayerParams {
            weights: vec![0; l.weight_words()],
            thresholds: vec![0; l.threshold_words()],
        })
        .collect()
}

#[test]
fn test_default_schedules() {
    let params = zero_params();
    let network = Network::new(AccelConfig::default(), &params).unwrap();
    assert_eq!(*network.accelerator().config(), AccelConfig::default());
    let batches: Vec<usize> = network.schedules().iter().map(|s| s.batch_size).collect();
    assert_eq!(batches, vec![128, 128, 256, 128, 128, 64, 32, 256, 10]);
}

#[test]
fn test_config_from_file() {
    let path = std::env::temp_dir().join(format!("bnn-accel-{}.toml", std::process::id()));
    std::fs::write(&path, "lanes = 4\nfmap_words = 4096\n").unwrap();
    let config = AccelConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(config.lanes, 4);
    assert_eq!(config.fmap_words_per_lane(), 1024);
    assert!(AccelConfig::load(&path).is_err());
}

/// 全層ゼロのパラメータでは全クラスのスコアが 0 で並び、番号 0 が選ばれる
///
/// 全層を素朴にシミュレートするため時間がかかる。
/// 実行方法: `cargo test -p bnn-accel --release -- --ignored`
#[test]
#[ignore]
fn test_zero_network_predicts_first_class() {
    common::init_logger();
    let params = zero_params();
    let mut network = Network::new(AccelConfig::default(), &params).unwrap();
    let mut rng = rng(1);
    assert_eq!(network.predict(&random_image(&mut rng)).unwrap(), 0);
}

/// 乱数パラメータの全層推論が参照実装の連鎖と一致する
///
/// 実行方法: `cargo test -p bnn-accel --release -- --ignored`
#[test]
#[ignore]
fn test_random_network_matches_reference() {
    common::init_logger();
    let mut rng = rng(9);
    let params: Vec<_> = LAYERS.iter().map(|l| random_params(&mut rng, l)).collect();
    let image = random_image(&mut rng);

    let mut act = image.clone();
    let mut expected = -1;
    for (layer, (wt, kh)) in LAYERS.iter().zip(&params) {
        let (n_in, n_out) = (layer.n_inputs, layer.n_outputs);
        match layer.kind {
            LayerKind::FirstConv => act = reference::first_conv(&act, wt, kh, n_out),
            LayerKind::BinConv => {
                act = reference::bin_conv(&act, wt, kh, n_in, n_out, layer.width, layer.pool)
            }
            LayerKind::Dense => act = reference::dense(&act, wt, kh, n_in, n_out),
            LayerKind::Last => expected = reference::classify(&act, wt, kh, n_in, n_out),
        }
    }

    let params: Vec<LayerParams> = params
        .into_iter()
        .map(|(weights, thresholds)| LayerParams { weights, thresholds })
        .collect();
    let mut network = Network::new(AccelConfig::default(), &params).unwrap();
    assert_eq!(network.predict(&image).unwrap(), expected);
}
