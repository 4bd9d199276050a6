//! # bnn-accel
//!
//! 二値化 CNN のストリーミング推論エンジンとバッチスケジューラ。
//!
//! ## モジュール構成
//!
//! - `constants`, `word`, `layout`: ワードとパック形式
//! - `config`: ストア容量とレーン数
//! - `store`: 特徴マップのダブルバッファ、重み・閾値ストア
//! - `context`: サブ呼び出しをまたぐ層スコープのカーソル
//! - `engine`: 第1層畳み込み・二値畳み込み・全結合・最終層
//! - `schedule`: 層をストアに収まるサブ呼び出しへ分割
//! - `pack`: 学習済み実数パラメータのパック
//! - `network`: 9 層固定トポロジの推論
//! - `reference`: 直接計算による参照実装
//!

// 基本型
pub mod constants;
pub mod error;
pub mod layout;
pub mod word;

// 構成とストア
pub mod config;
pub mod context;
pub mod store;

// 計算
pub mod engine;

// スケジューリング
pub mod schedule;

// パラメータと推論
pub mod network;
pub mod pack;
pub mod reference;

pub use config::AccelConfig;
pub use constants::Word;
pub use context::LayerContext;
pub use engine::{Accelerator, Invocation, LayerKind, NormMode, WidthMode};
pub use error::{AccelError, Result};
pub use network::{LayerParams, Network};
pub use schedule::{LayerSpec, Schedule, ScheduleEntry, compute_schedule, run_schedule};
pub use store::{FmapLayout, Half, ThresholdSlice, WeightSlice};
