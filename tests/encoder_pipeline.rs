//! End-to-end checks of the encoder pipeline through the facade crate.

use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use transformer_encoder::{
    build_causal_mask, select_device, Encoder, EncoderConfig, TrainingGuard,
};

static MODE_LOCK: Mutex<()> = Mutex::new(());

/// Serialises tests that flip the process-wide training flag.
fn mode_lock() -> MutexGuard<'static, ()> {
    MODE_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn reference_config() -> EncoderConfig {
    EncoderConfig {
        dropout_p: 0.0,
        ..EncoderConfig::new(10, 8, 2, 16, 5)
    }
}

fn values(tensor: &Tensor) -> Result<Vec<f32>> {
    Ok(tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?)
}

#[test]
fn reference_scenario_produces_finite_features() -> Result<()> {
    let _lock = mode_lock();
    let _mode = TrainingGuard::eval();
    let device = Device::Cpu;
    let encoder = Encoder::new(reference_config(), &device)?;
    let ids = Tensor::new(&[[1i64, 2, 3, 4, 0]], &device)?;

    let features = encoder.forward(&ids, None)?;

    assert_eq!(features.dims(), &[1, 5, 8]);
    assert!(values(&features)?.iter().all(|v| v.is_finite()));
    Ok(())
}

#[test]
fn encoder_equals_manual_composition() -> Result<()> {
    let _lock = mode_lock();
    let _mode = TrainingGuard::eval();
    let device = Device::Cpu;
    let encoder = Encoder::new(
        EncoderConfig {
            num_layers: 2,
            ..reference_config()
        },
        &device,
    )?;
    let ids = Tensor::new(&[[3i64, 1, 4], [1, 5, 9]], &device)?;
    let mask = build_causal_mask(&device, 3)?;

    let mut manual = encoder
        .positional()
        .forward(&encoder.embedding().forward(&ids)?)?;
    for block in encoder.layers() {
        manual = block.forward(&manual, Some(&mask))?;
    }
    let features = encoder.forward(&ids, Some(&mask))?;

    assert_eq!(values(&features)?, values(&manual)?);
    Ok(())
}

#[test]
fn causal_mask_keeps_prefix_outputs_independent_of_suffix() -> Result<()> {
    let _lock = mode_lock();
    let _mode = TrainingGuard::eval();
    let device = Device::Cpu;
    let encoder = Encoder::new(reference_config(), &device)?;
    let mask = build_causal_mask(&device, 5)?;

    let a = encoder.forward(&Tensor::new(&[[1i64, 2, 3, 4, 0]], &device)?, Some(&mask))?;
    let b = encoder.forward(&Tensor::new(&[[1i64, 2, 3, 9, 7]], &device)?, Some(&mask))?;

    let prefix_a = values(&a.narrow(1, 0, 3)?)?;
    let prefix_b = values(&b.narrow(1, 0, 3)?)?;
    for (x, y) in prefix_a.iter().zip(prefix_b.iter()) {
        assert!((x - y).abs() < 1e-5);
    }
    Ok(())
}

#[test]
fn training_mode_enables_dropout() -> Result<()> {
    let device = Device::Cpu;
    let encoder = Encoder::new(
        EncoderConfig {
            dropout_p: 0.5,
            ..reference_config()
        },
        &device,
    )?;
    let ids = Tensor::new(&[[1i64, 2, 3, 4, 0]], &device)?;

    let _lock = mode_lock();
    let (first, second) = {
        let _mode = TrainingGuard::train();
        (encoder.forward(&ids, None)?, encoder.forward(&ids, None)?)
    };
    assert_ne!(values(&first)?, values(&second)?);
    Ok(())
}

#[test]
fn forced_cpu_device_is_honoured() -> Result<()> {
    std::env::set_var("CANDLE_FORCE_CPU", "1");
    let device = select_device()?;
    assert!(device.is_cpu());
    Ok(())
}
