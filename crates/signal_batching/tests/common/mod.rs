//! Shared fixtures: LPCM recordings on disk, in-memory corpora, and
//! batcher construction helpers.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use ndarray::Array2;

use signal_batching::io::{write_lpcm, LpcmMeta, LpcmSampleLoader};
use signal_batching::materialize::RecordingBuffers;
use signal_batching::{
    AlignmentRule, BatchIterator, Batcher, BatcherConfig, ChannelSelector, InMemoryRecordings,
    Materializer, RandomBatches, RecordingInfo, RetryPolicy, SampleLoader, SamplingMeta,
    WorkerPool,
};

pub const SAMPLE_RATE: f64 = 8.0;
pub const LABEL_RATE: f64 = 1.0;
/// Five minutes at 8 Hz.
pub const WINDOW_SAMPLES: u64 = 2400;
/// Ten minutes per fixture recording.
pub const RECORDING_SAMPLES: u64 = 4800;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Writes `n` one-channel LPCM recordings (signal + labels) under `dir`,
/// each with values unique to the recording so batches are comparable.
pub fn write_fixtures(dir: &Path, n: usize) -> Result<Vec<RecordingInfo>> {
    let mut infos = Vec::with_capacity(n);
    for i in 0..n {
        let path = dir.join(format!("rec{i}.lpcm"));
        let signal = Array2::from_shape_fn((1, RECORDING_SAMPLES as usize), |(_, t)| {
            (i * 10_000) as f32 + t as f32
        });
        write_lpcm(&path, &LpcmMeta::f32le(SAMPLE_RATE, vec!["c0".into()]), &signal)?;

        let num_labels = (RECORDING_SAMPLES as f64 * LABEL_RATE / SAMPLE_RATE) as usize;
        let labels = Array2::from_shape_fn((1, num_labels), |(_, t)| {
            (i * 100) as f32 + (t % 4) as f32
        });
        let labels_path = path.with_extension("labels.lpcm");
        write_lpcm(
            &labels_path,
            &LpcmMeta::f32le(LABEL_RATE, vec!["seizure".into()]),
            &labels,
        )?;

        infos.push(RecordingInfo {
            id: format!("rec{i}"),
            path,
            num_samples: RECORDING_SAMPLES,
        });
    }
    Ok(infos)
}

/// Recording descriptors without files behind them, for in-memory
/// loaders that resolve items by recording id.
pub fn fake_infos(n: usize) -> Vec<RecordingInfo> {
    (0..n)
        .map(|i| RecordingInfo {
            id: format!("rec{i}"),
            path: std::path::PathBuf::from(format!("rec{i}.lpcm")),
            num_samples: RECORDING_SAMPLES,
        })
        .collect()
}

/// The same corpus as [`write_fixtures`], fully resident.
pub fn memory_fixtures(n: usize) -> InMemoryRecordings {
    let mut recordings = InMemoryRecordings::new();
    for i in 0..n {
        let num_labels = (RECORDING_SAMPLES as f64 * LABEL_RATE / SAMPLE_RATE) as usize;
        recordings = recordings.with_recording(
            format!("rec{i}"),
            RecordingBuffers {
                channels: vec!["c0".into()],
                samples: Array2::from_shape_fn((1, RECORDING_SAMPLES as usize), |(_, t)| {
                    (i * 10_000) as f32 + t as f32
                }),
                labels: vec!["seizure".into()],
                label_data: Array2::from_shape_fn((1, num_labels), |(_, t)| {
                    (i * 100) as f32 + (t % 4) as f32
                }),
                sample_rate: SAMPLE_RATE,
                label_rate: LABEL_RATE,
            },
        );
    }
    recordings
}

/// Uniformly weighted random iterator over the fixture recordings.
pub fn random_spec(infos: &[RecordingInfo], batch_size: usize) -> RandomBatches {
    RandomBatches::new(
        infos.to_vec(),
        vec![1.0; infos.len()],
        ChannelSelector::named(["c0"]),
        SamplingMeta::new(SAMPLE_RATE, LABEL_RATE, AlignmentRule::Strict),
        batch_size,
        WINDOW_SAMPLES,
    )
    .expect("fixture spec is valid")
}

/// A batcher over any loader and spec, with `workers` pool threads
/// (0 = single-worker loop on the manager).
pub fn batcher_with(
    loader: Arc<dyn SampleLoader>,
    spec: Arc<dyn BatchIterator>,
    workers: usize,
    config: BatcherConfig,
) -> Result<Batcher> {
    let materializer = Arc::new(Materializer::new(loader, RetryPolicy::none()));
    let pool = if workers == 0 {
        WorkerPool::empty()
    } else {
        WorkerPool::spawn(workers, Arc::clone(&materializer))?
    };
    Ok(Batcher::new(pool, materializer, spec, config)?)
}

/// A batcher reading the on-disk LPCM fixtures.
pub fn lpcm_batcher(spec: Arc<dyn BatchIterator>, workers: usize) -> Result<Batcher> {
    batcher_with(
        Arc::new(LpcmSampleLoader::local()),
        spec,
        workers,
        BatcherConfig::default(),
    )
}
