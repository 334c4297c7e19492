//! Fault propagation tests: fatal loader errors, worker death, and
//! transient-retry recovery at the service level.

mod common;
use common::*;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use ndarray::Array2;

use signal_batching::materialize::{LabelBlock, SampleBlock};
use signal_batching::{
    AlignmentRule, BatchError, BatchIterator, Batcher, BatcherConfig, BatchItem, ChannelSelector,
    IterationState, Materializer, RandomBatches, RecordingInfo, RetryPolicy, SampleLoader,
    SampleSpan, SamplingMeta, Status, WorkerPool,
};

/// Replays a fixed list of items; items of the "poison" recording are
/// rewritten to "good" once disarmed, so a batcher can recover after a
/// provoked failure.
struct ScriptedBatches {
    items: Vec<BatchItem>,
    batch_size: usize,
    armed: Arc<AtomicBool>,
}

impl BatchIterator for ScriptedBatches {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn next_item(
        &self,
        state: &IterationState,
    ) -> signal_batching::Result<Option<(BatchItem, IterationState)>> {
        let index = state.step() as usize;
        match self.items.get(index) {
            None => Ok(None),
            Some(item) => {
                let mut item = item.clone();
                if !self.armed.load(Ordering::SeqCst) && item.source.recording == "poison" {
                    item.source.recording = "good".into();
                }
                Ok(Some((item, state.advanced())))
            }
        }
    }
}

fn scripted_item(recording: &str) -> BatchItem {
    BatchItem {
        source: signal_batching::item::SignalSource {
            recording: recording.into(),
            path: PathBuf::from(format!("{recording}.lpcm")),
        },
        sample_span: SampleSpan { start: 0, len: 16 },
        label_window: signal_batching::item::LabelWindow { start: 0, len: 2 },
        selector: ChannelSelector::named(["c0"]),
        sampling: SamplingMeta::new(8.0, 1.0, AlignmentRule::Strict),
    }
}

/// Kills the calling worker thread on poison items; serves zeros
/// otherwise.
struct PoisonLoader;

impl SampleLoader for PoisonLoader {
    fn load_item_samples(
        &self,
        item: &BatchItem,
    ) -> signal_batching::Result<(SampleBlock, LabelBlock)> {
        if item.source.recording == "poison" {
            panic!("poison item reached a worker");
        }
        Ok((
            SampleBlock {
                channels: vec!["c0".into()],
                data: Array2::zeros((1, item.sample_span.len as usize)),
                sample_rate: item.sampling.sample_rate,
            },
            LabelBlock {
                labels: vec!["l0".into()],
                data: Array2::zeros((1, item.label_window.len as usize)),
                label_rate: item.sampling.label_rate,
                start: item.label_window.start,
            },
        ))
    }
}

/// Fails a fixed number of loads with a transient error, then succeeds.
struct FlakyLoader {
    failures: u32,
    calls: AtomicU32,
}

impl SampleLoader for FlakyLoader {
    fn load_item_samples(
        &self,
        item: &BatchItem,
    ) -> signal_batching::Result<(SampleBlock, LabelBlock)> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(BatchError::transient("simulated partial read"));
        }
        PoisonLoader.load_item_samples(item)
    }
}

#[test]
fn open_errors_surface_as_remote_and_stick_in_status() -> Result<()> {
    init_tracing();
    // Every item points at a path that cannot be opened.
    let bogus = vec![RecordingInfo {
        id: "rec0".into(),
        path: PathBuf::from("not-a-path"),
        num_samples: RECORDING_SAMPLES,
    }];
    let spec = Arc::new(RandomBatches::new(
        bogus,
        vec![1.0],
        ChannelSelector::named(["c0"]),
        SamplingMeta::new(SAMPLE_RATE, LABEL_RATE, AlignmentRule::Strict),
        2,
        WINDOW_SAMPLES,
    )?);
    let mut batcher = lpcm_batcher(spec, 2)?;

    let err = batcher
        .take(&IterationState::seed(1))
        .expect_err("open failure must propagate");
    match &err {
        BatchError::Remote { source, .. } => {
            assert!(matches!(**source, BatchError::Open { .. }), "got {source}");
        }
        other => panic!("expected Remote(Open), got {other}"),
    }

    // The same error is returned, not raised, from status; stop never
    // raises; the pool survives intact.
    assert_eq!(batcher.status(), Status::Failed(err.clone()));
    assert_eq!(batcher.stop(), Status::Failed(err));
    assert_eq!(batcher.workers().len(), 2);
    assert_eq!(batcher.workers().available(), 2);
    Ok(())
}

#[test]
fn worker_death_surfaces_as_worker_lost_and_shrinks_the_pool() -> Result<()> {
    init_tracing();
    let armed = Arc::new(AtomicBool::new(true));
    let items = vec![
        scripted_item("good"),
        scripted_item("good"),
        scripted_item("poison"),
        scripted_item("good"),
        scripted_item("good"),
        scripted_item("good"),
    ];
    let spec = Arc::new(ScriptedBatches {
        items,
        batch_size: 2,
        armed: Arc::clone(&armed),
    });

    let materializer = Arc::new(Materializer::new(Arc::new(PoisonLoader), RetryPolicy::none()));
    let pool = WorkerPool::spawn(3, Arc::clone(&materializer))?;
    let mut batcher = Batcher::new(pool, materializer, spec, BatcherConfig::default())?;

    // The first batch is clean and arrives in order.
    let s0 = IterationState::seed(0);
    let (_, s2) = batcher.take(&s0)?.expect("scripted batch");

    // The second batch kills its worker.
    let err = batcher.take(&s2).expect_err("worker death must propagate");
    match &err {
        BatchError::Remote { source, .. } => {
            assert!(matches!(**source, BatchError::WorkerLost(_)), "got {source}");
        }
        other => panic!("expected Remote(WorkerLost), got {other}"),
    }

    // The dead worker disappears from the pool once its thread has
    // unwound and a reset probes it.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        batcher.workers().reset();
        if batcher.workers().len() == 2 {
            break;
        }
        assert!(Instant::now() < deadline, "dead worker was never dropped");
        std::thread::sleep(Duration::from_millis(10));
    }

    // Remaining workers keep working once the fault is removed.
    armed.store(false, Ordering::SeqCst);
    batcher.start(s2)?;
    assert!(batcher.take(&s2)?.is_some());
    assert_eq!(batcher.workers().len(), 2);

    batcher.stop();
    Ok(())
}

#[test]
fn transient_failures_are_retried_to_success() -> Result<()> {
    init_tracing();
    let loader = Arc::new(FlakyLoader {
        failures: 2,
        calls: AtomicU32::new(0),
    });
    let spec = Arc::new(ScriptedBatches {
        items: vec![scripted_item("good")],
        batch_size: 1,
        armed: Arc::new(AtomicBool::new(false)),
    });

    let retry = RetryPolicy {
        max_retries: 4,
        base_delay: Duration::from_millis(1),
    };
    let materializer = Arc::new(Materializer::new(loader.clone(), retry));
    let pool = WorkerPool::spawn(1, Arc::clone(&materializer))?;
    let mut batcher = Batcher::new(pool, materializer, spec, BatcherConfig::default())?;

    assert!(batcher.take(&IterationState::seed(0))?.is_some());
    assert_eq!(loader.calls.load(Ordering::SeqCst), 3);

    batcher.stop();
    Ok(())
}

#[test]
fn exhausted_retries_surface_the_transient_error() -> Result<()> {
    init_tracing();
    let loader = Arc::new(FlakyLoader {
        failures: u32::MAX,
        calls: AtomicU32::new(0),
    });
    let spec = Arc::new(ScriptedBatches {
        items: vec![scripted_item("good")],
        batch_size: 1,
        armed: Arc::new(AtomicBool::new(false)),
    });

    let retry = RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
    };
    let materializer = Arc::new(Materializer::new(loader, retry));
    let pool = WorkerPool::spawn(1, Arc::clone(&materializer))?;
    let mut batcher = Batcher::new(pool, materializer, spec, BatcherConfig::default())?;

    let err = batcher
        .take(&IterationState::seed(0))
        .expect_err("retries must exhaust");
    match &err {
        BatchError::Remote { source, .. } => assert!(source.is_transient()),
        other => panic!("expected Remote(Transient), got {other}"),
    }
    batcher.stop();
    Ok(())
}
