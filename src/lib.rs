//! A parallel, record-I/O-backed image data iterator for training loops.
//!
//! The pipeline mirrors the original source's own composition (§4.5):
//!
//! ```text
//! Prefetcher(BatchLoader(Normalizer(RecordIter(Prefetcher(Parser(RecordSource))))))
//! ```
//!
//! [`RecordSource`] presents one shard of a record-I/O archive as a
//! sequence of byte chunks; [`Parser`] fans each chunk out across a fixed
//! worker pool, decoding and augmenting images and attaching labels; the
//! inner [`Prefetcher`] overlaps that decode work with the caller's own
//! consumption; [`RecordIter`] flattens the parser's per-worker groups
//! into a single, optionally shuffled instance stream; [`Normalizer`]
//! applies per-channel mean/std; [`BatchLoader`] stacks instances into
//! dense batches; and the outer [`Prefetcher`] overlaps batch assembly
//! with training-loop consumption.
//!
//! Two collaborators are deliberately left as trait boundaries rather
//! than bundled implementations: [`ImageDecoder`] (an external codec
//! library) and [`Augmenter`] (an external augmentation library). A
//! dependency-free [`FixtureCodec`] and identity [`NullAugmenter`] are
//! provided so the pipeline runs standalone; enable the `image-codec`
//! feature for a real decoder backed by the `image` crate.

pub mod augment;
pub mod batch;
pub mod codec;
pub mod error;
pub mod instance;
pub mod iterator;
pub mod labels;
pub mod normalize;
pub mod parser;
pub mod prefetch;
pub mod record;
pub mod source;

use std::sync::{Arc, Mutex};

pub use augment::{Augmenter, NullAugmenter};
pub use batch::{Batch, BatchLoader};
pub use codec::{DecodedImage, FixtureCodec, ImageDecoder};
pub use error::{Error, Result};
pub use instance::{Instance, InstanceVector, Tensor3};
pub use iterator::{DataIter, IterConfig, RecordIter};
pub use normalize::{NormalizeConfig, Normalizer};
pub use parser::{AugmenterFactory, NullAugmenterFactory, Parser, ParserConfig};
pub use prefetch::{Prefetcher, DEFAULT_CAPACITY};

/// End-to-end configuration for [`build_pipeline`]: everything needed to
/// assemble `Prefetcher(BatchLoader(Normalizer(RecordIter(...))))` in one
/// call, matching the original source's single combined config struct
/// (`ImageRecParserParam` + `ImageRecordParam` + `ImageNormalizeParam`,
/// §4 of `SPEC_FULL.md`).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub parser: ParserConfig,
    pub iter: IterConfig,
    pub normalize: NormalizeConfig,
    pub batch_size: usize,
    pub prefetch_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            parser: ParserConfig::default(),
            iter: IterConfig::default(),
            normalize: NormalizeConfig::default(),
            batch_size: 1,
            prefetch_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// The batch-level iterator returned by [`build_pipeline`]: an outer
/// prefetcher wrapping the full `BatchLoader(Normalizer(RecordIter))`
/// chain, driven on a background thread behind a shared mutex so
/// `before_first` can reach back through every stage to rewind the
/// underlying [`RecordSource`].
pub struct PrefetcherIter {
    inner: Arc<Mutex<BatchLoader<Normalizer<RecordIter>>>>,
    prefetcher: Prefetcher<Batch>,
    current: Option<Batch>,
    channels: usize,
    height: usize,
    width: usize,
    label_width: usize,
    batch_size: usize,
}

impl PrefetcherIter {
    fn new(
        inner: BatchLoader<Normalizer<RecordIter>>,
        capacity: usize,
        channels: usize,
        height: usize,
        width: usize,
        label_width: usize,
        batch_size: usize,
    ) -> Self {
        let inner = Arc::new(Mutex::new(inner));
        let prefetcher = spawn_batch_prefetcher(
            inner.clone(),
            capacity,
            channels,
            height,
            width,
            label_width,
            batch_size,
        );
        PrefetcherIter {
            inner,
            prefetcher,
            current: None,
            channels,
            height,
            width,
            label_width,
            batch_size,
        }
    }

    fn make_slot(&self) -> Batch {
        Batch {
            size: 0,
            channels: self.channels,
            height: self.height,
            width: self.width,
            label_width: self.label_width,
            data: vec![0.0; self.batch_size * self.channels * self.height * self.width],
            label: vec![0.0; self.batch_size * self.label_width],
            indices: Vec::with_capacity(self.batch_size),
        }
    }
}

impl DataIter for PrefetcherIter {
    type Item = Batch;

    fn before_first(&mut self) -> Result<()> {
        let inner_for_rewind = self.inner.clone();
        let inner_for_produce = self.inner.clone();
        let slot_template = self.make_slot();
        self.prefetcher.before_first(
            move || {
                let _ = inner_for_rewind.lock().unwrap().before_first();
            },
            move || slot_template.clone(),
            move |_slot| produce_batch(&inner_for_produce),
        );
        self.current = None;
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        if let Some(batch) = self.current.take() {
            self.prefetcher.recycle(batch);
        }
        match self.prefetcher.next()? {
            Some(batch) => {
                self.current = Some(batch);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn value(&self) -> &Batch {
        self.current.as_ref().expect("next() has not been called yet")
    }
}

fn produce_batch(inner: &Arc<Mutex<BatchLoader<Normalizer<RecordIter>>>>) -> Result<Option<Batch>> {
    let mut guard = inner.lock().unwrap();
    if guard.next()? {
        Ok(Some(guard.value().clone()))
    } else {
        Ok(None)
    }
}

fn spawn_batch_prefetcher(
    inner: Arc<Mutex<BatchLoader<Normalizer<RecordIter>>>>,
    capacity: usize,
    channels: usize,
    height: usize,
    width: usize,
    label_width: usize,
    batch_size: usize,
) -> Prefetcher<Batch> {
    let make_slot = move || Batch {
        size: 0,
        channels,
        height,
        width,
        label_width,
        data: vec![0.0; batch_size * channels * height * width],
        label: vec![0.0; batch_size * label_width],
        indices: Vec::with_capacity(batch_size),
    };
    Prefetcher::new(capacity, make_slot, move |_slot| produce_batch(&inner))
}

/// Assembles the full pipeline described in the module docs from one
/// [`PipelineConfig`], using `codec` and `augmenter_factory` as the two
/// external collaborators.
pub fn build_pipeline(
    config: PipelineConfig,
    codec: Arc<dyn ImageDecoder>,
    augmenter_factory: &dyn AugmenterFactory,
) -> Result<PrefetcherIter> {
    let (channels, height, width) = config.parser.data_shape;
    let parser = Parser::new(config.parser, codec, augmenter_factory)?;
    let label_width = parser.label_width();

    let record_iter =
        RecordIter::new(parser, config.iter, config.prefetch_capacity);
    let normalizer = Normalizer::new(record_iter, config.normalize, channels)?;
    let batch_loader = BatchLoader::new(
        normalizer,
        config.batch_size,
        channels,
        height,
        width,
        label_width,
    )?;

    Ok(PrefetcherIter::new(
        batch_loader,
        config.prefetch_capacity,
        channels,
        height,
        width,
        label_width,
        config.batch_size,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::write_record;

    fn fixture_payload() -> Vec<u8> {
        FixtureCodec::encode(3, 1, 1, &[1, 2, 3])
    }

    fn write_archive(path: &std::path::Path, n: usize) {
        let mut buf = Vec::new();
        for i in 0..n {
            write_record(&mut buf, 10 + i as u64, (i % 2) as f32, &fixture_payload());
        }
        std::fs::write(path, buf).unwrap();
    }

    #[test]
    fn end_to_end_pipeline_emits_batches_covering_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let rec_path = dir.path().join("archive.rec");
        write_archive(&rec_path, 7);

        let mut config = PipelineConfig::default();
        config.parser.path_imgrec = rec_path;
        config.parser.data_shape = (3, 1, 1);
        config.parser.preprocess_threads = 2;
        config.parser.verbose = false;
        config.batch_size = 3;

        let mut pipeline = build_pipeline(
            config,
            Arc::new(FixtureCodec),
            &NullAugmenterFactory,
        )
        .unwrap();

        let mut seen = Vec::new();
        while pipeline.next().unwrap() {
            seen.extend(pipeline.value().indices.iter().copied());
        }
        seen.sort();
        assert_eq!(seen, vec![10, 11, 12, 13, 14, 15, 16]);
    }
}
