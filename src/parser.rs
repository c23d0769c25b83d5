//! The parallel parser (§4.3 of the spec): turns one chunk into `T`
//! instance vectors, one per worker, decoding and augmenting each
//! record's image and attaching its label.
//!
//! Workers run on a dedicated `rayon::ThreadPool` sized to
//! `preprocess_threads`, fanned out with `pool.scope` rather than
//! `par_iter`, mirroring `parallel_bzip2/src/scanner.rs`'s own
//! dedicated-pool-plus-scope shape. Per §5 and §9, each worker id owns its
//! augmenter and PRNG for the whole parser lifetime; a dedicated pool keeps
//! that ownership a plain per-call `iter_mut()` borrow instead of needing
//! extra bookkeeping to pin state in a shared work-stealing pool, and
//! avoids any deadlock with a caller's own use of the global rayon pool.

use std::path::PathBuf;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::augment::{worker_seed, Augmenter, NullAugmenter};
use crate::codec::{DecodedImage, FixtureCodec, ImageDecoder};
use crate::error::{Error, Result};
use crate::instance::{Instance, InstanceVector, Tensor3};
use crate::labels::LabelMap;
use crate::record::RecordCursor;
use crate::source::{Chunk, RecordSource, DEFAULT_CHUNK_HINT_BYTES};

/// Configuration enumerated in §4.3.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Empty ⇒ use the header label; non-empty ⇒ use the label side-table.
    pub path_imglist: Option<PathBuf>,
    /// Archive path. Required, non-empty.
    pub path_imgrec: PathBuf,
    /// Floats per label. Forced to 1 when no list file is given.
    pub label_width: usize,
    /// Target shape `(C, H, W)`; must be nonzero (validated, not enforced
    /// as a resize — that is the augmenter's responsibility).
    pub data_shape: (usize, usize, usize),
    /// Clamped to `max(1, logical_cores / 2 - 1)`.
    pub preprocess_threads: usize,
    pub verbose: bool,
    pub num_parts: usize,
    pub part_index: usize,
    pub chunk_hint_bytes: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            path_imglist: None,
            path_imgrec: PathBuf::new(),
            label_width: 1,
            data_shape: (3, 1, 1),
            preprocess_threads: 4,
            verbose: true,
            num_parts: 1,
            part_index: 0,
            chunk_hint_bytes: DEFAULT_CHUNK_HINT_BYTES,
        }
    }
}

impl ParserConfig {
    fn validate(&self) -> Result<()> {
        if self.path_imgrec.as_os_str().is_empty() {
            return Err(Error::Configuration(
                "path_imgrec must be set".to_string(),
            ));
        }
        if self.label_width < 1 {
            return Err(Error::Configuration(
                "label_width must be >= 1".to_string(),
            ));
        }
        let (c, h, w) = self.data_shape;
        if c == 0 || h == 0 || w == 0 {
            return Err(Error::Configuration(
                "data_shape must be nonzero in every dimension".to_string(),
            ));
        }
        if self.preprocess_threads < 1 {
            return Err(Error::Configuration(
                "preprocess_threads must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// `max(1, logical_cores / 2 - 1)`, per §4.3.
    fn clamp_threads(requested: usize) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let cap = (cores / 2).saturating_sub(1).max(1);
        requested.min(cap).max(1)
    }
}

/// Builds a parser's per-worker augmenters. Overridden by callers that
/// want a real augmentation library wired in instead of the identity
/// default.
pub trait AugmenterFactory: Send + Sync {
    fn build(&self) -> Box<dyn Augmenter>;
}

pub struct NullAugmenterFactory;

impl AugmenterFactory for NullAugmenterFactory {
    fn build(&self) -> Box<dyn Augmenter> {
        Box::new(NullAugmenter)
    }
}

pub struct Parser {
    source: RecordSource,
    label_map: Option<LabelMap>,
    label_width: usize,
    codec: Arc<dyn ImageDecoder>,
    augmenters: Vec<Box<dyn Augmenter>>,
    rngs: Vec<StdRng>,
    pool: rayon::ThreadPool,
    verbose: bool,
    threads: usize,
}

impl Parser {
    pub fn new(
        config: ParserConfig,
        codec: Arc<dyn ImageDecoder>,
        augmenter_factory: &dyn AugmenterFactory,
    ) -> Result<Self> {
        config.validate()?;

        let threads = ParserConfig::clamp_threads(config.preprocess_threads);

        let (label_map, label_width) = match &config.path_imglist {
            Some(path) => {
                let map = LabelMap::load(path, config.label_width)?;
                let width = map.label_width();
                (Some(map), width)
            }
            None => (None, 1),
        };

        let source = RecordSource::open(
            &config.path_imgrec,
            config.part_index,
            config.num_parts,
            config.chunk_hint_bytes,
        )?;

        let augmenters = (0..threads).map(|_| augmenter_factory.build()).collect();
        let rngs = (0..threads)
            .map(|t| StdRng::seed_from_u64(worker_seed(t)))
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build worker pool: {e}")))?;

        if config.verbose {
            eprintln!(
                "ImageRecordParser: {}, using {} threads for decoding",
                source.path().display(),
                threads
            );
        }

        Ok(Parser {
            source,
            label_map,
            label_width,
            codec,
            augmenters,
            rngs,
            pool,
            verbose: config.verbose,
            threads,
        })
    }

    pub fn label_width(&self) -> usize {
        self.label_width
    }

    pub fn before_first(&mut self) {
        self.source.before_first();
    }

    /// Parses the next chunk into `T` instance vectors. Returns `Ok(None)`
    /// at end of stream.
    pub fn parse_next(&mut self) -> Result<Option<Vec<InstanceVector>>> {
        let chunk = match self.source.next_chunk()? {
            Some(c) => c,
            None => return Ok(None),
        };
        if self.verbose {
            eprintln!("ImageRecordParser: parsing chunk of {} bytes", chunk.len());
        }
        let outputs = self.parse_chunk(chunk)?;
        Ok(Some(outputs))
    }

    fn parse_chunk(&mut self, chunk: Chunk) -> Result<Vec<InstanceVector>> {
        let threads = self.threads;
        let label_width = self.label_width;
        let codec = self.codec.as_ref();
        let label_map = self.label_map.as_ref();
        let chunk_bytes = self.source.bytes(chunk);

        let mut outputs: Vec<InstanceVector> = (0..threads).map(|_| Vec::new()).collect();
        let mut errors: Vec<Option<Error>> = (0..threads).map(|_| None).collect();

        let worker_states: Vec<_> = self
            .augmenters
            .iter_mut()
            .zip(self.rngs.iter_mut())
            .collect();

        self.pool.scope(|s| {
            for (t, ((augmenter, rng), (out_slot, err_slot))) in worker_states
                .into_iter()
                .zip(outputs.iter_mut().zip(errors.iter_mut()))
                .enumerate()
            {
                s.spawn(move |_| {
                    let result = parse_worker_subset(
                        t,
                        threads,
                        chunk_bytes,
                        codec,
                        label_map,
                        label_width,
                        augmenter.as_mut(),
                        rng,
                        out_slot,
                    );
                    if let Err(e) = result {
                        *err_slot = Some(e);
                    }
                });
            }
        });

        if let Some(e) = errors.into_iter().flatten().next() {
            return Err(e);
        }
        Ok(outputs)
    }
}

#[allow(clippy::too_many_arguments)]
fn parse_worker_subset(
    worker_id: usize,
    num_workers: usize,
    chunk_bytes: &[u8],
    codec: &dyn ImageDecoder,
    label_map: Option<&LabelMap>,
    label_width: usize,
    augmenter: &mut dyn Augmenter,
    rng: &mut StdRng,
    out: &mut InstanceVector,
) -> Result<()> {
    out.clear();
    for (ord, rec) in RecordCursor::new(chunk_bytes, 0).enumerate() {
        let rec = rec?;
        if ord % num_workers != worker_id {
            continue;
        }

        let decoded = codec.decode(rec.image_index, rec.payload)?;
        let decoded = augmenter.process(decoded, rng);
        let n_channels = decoded.channels;
        let tensor = to_planar_rgb(&decoded);

        let label = match label_map {
            Some(map) => map.find(rec.image_index)?.to_vec(),
            None => vec![rec.header_label],
        };
        debug_assert_eq!(label.len(), label_width);
        debug_assert!(n_channels == 1 || n_channels == 3);

        out.push(Instance {
            index: rec.image_index,
            data: tensor,
            label,
        });
    }
    Ok(())
}

/// Copies a decoded HWC image into a planar tensor. 3-channel images are
/// reordered BGR → RGB; 1-channel images pass through unchanged (§9: a
/// single grayscale path, not the duplicated dead branches of the
/// original source).
fn to_planar_rgb(img: &DecodedImage) -> Tensor3 {
    let mut out = Tensor3::zeros(img.channels, img.height, img.width);
    match img.channels {
        3 => {
            for y in 0..img.height {
                for x in 0..img.width {
                    let base = (y * img.width + x) * 3;
                    let b = img.pixels[base] as f32;
                    let g = img.pixels[base + 1] as f32;
                    let r = img.pixels[base + 2] as f32;
                    out.set(0, y, x, r);
                    out.set(1, y, x, g);
                    out.set(2, y, x, b);
                }
            }
        }
        1 => {
            for y in 0..img.height {
                for x in 0..img.width {
                    out.set(0, y, x, img.pixels[y * img.width + x] as f32);
                }
            }
        }
        other => unreachable!("codec validated channel count, got {other}"),
    }
    out
}
