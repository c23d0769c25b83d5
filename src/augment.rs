//! The image augmenter collaborator (§1, §4.3, §5 of the spec): out of
//! core scope, specified here only as an invocation contract. Each worker
//! owns one augmenter instance and one PRNG for the lifetime of the
//! parser; the augmenter draws only from its worker's PRNG so results are
//! reproducible across runs with the same seed, shard and record order.

use rand::rngs::StdRng;

use crate::codec::DecodedImage;

/// A stochastic geometric/photometric transform applied to the decoded
/// HWC image, before the core's channel reorder into a planar tensor.
/// Takes ownership of the image so a real augmenter can resize it (the
/// returned image's `height`/`width` need not match the input's).
pub trait Augmenter: Send {
    fn process(&mut self, image: DecodedImage, rng: &mut StdRng) -> DecodedImage;
}

/// Identity augmenter: enough to exercise the pipeline deterministically
/// without an external augmentation library wired in.
#[derive(Default)]
pub struct NullAugmenter;

impl Augmenter for NullAugmenter {
    fn process(&mut self, image: DecodedImage, _rng: &mut StdRng) -> DecodedImage {
        image
    }
}

/// Magic multiplier applied to `(worker_id + 1)` to derive each worker's
/// deterministic PRNG seed (§4.3: "seeded at parser construction with
/// `(t+1) * 111`").
pub const WORKER_SEED_MAGIC: u64 = 111;

/// The iterator-local shuffle PRNG is seeded with `111 + seed` (§4.5).
pub const ITER_SEED_MAGIC: u64 = 111;

pub fn worker_seed(worker_id: usize) -> u64 {
    (worker_id as u64 + 1) * WORKER_SEED_MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn worker_seed_matches_the_spec_formula() {
        assert_eq!(worker_seed(0), 111);
        assert_eq!(worker_seed(1), 222);
        assert_eq!(worker_seed(3), 444);
    }

    #[test]
    fn null_augmenter_passes_the_image_through_unchanged() {
        let mut rng = StdRng::seed_from_u64(worker_seed(0));
        let image = DecodedImage {
            channels: 1,
            height: 1,
            width: 1,
            pixels: vec![42],
        };
        let out = NullAugmenter.process(image, &mut rng);
        assert_eq!(out.pixels, vec![42]);
    }
}
