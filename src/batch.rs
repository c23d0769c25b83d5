//! The batching decorator (§4.5's `BatchLoader`): stacks `batch_size`
//! instances into one dense `(B, C, H, W)` tensor plus a stacked label
//! matrix.
//!
//! Per `SPEC_FULL.md`'s Open Question decision on the trailing partial
//! batch: the final, short batch of a pass is emitted as-is (its `Batch`
//! reports its true size), matching the original source's own
//! `batch_size = std::min(...)` guard at the tail of `BatchLoader::Next`
//! rather than padding with zeros or dropping it.

use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::iterator::DataIter;

/// A stacked mini-batch. `size` is the number of instances actually
/// filled, which may be less than `capacity` for the trailing batch of a
/// pass.
#[derive(Debug, Clone)]
pub struct Batch {
    pub size: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub label_width: usize,
    /// `capacity * channels * height * width`, row 0 first.
    pub data: Vec<f32>,
    /// `capacity * label_width`.
    pub label: Vec<f32>,
    pub indices: Vec<u64>,
}

impl Batch {
    fn zeros(capacity: usize, channels: usize, height: usize, width: usize, label_width: usize) -> Self {
        Batch {
            size: 0,
            channels,
            height,
            width,
            label_width,
            data: vec![0.0; capacity * channels * height * width],
            label: vec![0.0; capacity * label_width],
            indices: Vec::with_capacity(capacity),
        }
    }

    fn capacity(&self) -> usize {
        if self.channels * self.height * self.width == 0 {
            0
        } else {
            self.data.len() / (self.channels * self.height * self.width)
        }
    }

    fn clear(&mut self) {
        self.size = 0;
        self.indices.clear();
    }

    fn push(&mut self, instance: &Instance) {
        let stride = self.channels * self.height * self.width;
        let offset = self.size * stride;
        self.data[offset..offset + stride].copy_from_slice(instance.data.as_slice());
        let label_offset = self.size * self.label_width;
        self.label[label_offset..label_offset + self.label_width].copy_from_slice(&instance.label);
        self.indices.push(instance.index);
        self.size += 1;
    }
}

pub struct BatchLoader<I> {
    inner: I,
    capacity: usize,
    channels: usize,
    height: usize,
    width: usize,
    label_width: usize,
    current: Option<Batch>,
    exhausted: bool,
}

impl<I: DataIter<Item = Instance>> BatchLoader<I> {
    pub fn new(
        inner: I,
        batch_size: usize,
        channels: usize,
        height: usize,
        width: usize,
        label_width: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Configuration(
                "batch_size must be >= 1".to_string(),
            ));
        }
        Ok(BatchLoader {
            inner,
            capacity: batch_size,
            channels,
            height,
            width,
            label_width,
            current: None,
            exhausted: false,
        })
    }
}

impl<I: DataIter<Item = Instance>> DataIter for BatchLoader<I> {
    type Item = Batch;

    fn before_first(&mut self) -> Result<()> {
        self.current = None;
        self.exhausted = false;
        self.inner.before_first()
    }

    fn next(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        let mut batch = self.current.take().unwrap_or_else(|| {
            Batch::zeros(
                self.capacity,
                self.channels,
                self.height,
                self.width,
                self.label_width,
            )
        });
        batch.clear();

        while batch.size < batch.capacity() {
            if !self.inner.next()? {
                self.exhausted = true;
                break;
            }
            batch.push(self.inner.value());
        }

        if batch.size == 0 {
            self.current = Some(batch);
            return Ok(false);
        }
        self.current = Some(batch);
        Ok(true)
    }

    fn value(&self) -> &Batch {
        self.current.as_ref().expect("next() has not been called yet")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Tensor3;

    struct Fixed {
        items: Vec<Instance>,
        cursor: usize,
    }

    impl DataIter for Fixed {
        type Item = Instance;

        fn before_first(&mut self) -> Result<()> {
            self.cursor = 0;
            Ok(())
        }

        fn next(&mut self) -> Result<bool> {
            if self.cursor >= self.items.len() {
                return Ok(false);
            }
            self.cursor += 1;
            Ok(true)
        }

        fn value(&self) -> &Instance {
            &self.items[self.cursor - 1]
        }
    }

    fn instance(index: u64) -> Instance {
        let mut data = Tensor3::zeros(1, 1, 1);
        data.set(0, 0, 0, index as f32);
        Instance {
            index,
            data,
            label: vec![index as f32],
        }
    }

    #[test]
    fn emits_full_batches_then_a_short_trailing_batch() {
        let source = Fixed {
            items: (0..5).map(instance).collect(),
            cursor: 0,
        };
        let mut loader = BatchLoader::new(source, 2, 1, 1, 1, 1).unwrap();

        assert!(loader.next().unwrap());
        assert_eq!(loader.value().size, 2);
        assert_eq!(loader.value().indices, vec![0, 1]);

        assert!(loader.next().unwrap());
        assert_eq!(loader.value().size, 2);
        assert_eq!(loader.value().indices, vec![2, 3]);

        assert!(loader.next().unwrap());
        assert_eq!(loader.value().size, 1);
        assert_eq!(loader.value().indices, vec![4]);

        assert!(!loader.next().unwrap());
    }

    #[test]
    fn exact_multiple_ends_cleanly_without_an_empty_batch() {
        let source = Fixed {
            items: (0..4).map(instance).collect(),
            cursor: 0,
        };
        let mut loader = BatchLoader::new(source, 2, 1, 1, 1, 1).unwrap();
        assert!(loader.next().unwrap());
        assert!(loader.next().unwrap());
        assert!(!loader.next().unwrap());
    }

    #[test]
    fn rejects_zero_batch_size() {
        let source = Fixed {
            items: vec![],
            cursor: 0,
        };
        assert!(BatchLoader::new(source, 0, 1, 1, 1, 1).is_err());
    }
}
