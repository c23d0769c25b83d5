//! Optional label side-table (§4.2 of the spec).
//!
//! Loaded once at construction from a whitespace-separated text file:
//! `<image_index> <label_0> ... <label_{W-1}> [ignored trailing fields]`.
//! The float buffer is append-only during load and immutable afterwards;
//! `find` borrows slices into it rather than copying.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub struct LabelMap {
    label_width: usize,
    // Append-only backing storage; `index_of` slices borrow into this.
    labels: Vec<f32>,
    index_of: HashMap<u64, usize>,
}

impl LabelMap {
    /// Loads the side-table from `path`. Fatal on I/O error or a line with
    /// fewer than `label_width + 1` whitespace-separated fields.
    pub fn load(path: &Path, label_width: usize) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::io(path.to_string_lossy().to_string(), e))?;

        let mut labels = Vec::new();
        let mut index_of = HashMap::new();

        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let index_str = fields.next().ok_or_else(|| {
                Error::Format(format!("{}:{}: empty line", path.display(), line_no + 1))
            })?;
            let image_index: u64 = index_str.parse().map_err(|_| {
                Error::Format(format!(
                    "{}:{}: bad image index {index_str:?}",
                    path.display(),
                    line_no + 1
                ))
            })?;

            let start = labels.len();
            for w in 0..label_width {
                let field = fields.next().ok_or_else(|| {
                    Error::Format(format!(
                        "{}:{}: expected {} labels, found {}",
                        path.display(),
                        line_no + 1,
                        label_width,
                        w
                    ))
                })?;
                // Read as double then narrow to f32, matching the
                // original source's precision behavior verbatim
                // (overflow/NaN propagate as produced by `as f32`).
                let value: f64 = field.parse().map_err(|_| {
                    Error::Format(format!(
                        "{}:{}: bad label value {field:?}",
                        path.display(),
                        line_no + 1
                    ))
                })?;
                labels.push(value as f32);
            }
            // Remaining fields (e.g. a filename) are discarded.

            if index_of.insert(image_index, start).is_some() {
                return Err(Error::Format(format!(
                    "{}:{}: duplicate image index {image_index}",
                    path.display(),
                    line_no + 1
                )));
            }
        }

        Ok(LabelMap {
            label_width,
            labels,
            index_of,
        })
    }

    pub fn label_width(&self) -> usize {
        self.label_width
    }

    /// Borrows the label slice for `image_index`. Fatal if the index is
    /// absent from the table.
    pub fn find(&self, image_index: u64) -> Result<&[f32]> {
        let start = self.index_of.get(&image_index).copied().ok_or_else(|| {
            Error::Format(format!("no label entry for image index {image_index}"))
        })?;
        Ok(&self.labels[start..start + self.label_width])
    }
}
