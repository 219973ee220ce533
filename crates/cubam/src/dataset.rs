//! Worker–image–label triples and their per-worker / per-image views.
//!
//! Text format:
//!
//! ```text
//! <numImages> <numWorkers> <numLabels>
//! <imageId> <workerId> <0|1>
//! ...
//! ```
//!
//! Ids are dense and 0-based. Blank lines and `#` comments are ignored.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CubamError, Result};

/// One binary judgment of one worker on one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelRecord {
    /// Dense image id.
    pub image_id: usize,
    /// Dense worker id.
    pub worker_id: usize,
    /// `true` for a positive vote.
    pub label: bool,
}

impl LabelRecord {
    pub fn new(image_id: usize, worker_id: usize, label: bool) -> Self {
        Self {
            image_id,
            worker_id,
            label,
        }
    }
}

/// Immutable label set with per-worker and per-image indices.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelDataset {
    num_images: usize,
    num_workers: usize,
    records: Vec<LabelRecord>,
    /// worker id → (image id, label), in record order.
    by_worker: Vec<Vec<(usize, bool)>>,
    /// image id → (worker id, label), in record order.
    by_image: Vec<Vec<(usize, bool)>>,
}

impl LabelDataset {
    /// Build from explicit counts and records.
    ///
    /// Fails with `DataFormat` when a record references an id outside the
    /// declared counts.
    pub fn from_records(
        num_images: usize,
        num_workers: usize,
        records: Vec<LabelRecord>,
    ) -> Result<Self> {
        let mut by_worker = vec![Vec::new(); num_workers];
        let mut by_image = vec![Vec::new(); num_images];
        for (k, r) in records.iter().enumerate() {
            if r.image_id >= num_images {
                return Err(CubamError::data_format(
                    None,
                    format!(
                        "record {}: image id {} >= declared image count {}",
                        k, r.image_id, num_images
                    ),
                ));
            }
            if r.worker_id >= num_workers {
                return Err(CubamError::data_format(
                    None,
                    format!(
                        "record {}: worker id {} >= declared worker count {}",
                        k, r.worker_id, num_workers
                    ),
                ));
            }
            by_worker[r.worker_id].push((r.image_id, r.label));
            by_image[r.image_id].push((r.worker_id, r.label));
        }
        Ok(Self {
            num_images,
            num_workers,
            records,
            by_worker,
            by_image,
        })
    }

    /// Build from records alone; counts are `max id + 1`.
    pub fn from_triples(records: Vec<LabelRecord>) -> Self {
        let num_images = records.iter().map(|r| r.image_id + 1).max().unwrap_or(0);
        let num_workers = records.iter().map(|r| r.worker_id + 1).max().unwrap_or(0);
        let mut by_worker = vec![Vec::new(); num_workers];
        let mut by_image = vec![Vec::new(); num_images];
        for r in &records {
            by_worker[r.worker_id].push((r.image_id, r.label));
            by_image[r.image_id].push((r.worker_id, r.label));
        }
        Self {
            num_images,
            num_workers,
            records,
            by_worker,
            by_image,
        }
    }

    /// Load a label file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::parse(BufReader::new(file))
    }

    /// Parse the text format from any buffered reader.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut header: Option<(usize, usize, usize)> = None;
        let mut records = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let cols = parse_columns(trimmed, line_no)?;
            match header {
                None => {
                    let [n_img, n_wkr, n_lbl] = cols;
                    header = Some((
                        non_negative(n_img, line_no, "image count")?,
                        non_negative(n_wkr, line_no, "worker count")?,
                        non_negative(n_lbl, line_no, "label count")?,
                    ));
                }
                Some(_) => {
                    let [img, wkr, lbl] = cols;
                    let label = match lbl {
                        0 => false,
                        1 => true,
                        other => {
                            return Err(CubamError::data_format(
                                Some(line_no),
                                format!("label must be 0 or 1, got {}", other),
                            ))
                        }
                    };
                    records.push(LabelRecord::new(
                        non_negative(img, line_no, "image id")?,
                        non_negative(wkr, line_no, "worker id")?,
                        label,
                    ));
                }
            }
        }

        let Some((num_images, num_workers, num_labels)) = header else {
            return Err(CubamError::data_format(None, "missing header line"));
        };
        if records.len() != num_labels {
            return Err(CubamError::data_format(
                None,
                format!(
                    "header declares {} labels but {} records follow",
                    num_labels,
                    records.len()
                ),
            ));
        }
        Self::from_records(num_images, num_workers, records)
    }

    /// Write the dataset in the text format.
    pub fn write_to<W: Write>(&self, mut out: W) -> Result<()> {
        writeln!(
            out,
            "{} {} {}",
            self.num_images,
            self.num_workers,
            self.records.len()
        )?;
        for r in &self.records {
            writeln!(out, "{} {} {}", r.image_id, r.worker_id, u8::from(r.label))?;
        }
        Ok(())
    }

    /// Write the dataset to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        let mut out = std::io::BufWriter::new(file);
        self.write_to(&mut out)?;
        out.flush()?;
        Ok(())
    }

    pub fn num_images(&self) -> usize {
        self.num_images
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn num_labels(&self) -> usize {
        self.records.len()
    }

    /// All records in load order.
    pub fn records(&self) -> &[LabelRecord] {
        &self.records
    }

    /// Labels given by worker `worker_id` as `(image id, label)`.
    ///
    /// Panics if `worker_id >= num_workers()`.
    pub fn worker_labels(&self, worker_id: usize) -> &[(usize, bool)] {
        &self.by_worker[worker_id]
    }

    /// Labels received by image `image_id` as `(worker id, label)`.
    ///
    /// Panics if `image_id >= num_images()`.
    pub fn image_labels(&self, image_id: usize) -> &[(usize, bool)] {
        &self.by_image[image_id]
    }

    pub fn worker_label_counts(&self) -> Vec<usize> {
        self.by_worker.iter().map(Vec::len).collect()
    }

    pub fn image_label_counts(&self) -> Vec<usize> {
        self.by_image.iter().map(Vec::len).collect()
    }
}

impl FromStr for LabelDataset {
    type Err = CubamError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s.as_bytes())
    }
}

fn parse_columns(line: &str, line_no: usize) -> Result<[i64; 3]> {
    let mut out = [0i64; 3];
    let mut n = 0usize;
    for tok in line.split_whitespace() {
        if n == 3 {
            return Err(CubamError::data_format(
                Some(line_no),
                "expected exactly 3 columns",
            ));
        }
        out[n] = tok.parse::<i64>().map_err(|_| {
            CubamError::data_format(Some(line_no), format!("'{}' is not an integer", tok))
        })?;
        n += 1;
    }
    if n != 3 {
        return Err(CubamError::data_format(
            Some(line_no),
            format!("expected 3 columns, got {}", n),
        ));
    }
    Ok(out)
}

fn non_negative(v: i64, line_no: usize, what: &str) -> Result<usize> {
    usize::try_from(v).map_err(|_| {
        CubamError::data_format(Some(line_no), format!("{} must be non-negative, got {}", what, v))
    })
}
