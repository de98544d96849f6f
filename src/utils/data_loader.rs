//! Data loading utilities

use std::path::Path;

use ndarray::{Array2, Axis};
use tracing::debug;

use crate::error::{Result, SearchError};

/// In-memory dataset of input rows and target rows
#[derive(Debug, Clone)]
pub struct Dataset {
    inputs: Array2<f64>,
    targets: Array2<f64>,
}

impl Dataset {
    /// Create a dataset; inputs and targets must have the same number of rows
    pub fn new(inputs: Array2<f64>, targets: Array2<f64>) -> Result<Self> {
        if inputs.nrows() != targets.nrows() {
            return Err(SearchError::ShapeError {
                expected: format!("{} target rows", inputs.nrows()),
                actual: format!("{} target rows", targets.nrows()),
            });
        }
        if inputs.nrows() == 0 || inputs.ncols() == 0 || targets.ncols() == 0 {
            return Err(SearchError::DataError("dataset is empty".to_string()));
        }
        Ok(Self { inputs, targets })
    }

    pub fn inputs(&self) -> &Array2<f64> {
        &self.inputs
    }

    pub fn targets(&self) -> &Array2<f64> {
        &self.targets
    }

    /// Number of patterns
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.nrows() == 0
    }

    pub fn n_inputs(&self) -> usize {
        self.inputs.ncols()
    }

    pub fn n_outputs(&self) -> usize {
        self.targets.ncols()
    }

    /// Gather the given rows into a new dataset
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        Self::new(
            self.inputs.select(Axis(0), indices),
            self.targets.select(Axis(0), indices),
        )
    }

    /// Split into a training part (leading rows) and a validation part (remaining rows)
    pub fn split(&self, train_portion: f64) -> Result<(Self, Self)> {
        let n = self.len();
        let split = (train_portion * n as f64).floor() as usize;
        if split == 0 || split >= n {
            return Err(SearchError::DataError(format!(
                "train portion {} of {} patterns leaves an empty split",
                train_portion, n
            )));
        }

        let train_idx: Vec<usize> = (0..split).collect();
        let valid_idx: Vec<usize> = (split..n).collect();
        Ok((self.select(&train_idx)?, self.select(&valid_idx)?))
    }
}

/// Data loader for CSV files with a header row
pub struct DataLoader {
    delimiter: u8,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    /// Create a new data loader
    pub fn new() -> Self {
        Self { delimiter: b',' }
    }

    /// Set the field delimiter
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Load a CSV file; the named columns become targets, every other column an input
    pub fn load_csv(&self, path: impl AsRef<Path>, target_columns: &[String]) -> Result<Dataset> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        let mut target_idx = Vec::with_capacity(target_columns.len());
        for name in target_columns {
            let idx = headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| SearchError::DataError(format!("target column '{}' not found", name)))?;
            target_idx.push(idx);
        }
        if target_idx.is_empty() {
            return Err(SearchError::DataError("no target column given".to_string()));
        }
        let input_idx: Vec<usize> = (0..headers.len()).filter(|i| !target_idx.contains(i)).collect();

        let mut inputs = Vec::new();
        let mut targets = Vec::new();
        let mut n_rows = 0;
        for (row_no, record) in reader.records().enumerate() {
            let record = record?;
            let parse = |idx: usize| -> Result<f64> {
                let field = record.get(idx).unwrap_or("");
                field.trim().parse::<f64>().map_err(|_| {
                    SearchError::DataError(format!(
                        "row {}: column '{}' value '{}' is not numeric",
                        row_no + 1,
                        &headers[idx],
                        field
                    ))
                })
            };
            for &idx in &input_idx {
                inputs.push(parse(idx)?);
            }
            for &idx in &target_idx {
                targets.push(parse(idx)?);
            }
            n_rows += 1;
        }

        debug!(path = %path.display(), rows = n_rows, inputs = input_idx.len(), "Loaded CSV dataset");

        let inputs = Array2::from_shape_vec((n_rows, input_idx.len()), inputs)
            .map_err(|e| SearchError::DataError(e.to_string()))?;
        let targets = Array2::from_shape_vec((n_rows, target_idx.len()), targets)
            .map_err(|e| SearchError::DataError(e.to_string()))?;
        Dataset::new(inputs, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Write;

    #[test]
    fn test_dataset_shape_check() {
        assert!(Dataset::new(array![[1.0], [2.0]], array![[1.0]]).is_err());
        assert!(Dataset::new(Array2::zeros((0, 1)), Array2::zeros((0, 1))).is_err());
    }

    #[test]
    fn test_split() {
        let x = Array2::from_shape_fn((10, 1), |(i, _)| i as f64);
        let y = x.clone();
        let data = Dataset::new(x, y).unwrap();

        let (train, valid) = data.split(0.8).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(valid.len(), 2);
        assert_eq!(valid.inputs()[[0, 0]], 8.0);

        assert!(data.split(0.05).is_err());
        assert!(data.split(1.0).is_err());
    }

    #[test]
    fn test_load_csv() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "x1,y,x2").unwrap();
        writeln!(file, "1.0,2.0,3.0").unwrap();
        writeln!(file, "4.0,5.0,6.0").unwrap();

        let data = DataLoader::new()
            .load_csv(file.path(), &["y".to_string()])
            .unwrap();

        assert_eq!(data.len(), 2);
        assert_eq!(data.n_inputs(), 2);
        assert_eq!(data.inputs()[[1, 1]], 6.0);
        assert_eq!(data.targets()[[0, 0]], 2.0);
    }

    #[test]
    fn test_load_csv_missing_target() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "x1,x2").unwrap();
        writeln!(file, "1.0,2.0").unwrap();

        let result = DataLoader::new().load_csv(file.path(), &["y".to_string()]);
        assert!(matches!(result, Err(SearchError::DataError(_))));
    }
}
