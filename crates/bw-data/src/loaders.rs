use std::path::Path;

use bw_types::{BwResult, DataError, Dataset, FeatureMatrix, FEATURE_COLUMNS};

/// CSV loader for labeled tabular data.
#[derive(Debug, Clone)]
pub struct CsvLoader {
    feature_columns: Vec<String>,
    target_column: String,
}

impl CsvLoader {
    pub fn new(feature_columns: &[&str], target_column: impl Into<String>) -> Self {
        Self {
            feature_columns: feature_columns.iter().map(|c| c.to_string()).collect(),
            target_column: target_column.into(),
        }
    }

    /// Loader for the processed dataset: every feature contract column plus the target.
    pub fn for_feature_contract(target_column: impl Into<String>) -> Self {
        Self::new(&FEATURE_COLUMNS, target_column)
    }

    pub fn load<P: AsRef<Path>>(&self, path: P) -> BwResult<Dataset> {
        let path = path.as_ref();
        tracing::info!("Loading dataset from: {}", path.display());

        if !path.exists() {
            return Err(DataError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let mut reader = csv::Reader::from_path(path).map_err(|e| DataError::Csv {
            message: format!("failed to open {}: {}", path.display(), e),
        })?;
        let headers = reader
            .headers()
            .map_err(|e| DataError::Csv {
                message: e.to_string(),
            })?
            .clone();

        let column_index = |name: &str| -> Result<usize, DataError> {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| DataError::MissingColumn {
                    column: name.to_string(),
                })
        };

        let feature_indices = self
            .feature_columns
            .iter()
            .map(|c| column_index(c))
            .collect::<Result<Vec<_>, _>>()?;
        let target_index = column_index(&self.target_column)?;

        let mut features = FeatureMatrix::new(feature_indices.len());
        let mut targets = Vec::new();
        let mut row_buf = Vec::with_capacity(feature_indices.len());

        for (row_number, record) in reader.records().enumerate() {
            let record = record.map_err(|e| DataError::Csv {
                message: e.to_string(),
            })?;

            row_buf.clear();
            for (column, &index) in self.feature_columns.iter().zip(&feature_indices) {
                let raw = record.get(index).unwrap_or("").trim();
                let value: f64 = raw.parse().map_err(|e| DataError::ParseError {
                    row: row_number + 1,
                    column: column.clone(),
                    message: format!("{raw:?}: {e}"),
                })?;
                row_buf.push(value);
            }
            features.push_row(&row_buf).map_err(|e| DataError::InvalidInput {
                message: e.to_string(),
            })?;

            let raw_target = record.get(target_index).unwrap_or("").trim();
            targets.push(parse_label(raw_target).ok_or_else(|| DataError::ParseError {
                row: row_number + 1,
                column: self.target_column.clone(),
                message: format!("{raw_target:?} is not a class label"),
            })?);
        }

        if targets.is_empty() {
            return Err(DataError::Empty {
                message: format!("no rows in {}", path.display()),
            }
            .into());
        }

        let dataset = Dataset::new(self.feature_columns.clone(), features, targets)?;
        tracing::info!(
            "Loaded {} rows with {} features from {}",
            dataset.len(),
            self.feature_columns.len(),
            path.display()
        );
        Ok(dataset)
    }
}

/// Class labels are non-negative integers; "2.0" style encodings are accepted.
fn parse_label(raw: &str) -> Option<usize> {
    if let Ok(label) = raw.parse::<usize>() {
        return Some(label);
    }
    let value: f64 = raw.parse().ok()?;
    if value >= 0.0 && value.fract() == 0.0 {
        Some(value as usize)
    } else {
        None
    }
}

/// Write a dataset back out as CSV (features followed by the target column).
pub fn write_dataset<P: AsRef<Path>>(
    dataset: &Dataset,
    target_column: &str,
    path: P,
) -> BwResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path).map_err(|e| DataError::Csv {
        message: e.to_string(),
    })?;

    let mut header: Vec<&str> = dataset.feature_names.iter().map(String::as_str).collect();
    header.push(target_column);
    writer.write_record(&header).map_err(|e| DataError::Csv {
        message: e.to_string(),
    })?;

    for (row, target) in dataset.features.rows().zip(&dataset.targets) {
        let mut fields: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        fields.push(target.to_string());
        writer.write_record(&fields).map_err(|e| DataError::Csv {
            message: e.to_string(),
        })?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn loads_named_columns_in_requested_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "b,target,a").unwrap();
        writeln!(file, "2.0,1,1.0").unwrap();
        writeln!(file, "4.0,0.0,3.0").unwrap();

        let dataset = CsvLoader::new(&["a", "b"], "target").load(&path).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.features.row(0), &[1.0, 2.0]);
        assert_eq!(dataset.targets, vec![1, 0]);
    }

    #[test]
    fn missing_column_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "a,target\n1.0,0\n").unwrap();

        let err = CsvLoader::new(&["a", "b"], "target").load(&path).unwrap_err();
        assert!(err.to_string().contains("Missing required column: b"));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = CsvLoader::for_feature_contract("target")
            .load("/nonexistent/iris.csv")
            .unwrap_err();
        assert!(matches!(
            err,
            bw_types::BwError::Data(DataError::FileNotFound { .. })
        ));
    }

    #[test]
    fn bad_label_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "a,target\n1.0,setosa\n").unwrap();

        let err = CsvLoader::new(&["a"], "target").load(&path).unwrap_err();
        assert!(err.to_string().contains("setosa"));
    }

    #[test]
    fn write_then_load_keeps_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/data.csv");
        let dataset = Dataset::new(
            vec!["a".into()],
            FeatureMatrix::from_rows(1, &[vec![0.5], vec![1.5]]).unwrap(),
            vec![2, 1],
        )
        .unwrap();

        write_dataset(&dataset, "label", &path).unwrap();
        let loaded = CsvLoader::new(&["a"], "label").load(&path).unwrap();
        assert_eq!(loaded, dataset);
    }
}
