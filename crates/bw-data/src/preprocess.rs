//! One-shot raw dataset → feature dataset transform.

use std::path::Path;

use bw_types::{
    BwResult, DataError, Dataset, FeatureContract, FeatureMatrix, RawInput, FEATURE_COLUMNS,
    RAW_COLUMNS,
};

use crate::loaders::{write_dataset, CsvLoader};

/// Normalise a raw column header: "sepal length (cm)" → "sepal_length".
pub fn clean_column_name(name: &str) -> String {
    name.trim().replace(" (cm)", "").replace(' ', "_")
}

/// Apply the feature contract to every row of a dataset holding the raw columns.
pub fn engineer_features(raw: &Dataset) -> BwResult<Dataset> {
    let position = |name: &str| -> Result<usize, DataError> {
        raw.feature_names
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DataError::MissingColumn {
                column: name.to_string(),
            })
    };
    let idx = [
        position(RAW_COLUMNS[0])?,
        position(RAW_COLUMNS[1])?,
        position(RAW_COLUMNS[2])?,
        position(RAW_COLUMNS[3])?,
    ];

    let mut features = FeatureMatrix::new(FEATURE_COLUMNS.len());
    for row in raw.features.rows() {
        let input = RawInput::new(row[idx[0]], row[idx[1]], row[idx[2]], row[idx[3]]);
        let derived = FeatureContract::derive(&input);
        features.push_row(derived.as_slice()).map_err(|e| DataError::InvalidInput {
            message: e.to_string(),
        })?;
    }

    Ok(Dataset::new(
        FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        features,
        raw.targets.clone(),
    )?)
}

/// Read the raw CSV, clean its headers, derive the engineered columns and
/// write the processed CSV. Extra raw columns (e.g. `target_name`) are dropped.
pub fn preprocess_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    target_column: &str,
) -> BwResult<Dataset> {
    let input = input.as_ref();
    let output = output.as_ref();
    tracing::info!("Preprocessing raw data from {}", input.display());

    if !input.exists() {
        return Err(DataError::FileNotFound {
            path: input.display().to_string(),
        }
        .into());
    }

    // Rewrite the header row so the loader can address columns by clean name.
    let staged = tempfile_path(output);
    {
        let mut reader = csv::Reader::from_path(input).map_err(|e| DataError::Csv {
            message: e.to_string(),
        })?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| DataError::Csv {
                message: e.to_string(),
            })?
            .iter()
            .map(clean_column_name)
            .collect();

        if let Some(parent) = staged.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(&staged).map_err(|e| DataError::Csv {
            message: e.to_string(),
        })?;
        writer.write_record(&headers).map_err(|e| DataError::Csv {
            message: e.to_string(),
        })?;
        for record in reader.records() {
            let record = record.map_err(|e| DataError::Csv {
                message: e.to_string(),
            })?;
            writer.write_record(&record).map_err(|e| DataError::Csv {
                message: e.to_string(),
            })?;
        }
        writer.flush()?;
    }

    let raw = CsvLoader::new(&RAW_COLUMNS, target_column).load(&staged);
    std::fs::remove_file(&staged).ok();
    let processed = engineer_features(&raw?)?;

    tracing::info!("Performing feature engineering... {} rows", processed.len());
    write_dataset(&processed, target_column, output)?;
    tracing::info!("Saved processed data to {}", output.display());
    Ok(processed)
}

fn tempfile_path(output: &Path) -> std::path::PathBuf {
    let name = output
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("processed.csv");
    output.with_file_name(format!(".{name}.raw"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cleans_sklearn_style_headers() {
        assert_eq!(clean_column_name("sepal length (cm)"), "sepal_length");
        assert_eq!(clean_column_name(" petal width (cm)"), "petal_width");
        assert_eq!(clean_column_name("target"), "target");
    }

    #[test]
    fn preprocess_writes_feature_contract_columns() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("raw/iris_raw.csv");
        std::fs::create_dir_all(raw.parent().unwrap()).unwrap();
        std::fs::write(
            &raw,
            "sepal length (cm),sepal width (cm),petal length (cm),petal width (cm),target,target_name\n\
             5.1,3.5,1.4,0.2,0,setosa\n\
             6.0,2.2,5.0,1.5,2,virginica\n",
        )
        .unwrap();
        let out = dir.path().join("processed/iris_features.csv");

        let processed = preprocess_file(&raw, &out, "target").unwrap();
        assert_eq!(processed.feature_names, FEATURE_COLUMNS.to_vec());
        assert!((processed.features.get(0, 4) - 7.0).abs() < 1e-9);
        assert!((processed.features.get(0, 5) - 17.85).abs() < 1e-9);

        let reloaded = CsvLoader::for_feature_contract("target").load(&out).unwrap();
        assert_eq!(reloaded.targets, vec![0, 2]);
        assert!(!dir.path().join("processed/.iris_features.csv.raw").exists());
    }
}
