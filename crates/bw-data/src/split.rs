//! Seeded train/test partitioning.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use bw_types::{BwResult, DataError, Dataset, DatasetSplit};

/// Shuffle row indices with `seed` and hold out `test_fraction` of them.
///
/// Returns `(train, test)`. The held-out count is `ceil(len * test_fraction)`;
/// both sides must end up non-empty.
pub fn train_test_split(
    dataset: &Dataset,
    test_fraction: f64,
    seed: u64,
) -> BwResult<(Dataset, Dataset)> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(DataError::InvalidSplit {
            message: format!("test fraction must be in (0, 1), got {test_fraction}"),
        }
        .into());
    }

    let n = dataset.len();
    let n_test = (n as f64 * test_fraction).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(DataError::InvalidSplit {
            message: format!("cannot hold out {n_test} of {n} rows"),
        }
        .into());
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let (test_idx, train_idx) = indices.split_at(n_test);
    Ok((dataset.subset(train_idx), dataset.subset(test_idx)))
}

/// Three-way split: test is held out first, validation is then carved out
/// of what remains.
pub fn split_dataset(
    dataset: &Dataset,
    test_fraction: f64,
    validation_fraction: f64,
    seed: u64,
) -> BwResult<DatasetSplit> {
    let (train_full, test) = train_test_split(dataset, test_fraction, seed)?;
    let (train, validation) = train_test_split(&train_full, validation_fraction, seed)?;

    tracing::info!(
        "Split {} rows into train={}, validation={}, test={}",
        dataset.len(),
        train.len(),
        validation.len(),
        test.len()
    );

    Ok(DatasetSplit {
        train,
        validation,
        test,
    })
}
