//! Seeded stratified train/test split.

use crate::data::dataset::Dataset;
use crate::error::MlError;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

/// Number of training rows for `n` rows at `train_fraction` (floored, at least
/// one row on each side).
pub fn train_size(n: usize, train_fraction: f64) -> usize {
    // Guard against 0.7 * 1000 = 699.999...
    let n_train = (n as f64 * train_fraction + 1e-9).floor() as usize;
    n_train.clamp(1, n.saturating_sub(1).max(1))
}

/// Split `dataset` into `(train, test)` so that every class of `target` keeps
/// its overall proportion in both parts.
///
/// Each class contributes `floor` or `ceil` of its share of the test rows
/// (largest-remainder allocation, ties broken by class order). Rows with a
/// missing target form their own class. Within each class rows are shuffled
/// with a ChaCha8 generator seeded from `seed`, so the same input, fraction
/// and seed always produce the same split.
pub fn stratified_split(
    dataset: &Dataset,
    target: &str,
    train_fraction: f64,
    seed: u64,
) -> Result<(Dataset, Dataset), MlError> {
    let target_idx = dataset.column_index(target).ok_or_else(|| {
        MlError::invalid_input(format!("Target column '{target}' not found in dataset"))
    })?;
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        return Err(MlError::invalid_input(format!(
            "train fraction must be in (0, 1), got {train_fraction}"
        )));
    }
    let n = dataset.row_count();
    if n < 2 {
        return Err(MlError::invalid_input(format!(
            "Cannot split {n} row(s) into train and test"
        )));
    }

    let mut classes: BTreeMap<Option<String>, Vec<usize>> = BTreeMap::new();
    for (i, row) in dataset.rows().iter().enumerate() {
        classes.entry(row[target_idx].key()).or_default().push(i);
    }

    let n_test = n - train_size(n, train_fraction);
    let allocation = allocate_test_rows(&classes, n, n_test);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train_idx = Vec::with_capacity(n - n_test);
    let mut test_idx = Vec::with_capacity(n_test);
    for ((_, members), take) in classes.iter().zip(allocation) {
        let mut members = members.clone();
        members.shuffle(&mut rng);
        let (test_part, train_part) = members.split_at(take);
        test_idx.extend_from_slice(test_part);
        train_idx.extend_from_slice(train_part);
    }
    train_idx.shuffle(&mut rng);
    test_idx.shuffle(&mut rng);

    tracing::debug!(
        rows = n,
        classes = classes.len(),
        train = train_idx.len(),
        test = test_idx.len(),
        "Stratified split"
    );
    Ok((dataset.select_rows(&train_idx), dataset.select_rows(&test_idx)))
}

// Largest-remainder apportionment of `n_test` rows across classes.
fn allocate_test_rows(
    classes: &BTreeMap<Option<String>, Vec<usize>>,
    n: usize,
    n_test: usize,
) -> Vec<usize> {
    let mut allocation = Vec::with_capacity(classes.len());
    let mut remainders = Vec::with_capacity(classes.len());
    for (pos, members) in classes.values().enumerate() {
        let exact = members.len() as f64 * n_test as f64 / n as f64;
        let base = (exact.floor() as usize).min(members.len());
        allocation.push(base);
        remainders.push((exact - base as f64, pos));
    }

    let mut leftover = n_test.saturating_sub(allocation.iter().sum());
    remainders.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    let sizes: Vec<usize> = classes.values().map(Vec::len).collect();
    for (_, pos) in remainders {
        if leftover == 0 {
            break;
        }
        if allocation[pos] < sizes[pos] {
            allocation[pos] += 1;
            leftover -= 1;
        }
    }
    allocation
}
