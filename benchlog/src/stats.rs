// Small statistics helpers for the aggregates.

/// Arithmetic mean, or zero for no data.

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population standard deviation, or zero for no data.

pub fn std_dev(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let m = mean(xs);
    (xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / xs.len() as f64).sqrt()
}

/// The empirical distribution of `xs` as a step curve over `bins` equal-width bins: for each bin,
/// its upper edge and the fraction of values at or below it.  The last point is always 1.0.

pub fn cdf_curve(xs: &[f64], bins: usize) -> Vec<(f64, f64)> {
    if xs.is_empty() || bins == 0 {
        return vec![];
    }
    let lo = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if hi <= lo {
        return vec![(hi, 1.0)];
    }
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0usize; bins];
    for x in xs {
        // The last bin is closed on the right.
        let i = (((x - lo) / width) as usize).min(bins - 1);
        counts[i] += 1;
    }
    let n = xs.len() as f64;
    let mut acc = 0;
    let mut curve = vec![];
    for (i, c) in counts.iter().enumerate() {
        acc += c;
        let edge = if i == bins - 1 {
            hi
        } else {
            lo + width * (i + 1) as f64
        };
        curve.push((edge, acc as f64 / n));
    }
    curve
}

/// One-dimensional k-means.  Returns the cluster centers and, for each value, the index of its
/// cluster.  Centers are seeded at evenly spaced quantiles so the result is deterministic.  `k` is
/// reduced to the number of values if necessary.

pub fn kmeans_1d(xs: &[f64], k: usize) -> (Vec<f64>, Vec<usize>) {
    let k = k.min(xs.len());
    if k == 0 {
        return (vec![], vec![0; xs.len()]);
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let mut centers = (0..k)
        .map(|i| sorted[((2 * i + 1) * n / (2 * k)).min(n - 1)])
        .collect::<Vec<f64>>();

    let nearest = |centers: &[f64], x: f64| -> usize {
        let mut best = 0;
        for (i, c) in centers.iter().enumerate() {
            if (x - c).abs() < (x - centers[best]).abs() {
                best = i;
            }
        }
        best
    };

    let mut labels = xs.iter().map(|x| nearest(&centers, *x)).collect::<Vec<usize>>();
    for _ in 0..100 {
        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for (x, l) in xs.iter().zip(labels.iter()) {
            sums[*l] += x;
            counts[*l] += 1;
        }
        for i in 0..k {
            if counts[i] > 0 {
                centers[i] = sums[i] / counts[i] as f64;
            }
        }
        let next = xs.iter().map(|x| nearest(&centers, *x)).collect::<Vec<usize>>();
        if next == labels {
            break;
        }
        labels = next;
    }
    (centers, labels)
}

#[test]
fn test_mean_std() {
    assert!(mean(&[]) == 0.0);
    assert!(std_dev(&[]) == 0.0);
    assert!(mean(&[1.0, 2.0, 3.0, 6.0]) == 3.0);
    // Population, not sample, deviation.
    assert!(std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) == 2.0);
    assert!(std_dev(&[5.0]) == 0.0);
}

#[test]
fn test_cdf_curve() {
    assert!(cdf_curve(&[], 10).is_empty());
    assert!(cdf_curve(&[3.0, 3.0], 10) == vec![(3.0, 1.0)]);
    let c = cdf_curve(&[0.0, 1.0, 2.0, 3.0, 4.0, 4.0, 4.0, 8.0], 4);
    assert!(c == vec![(2.0, 0.25), (4.0, 0.5), (6.0, 0.875), (8.0, 1.0)]);
}

#[test]
fn test_kmeans_1d() {
    let xs = [1.0, 30.0, 2.0, 31.0, 3.0, 32.0];
    let (centers, labels) = kmeans_1d(&xs, 2);
    assert!(centers == vec![2.0, 31.0]);
    assert!(labels == vec![0, 1, 0, 1, 0, 1]);

    let (centers, labels) = kmeans_1d(&xs, 1);
    assert!(centers == vec![16.5]);
    assert!(labels.iter().all(|l| *l == 0));

    let (centers, labels) = kmeans_1d(&[4.0], 3);
    assert!(centers == vec![4.0]);
    assert!(labels == vec![0]);

    let (centers, labels) = kmeans_1d(&[1.0, 2.0], 0);
    assert!(centers.is_empty());
    assert!(labels == vec![0, 0]);
}
