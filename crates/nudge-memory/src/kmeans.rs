//! Seeded k-means (k-means++ initialisation, Lloyd iterations).
//!
//! Shared by IVF training in the index and by pattern clustering in the store.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Output of [`kmeans`]. `assignments[i]` is the centroid index for point `i`.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub centroids: Vec<Vec<f32>>,
    pub assignments: Vec<usize>,
}

/// Squared Euclidean distance.
pub fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of the centroid nearest to `point`.
pub fn nearest(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = squared_distance(point, c);
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}

/// Mean of the given points; `None` for an empty set.
pub fn mean(points: &[&[f32]]) -> Option<Vec<f32>> {
    let first = points.first()?;
    let mut acc = vec![0f32; first.len()];
    for p in points {
        for (a, x) in acc.iter_mut().zip(p.iter()) {
            *a += x;
        }
    }
    let n = points.len() as f32;
    acc.iter_mut().for_each(|a| *a /= n);
    Some(acc)
}

/// Partition `points` into at most `k` groups.
///
/// `k` is clamped to `1..=points.len()`. The result is fully determined by
/// `seed`. Centroids that lose all their points keep their previous position.
pub fn kmeans(points: &[&[f32]], k: usize, max_iterations: usize, seed: u64) -> KMeans {
    if points.is_empty() {
        return KMeans {
            centroids: Vec::new(),
            assignments: Vec::new(),
        };
    }

    let k = k.clamp(1, points.len());
    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = seed_plus_plus(points, k, &mut rng);
    let mut assignments: Vec<usize> = points.iter().map(|p| nearest(p, &centroids)).collect();

    for _ in 0..max_iterations {
        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&[f32]> = points
                .iter()
                .zip(&assignments)
                .filter(|(_, a)| **a == c)
                .map(|(p, _)| *p)
                .collect();
            if let Some(m) = mean(&members) {
                *centroid = m;
            }
        }

        let next: Vec<usize> = points.iter().map(|p| nearest(p, &centroids)).collect();
        if next == assignments {
            break;
        }
        assignments = next;
    }

    KMeans {
        centroids,
        assignments,
    }
}

/// k-means++: each new centre is drawn with probability proportional to its
/// squared distance from the nearest centre chosen so far.
fn seed_plus_plus(points: &[&[f32]], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut chosen = vec![false; points.len()];
    let first = rng.random_range(0..points.len());
    chosen[first] = true;
    let mut centroids = vec![points[first].to_vec()];
    let mut dist: Vec<f32> = points
        .iter()
        .map(|p| squared_distance(p, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = dist.iter().map(|&d| d as f64).sum();
        let pick = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            let mut pick = None;
            for (i, &d) in dist.iter().enumerate() {
                target -= d as f64;
                if target <= 0.0 && d > 0.0 {
                    pick = Some(i);
                    break;
                }
            }
            pick.or_else(|| dist.iter().rposition(|&d| d > 0.0))
        } else {
            None
        };

        // All remaining points coincide with a centre: take any unchosen one.
        let pick = match pick {
            Some(i) => i,
            None => {
                let free: Vec<usize> = (0..points.len()).filter(|&i| !chosen[i]).collect();
                free[rng.random_range(0..free.len())]
            }
        };

        chosen[pick] = true;
        let centre = points[pick].to_vec();
        for (d, p) in dist.iter_mut().zip(points) {
            *d = d.min(squared_distance(p, &centre));
        }
        centroids.push(centre);
    }

    centroids
}
