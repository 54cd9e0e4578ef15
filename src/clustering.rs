//! User clustering over declared category preferences.
//!
//! Each user with a preference row becomes a point in category space, with a
//! missing category read as [`MISSING_SCORE`]. Points are centered and
//! projected onto their leading principal components, then split with
//! k-means. Every non-empty cluster gets a template holding its members' mean
//! preferences.
//!
//! Initialization is deterministic (farthest point from the first user), so
//! re-running on the same rows yields the same assignments.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::categories;
use crate::config::ClusteringConfig;
use crate::errors::RankResult;
use crate::events::{CategoricalPreference, ClusterAssignment, ClusterTemplate};
use crate::store::EventStore;

/// Score assumed for a category absent from a preference row.
pub const MISSING_SCORE: f32 = 0.5;

const POWER_ITERATIONS: usize = 500;
const POWER_TOLERANCE: f32 = 1e-7;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusteringOutcome {
    pub clusters: usize,
    pub iterations: usize,
    pub converged: bool,
    /// Within-cluster sum of squares in the projected space
    pub wcss: f32,
    pub assignments: Vec<ClusterAssignment>,
    pub templates: Vec<ClusterTemplate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster of each point. Labels are dense and ordered by first appearance.
    pub assignments: Vec<usize>,
    pub centroids: Vec<Vec<f32>>,
    pub iterations: usize,
    pub converged: bool,
    pub wcss: f32,
}

pub struct UserClusterer {
    config: ClusteringConfig,
    store: Arc<dyn EventStore>,
}

impl UserClusterer {
    pub fn new(config: ClusteringConfig, store: Arc<dyn EventStore>) -> Self {
        Self { config, store }
    }

    /// Cluster every known user that has a preference row, then replace the
    /// stored assignments and templates.
    ///
    /// With nothing to cluster the store is left alone and the outcome is empty.
    pub fn cluster_users(&self) -> RankResult<ClusteringOutcome> {
        let now = Instant::now();

        let mut by_user: HashMap<String, CategoricalPreference> = self
            .store
            .all_preferences()?
            .into_iter()
            .map(|p| (p.user_id.clone(), p))
            .collect();
        let rows: Vec<CategoricalPreference> = self
            .store
            .user_ids()?
            .into_iter()
            .filter_map(|id| by_user.remove(&id))
            .collect();

        if rows.is_empty() {
            log::info!("no users with preferences to cluster");
            return Ok(ClusteringOutcome::default());
        }

        let k = self.config.clusters.min(rows.len());
        if k < self.config.clusters {
            log::info!(
                "requested {} clusters but only {} users available, using {k}",
                self.config.clusters,
                rows.len()
            );
        }

        let points: Vec<Vec<f32>> = rows.iter().map(preference_vector).collect();
        let reduced = principal_components(&points, self.config.pca_components);
        let result = kmeans(
            &reduced,
            k,
            self.config.max_iterations,
            self.config.convergence_threshold,
        );

        let assignments: Vec<ClusterAssignment> = rows
            .iter()
            .zip(&result.assignments)
            .map(|(row, &cluster_id)| ClusterAssignment {
                user_id: row.user_id.clone(),
                cluster_id,
            })
            .collect();
        let templates = cluster_templates(&rows, &result.assignments);

        self.store.save_clusters(&assignments, &templates)?;

        log::info!(
            "clustered {} users into {} clusters in {}ms (iterations={}, converged={})",
            assignments.len(),
            templates.len(),
            now.elapsed().as_millis(),
            result.iterations,
            result.converged
        );

        Ok(ClusteringOutcome {
            clusters: templates.len(),
            iterations: result.iterations,
            converged: result.converged,
            wcss: result.wcss,
            assignments,
            templates,
        })
    }
}

/// Preference row as a point, one coordinate per category in catalogue order.
pub fn preference_vector(row: &CategoricalPreference) -> Vec<f32> {
    categories::names()
        .map(|cat| row.score(cat).unwrap_or(MISSING_SCORE))
        .collect()
}

/// Project points onto their first `components` principal components.
///
/// The count is capped at the number of points and dimensions. Components
/// come from power iteration with deflation on the covariance matrix; each is
/// sign-normalized so its largest coordinate is positive.
pub fn principal_components(points: &[Vec<f32>], components: usize) -> Vec<Vec<f32>> {
    let Some(dims) = points.first().map(Vec::len) else {
        return Vec::new();
    };
    let n = points.len();
    let components = components.min(n).min(dims);

    let mut mean = vec![0.0f32; dims];
    for point in points {
        for (m, x) in mean.iter_mut().zip(point) {
            *m += x;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n as f32);

    let centered: Vec<Vec<f32>> = points
        .iter()
        .map(|p| p.iter().zip(&mean).map(|(x, m)| x - m).collect())
        .collect();

    let mut cov = vec![vec![0.0f32; dims]; dims];
    for row in &centered {
        for i in 0..dims {
            for j in 0..dims {
                cov[i][j] += row[i] * row[j];
            }
        }
    }

    let mut axes = Vec::with_capacity(components);
    for _ in 0..components {
        let axis = leading_eigenvector(&cov);
        let eigenvalue = dot(&axis, &mat_vec(&cov, &axis));
        for i in 0..dims {
            for j in 0..dims {
                cov[i][j] -= eigenvalue * axis[i] * axis[j];
            }
        }
        axes.push(axis);
    }

    centered
        .iter()
        .map(|row| axes.iter().map(|axis| dot(row, axis)).collect())
        .collect()
}

/// Unit eigenvector of the largest eigenvalue of a symmetric matrix.
/// A zero vector when the matrix is zero.
fn leading_eigenvector(matrix: &[Vec<f32>]) -> Vec<f32> {
    let dims = matrix.len();

    // heaviest column as the start; a zero matrix has no leading axis
    let Some(start) = matrix
        .iter()
        .max_by(|a, b| norm(a).total_cmp(&norm(b)))
        .filter(|col| norm(col) > 0.0)
    else {
        return vec![0.0; dims];
    };

    let mut v = normalized(start.clone());
    for _ in 0..POWER_ITERATIONS {
        let next = mat_vec(matrix, &v);
        if norm(&next) == 0.0 {
            break;
        }
        let next = normalized(next);
        let delta: f32 = next.iter().zip(&v).map(|(a, b)| (a - b).abs()).sum();
        v = next;
        if delta < POWER_TOLERANCE {
            break;
        }
    }

    let flip = v
        .iter()
        .copied()
        .max_by(|a, b| a.abs().total_cmp(&b.abs()))
        .is_some_and(|x| x < 0.0);
    if flip {
        v.iter_mut().for_each(|x| *x = -*x);
    }
    v
}

/// Lloyd's k-means with farthest-point initialization.
///
/// `k` is capped at the number of points. A cluster that loses all its
/// points keeps its previous centroid.
pub fn kmeans(
    points: &[Vec<f32>],
    k: usize,
    max_iterations: usize,
    convergence_threshold: f32,
) -> KMeansResult {
    let k = k.min(points.len());
    if k == 0 {
        return KMeansResult {
            assignments: Vec::new(),
            centroids: Vec::new(),
            iterations: 0,
            converged: true,
            wcss: 0.0,
        };
    }

    let mut centroids = farthest_point_init(points, k);
    let mut assignments = vec![0usize; points.len()];
    let mut iterations = 0;
    let mut converged = false;

    for iter in 0..max_iterations {
        iterations = iter + 1;

        for (i, point) in points.iter().enumerate() {
            assignments[i] = nearest(point, &centroids);
        }

        let new_centroids = compute_centroids(points, &assignments, &centroids);
        let max_movement = centroids
            .iter()
            .zip(&new_centroids)
            .map(|(old, new)| distance_squared(old, new).sqrt())
            .fold(0.0f32, f32::max);
        centroids = new_centroids;

        if max_movement < convergence_threshold {
            converged = true;
            break;
        }
    }

    for (i, point) in points.iter().enumerate() {
        assignments[i] = nearest(point, &centroids);
    }
    let wcss: f32 = points
        .iter()
        .zip(&assignments)
        .map(|(p, &c)| distance_squared(p, &centroids[c]))
        .sum();

    let (assignments, centroids) = relabel(assignments, centroids);

    log::debug!(
        "k-means k={k} n={} iterations={iterations} converged={converged} wcss={wcss:.4}",
        points.len()
    );

    KMeansResult {
        assignments,
        centroids,
        iterations,
        converged,
        wcss,
    }
}

/// First centroid is the first point, each next one the point farthest from
/// every centroid chosen so far. Ties go to the earlier point.
fn farthest_point_init(points: &[Vec<f32>], k: usize) -> Vec<Vec<f32>> {
    let mut centroids = vec![points[0].clone()];
    let mut min_distances = vec![f32::MAX; points.len()];

    while centroids.len() < k {
        let last = &centroids[centroids.len() - 1];
        for (d, point) in min_distances.iter_mut().zip(points) {
            *d = d.min(distance_squared(point, last));
        }

        let mut best = 0;
        for (i, d) in min_distances.iter().enumerate() {
            if *d > min_distances[best] {
                best = i;
            }
        }
        centroids.push(points[best].clone());
    }

    centroids
}

fn nearest(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::MAX;
    for (j, centroid) in centroids.iter().enumerate() {
        let dist = distance_squared(point, centroid);
        if dist < best_dist {
            best_dist = dist;
            best = j;
        }
    }
    best
}

fn compute_centroids(points: &[Vec<f32>], assignments: &[usize], previous: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let dims = previous.first().map(Vec::len).unwrap_or(0);
    let mut sums = vec![vec![0.0f32; dims]; previous.len()];
    let mut counts = vec![0usize; previous.len()];

    for (point, &cluster) in points.iter().zip(assignments) {
        counts[cluster] += 1;
        for (s, x) in sums[cluster].iter_mut().zip(point) {
            *s += x;
        }
    }

    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((mut sum, count), old)| {
            if count == 0 {
                return old.clone();
            }
            sum.iter_mut().for_each(|s| *s /= count as f32);
            sum
        })
        .collect()
}

/// Renumber clusters by first appearance and drop empty ones.
fn relabel(assignments: Vec<usize>, centroids: Vec<Vec<f32>>) -> (Vec<usize>, Vec<Vec<f32>>) {
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    let mut ordered = Vec::new();

    let assignments = assignments
        .into_iter()
        .map(|old| {
            *mapping.entry(old).or_insert_with(|| {
                ordered.push(centroids[old].clone());
                ordered.len() - 1
            })
        })
        .collect();

    (assignments, ordered)
}

/// Mean preference row per cluster. Missing categories count as
/// [`MISSING_SCORE`]. Clusters are listed by id.
pub fn cluster_templates(
    rows: &[CategoricalPreference],
    assignments: &[usize],
) -> Vec<ClusterTemplate> {
    let mut members: BTreeMap<usize, Vec<&CategoricalPreference>> = BTreeMap::new();
    for (row, &cluster_id) in rows.iter().zip(assignments) {
        members.entry(cluster_id).or_default().push(row);
    }

    members
        .into_iter()
        .map(|(cluster_id, rows)| {
            let avg_preferences = categories::names()
                .map(|cat| {
                    let total: f32 = rows
                        .iter()
                        .map(|r| r.score(cat).unwrap_or(MISSING_SCORE))
                        .sum();
                    (cat.to_string(), total / rows.len() as f32)
                })
                .collect();
            ClusterTemplate {
                cluster_id,
                member_count: rows.len(),
                avg_preferences,
            }
        })
        .collect()
}

fn distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

fn normalized(mut v: Vec<f32>) -> Vec<f32> {
    let n = norm(&v);
    if n > 0.0 {
        v.iter_mut().for_each(|x| *x /= n);
    }
    v
}

fn mat_vec(matrix: &[Vec<f32>], v: &[f32]) -> Vec<f32> {
    matrix.iter().map(|row| dot(row, v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn prefs(user_id: &str, scores: &[(&str, f32)]) -> CategoricalPreference {
        CategoricalPreference::new(user_id, scores.iter().map(|(c, s)| (c.to_string(), *s)))
    }

    fn clusterer(store: Arc<MemoryStore>, clusters: usize) -> UserClusterer {
        let config = ClusteringConfig {
            clusters,
            ..ClusteringConfig::default()
        };
        UserClusterer::new(config, store)
    }

    #[test]
    fn test_kmeans_separates_distinct_groups() {
        let points = vec![
            vec![0.0, 0.0],
            vec![10.0, 10.0],
            vec![0.1, 0.0],
            vec![10.0, 10.1],
            vec![0.0, 0.1],
        ];
        let result = kmeans(&points, 2, 100, 1e-6);

        assert!(result.converged);
        assert_eq!(result.assignments, vec![0, 1, 0, 1, 0]);
        assert!((result.centroids[1][0] - 10.0).abs() < 1e-5);
        assert!(result.wcss < 0.1);
    }

    #[test]
    fn test_kmeans_single_point() {
        let result = kmeans(&[vec![1.0, 2.0]], 3, 100, 1e-6);
        assert_eq!(result.assignments, vec![0]);
        assert_eq!(result.centroids, vec![vec![1.0, 2.0]]);
        assert_eq!(result.wcss, 0.0);
    }

    #[test]
    fn test_kmeans_identical_points_share_a_cluster() {
        let points = vec![vec![0.5; 3]; 4];
        let result = kmeans(&points, 3, 100, 1e-6);

        assert!(result.converged);
        assert_eq!(result.assignments, vec![0; 4]);
        assert_eq!(result.centroids.len(), 1);
    }

    #[test]
    fn test_kmeans_empty_input() {
        let result = kmeans(&[], 5, 100, 1e-6);
        assert!(result.assignments.is_empty());
        assert!(result.centroids.is_empty());
    }

    #[test]
    fn test_principal_components_capped() {
        let points = vec![vec![0.0, 1.0, 2.0], vec![1.0, 0.0, 2.0]];
        let reduced = principal_components(&points, 3);
        assert_eq!(reduced.len(), 2);
        assert!(reduced.iter().all(|r| r.len() == 2));
    }

    #[test]
    fn test_principal_components_find_main_axis() {
        // spread along (1, 1, 0), with a small uncorrelated spread on z
        let points = vec![
            vec![0.0, 0.0, 0.1],
            vec![1.0, 1.0, 0.0],
            vec![2.0, 2.0, 0.0],
            vec![3.0, 3.0, 0.1],
        ];
        let reduced = principal_components(&points, 2);

        let spread = |c: usize| {
            let values: Vec<f32> = reduced.iter().map(|r| r[c]).collect();
            values.iter().cloned().fold(f32::MIN, f32::max)
                - values.iter().cloned().fold(f32::MAX, f32::min)
        };
        assert!((spread(0) - 3.0 * 2f32.sqrt()).abs() < 1e-3);
        assert!((spread(1) - 0.1).abs() < 1e-2);
        // sign normalized: first point lies on the negative side
        assert!(reduced[0][0] < 0.0);
    }

    #[test]
    fn test_principal_components_of_identical_points_are_zero() {
        let reduced = principal_components(&[vec![0.3; 4], vec![0.3; 4]], 3);
        assert!(reduced.iter().flatten().all(|x| *x == 0.0));
    }

    #[test]
    fn test_templates_average_with_missing_default() {
        let rows = vec![
            prefs("a", &[("arts_music", 1.0)]),
            prefs("b", &[("arts_music", 0.5), ("food_dining", 0.0)]),
            prefs("c", &[("tech_innovation", 0.9)]),
        ];
        let templates = cluster_templates(&rows, &[0, 0, 1]);

        assert_eq!(templates.len(), 2);
        let first = &templates[0];
        assert_eq!(first.cluster_id, 0);
        assert_eq!(first.member_count, 2);
        assert_eq!(first.avg_preferences.len(), categories::NUM_CATEGORIES);
        assert!((first.avg_preferences["arts_music"] - 0.75).abs() < 1e-6);
        assert!((first.avg_preferences["food_dining"] - 0.25).abs() < 1e-6);
        assert_eq!(first.avg_preferences["sports_fitness"], MISSING_SCORE);

        assert_eq!(templates[1].member_count, 1);
        assert!((templates[1].avg_preferences["tech_innovation"] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_cluster_users_groups_similar_users() {
        let store = Arc::new(
            MemoryStore::new()
                .with_user("art1")
                .with_user("tech1")
                .with_user("art2")
                .with_user("tech2")
                .with_preferences(prefs("art1", &[("arts_music", 1.0), ("tech_innovation", 0.0)]))
                .with_preferences(prefs("art2", &[("arts_music", 0.9), ("tech_innovation", 0.1)]))
                .with_preferences(prefs("tech1", &[("arts_music", 0.0), ("tech_innovation", 1.0)]))
                .with_preferences(prefs("tech2", &[("arts_music", 0.1), ("tech_innovation", 0.9)])),
        );

        let outcome = clusterer(store.clone(), 2).cluster_users().unwrap();
        assert_eq!(outcome.clusters, 2);

        let cluster_of = |user: &str| {
            outcome
                .assignments
                .iter()
                .find(|a| a.user_id == user)
                .map(|a| a.cluster_id)
                .unwrap()
        };
        assert_eq!(cluster_of("art1"), 0);
        assert_eq!(cluster_of("art2"), 0);
        assert_eq!(cluster_of("tech1"), 1);
        assert_eq!(cluster_of("tech2"), 1);

        let arts = &outcome.templates[0];
        assert_eq!(arts.member_count, 2);
        assert!((arts.avg_preferences["arts_music"] - 0.95).abs() < 1e-6);

        assert_eq!(store.cluster_members(1).unwrap(), vec!["tech1", "tech2"]);
        assert_eq!(store.templates.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_cluster_count_capped_at_users() {
        let store = Arc::new(
            MemoryStore::new()
                .with_user("u1")
                .with_user("u2")
                .with_user("no-prefs")
                .with_preferences(prefs("u1", &[("food_dining", 1.0)]))
                .with_preferences(prefs("u2", &[("food_dining", 0.0)]))
                .with_preferences(prefs("ghost", &[("food_dining", 0.5)])),
        );

        let outcome = clusterer(store.clone(), 5).cluster_users().unwrap();
        // users without a row, and rows without a user, are left out
        assert_eq!(outcome.assignments.len(), 2);
        assert_eq!(outcome.clusters, 2);
        assert_eq!(store.clusters.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_nothing_to_cluster_leaves_store_alone() {
        let store = Arc::new(MemoryStore::new().with_user("u1").with_cluster("u1", 3));

        let outcome = clusterer(store.clone(), 5).cluster_users().unwrap();
        assert_eq!(outcome.clusters, 0);
        assert!(outcome.assignments.is_empty());
        assert_eq!(store.cluster_members(3).unwrap(), vec!["u1"]);
    }
}
