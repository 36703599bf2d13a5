//! Nearest-neighbour queries over a fixed point set
//!
//! [`SpatialIndex`] bulk-loads an R*-tree once and answers every query the pipeline needs:
//! single nearest, nearest within a distance, k-nearest, fixed radius and the hybrid
//! radius/max-count search used by normal and descriptor estimation.

use cv_core::PointCloud;
use nalgebra::Point3;
use rstar::primitives::GeomWithData;
use rstar::RTree;

type IndexedPoint = GeomWithData<[f64; 3], usize>;

/// A query hit: index into the indexed point slice and squared Euclidean distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance_squared: f64,
}

impl Neighbor {
    pub fn distance(&self) -> f64 {
        self.distance_squared.sqrt()
    }
}

/// Immutable R*-tree over a point slice.
///
/// Non-finite points are left out of the tree and can never be returned. Indices in
/// [`Neighbor`] always refer to the slice the index was built from.
pub struct SpatialIndex {
    tree: RTree<IndexedPoint>,
}

impl SpatialIndex {
    pub fn build(points: &[Point3<f64>]) -> Self {
        let entries: Vec<IndexedPoint> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.coords.iter().all(|c| c.is_finite()))
            .map(|(i, p)| GeomWithData::new([p.x, p.y, p.z], i))
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn from_cloud(cloud: &PointCloud) -> Self {
        Self::build(&cloud.points)
    }

    /// Number of indexed (finite) points.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn nearest(&self, query: &Point3<f64>) -> Option<Neighbor> {
        let q = [query.x, query.y, query.z];
        self.tree
            .nearest_neighbor_iter_with_distance_2(&q)
            .next()
            .map(|(entry, d2)| Neighbor {
                index: entry.data,
                distance_squared: d2,
            })
    }

    /// Nearest point, provided it lies within `max_distance` (inclusive).
    pub fn nearest_within(&self, query: &Point3<f64>, max_distance: f64) -> Option<Neighbor> {
        self.nearest(query)
            .filter(|n| n.distance_squared <= max_distance * max_distance)
    }

    /// Up to `k` nearest points, closest first.
    pub fn knn(&self, query: &Point3<f64>, k: usize) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }
        let q = [query.x, query.y, query.z];
        self.tree
            .nearest_neighbor_iter_with_distance_2(&q)
            .take(k)
            .map(|(entry, d2)| Neighbor {
                index: entry.data,
                distance_squared: d2,
            })
            .collect()
    }

    /// All points within `radius` (inclusive), closest first.
    pub fn radius(&self, query: &Point3<f64>, radius: f64) -> Vec<Neighbor> {
        let q = [query.x, query.y, query.z];
        let r2 = radius * radius;
        let mut hits: Vec<Neighbor> = self
            .tree
            .locate_within_distance(q, r2)
            .map(|entry| {
                let p = entry.geom();
                let (dx, dy, dz) = (p[0] - q[0], p[1] - q[1], p[2] - q[2]);
                Neighbor {
                    index: entry.data,
                    distance_squared: dx * dx + dy * dy + dz * dz,
                }
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance_squared
                .total_cmp(&b.distance_squared)
                .then(a.index.cmp(&b.index))
        });
        hits
    }

    /// At most `max_nn` nearest points that also lie within `radius`, closest first.
    pub fn hybrid(&self, query: &Point3<f64>, radius: f64, max_nn: usize) -> Vec<Neighbor> {
        let q = [query.x, query.y, query.z];
        let r2 = radius * radius;
        self.tree
            .nearest_neighbor_iter_with_distance_2(&q)
            .take_while(|(_, d2)| *d2 <= r2)
            .take(max_nn)
            .map(|(entry, d2)| Neighbor {
                index: entry.data,
                distance_squared: d2,
            })
            .collect()
    }
}
