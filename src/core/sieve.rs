use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// Label of pixels excluded from labelling by a mask
pub const UNLABELLED: usize = usize::MAX;

/// Pixel neighbourhood used to connect regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    Four,
    Eight,
}

impl Connectivity {
    fn offsets(&self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &[(-1, 0), (1, 0), (0, -1), (0, 1)],
            Connectivity::Eight => &[
                (-1, -1),
                (-1, 0),
                (-1, 1),
                (0, -1),
                (0, 1),
                (1, -1),
                (1, 0),
                (1, 1),
            ],
        }
    }
}

/// Connected regions of equal value
#[derive(Debug, Clone)]
pub struct Components<T> {
    /// Region index per pixel, `UNLABELLED` outside the mask
    pub labels: Array2<usize>,
    /// Pixel count per region
    pub sizes: Vec<usize>,
    /// Pixel value per region
    pub values: Vec<T>,
}

impl<T> Components<T> {
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

fn neighbour(
    (row, col): (usize, usize),
    (dr, dc): (isize, isize),
    (rows, cols): (usize, usize),
) -> Option<(usize, usize)> {
    let r = row as isize + dr;
    let c = col as isize + dc;
    if r < 0 || c < 0 || r >= rows as isize || c >= cols as isize {
        None
    } else {
        Some((r as usize, c as usize))
    }
}

/// Label connected regions of equal value.
///
/// Pixels where `mask` is false are left `UNLABELLED` and never join a region.
pub fn label_components<T: Copy + PartialEq>(
    grid: &Array2<T>,
    mask: Option<&Array2<bool>>,
    connectivity: Connectivity,
) -> Components<T> {
    let dim = grid.dim();
    let mut labels = Array2::from_elem(dim, UNLABELLED);
    let mut sizes = Vec::new();
    let mut values = Vec::new();
    let mut queue = VecDeque::new();

    let included = |pos: (usize, usize)| mask.map_or(true, |m| m[pos]);

    for ((row, col), &value) in grid.indexed_iter() {
        if labels[[row, col]] != UNLABELLED || !included((row, col)) {
            continue;
        }

        let label = sizes.len();
        let mut size = 0;
        labels[[row, col]] = label;
        queue.push_back((row, col));

        while let Some(pos) = queue.pop_front() {
            size += 1;
            for &offset in connectivity.offsets() {
                if let Some(next) = neighbour(pos, offset, dim) {
                    if labels[next] == UNLABELLED && included(next) && grid[next] == value {
                        labels[next] = label;
                        queue.push_back(next);
                    }
                }
            }
        }

        sizes.push(size);
        values.push(value);
    }

    Components {
        labels,
        sizes,
        values,
    }
}

/// Sieve filter parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SieveParams {
    /// Regions with fewer pixels are merged into a neighbour
    pub threshold: usize,
    pub connectivity: Connectivity,
}

impl Default for SieveParams {
    fn default() -> Self {
        Self {
            threshold: 3,
            connectivity: Connectivity::Four,
        }
    }
}

/// Removes small regions by merging each into its largest neighbour
#[derive(Debug, Clone, Default)]
pub struct SieveFilter {
    params: SieveParams,
}

impl SieveFilter {
    pub fn new(params: SieveParams) -> Self {
        Self { params }
    }

    pub fn apply<T: Copy + PartialEq>(&self, grid: &Array2<T>) -> Array2<T> {
        let components = label_components(grid, None, self.params.connectivity);
        let count = components.len();
        let dim = grid.dim();

        let mut adjacency: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
        for ((row, col), &label) in components.labels.indexed_iter() {
            for &offset in self.params.connectivity.offsets() {
                if let Some(next) = neighbour((row, col), offset, dim) {
                    let other = components.labels[next];
                    if other != label {
                        adjacency[label].insert(other);
                    }
                }
            }
        }

        let mut parent: Vec<usize> = (0..count).collect();
        let mut size = components.sizes.clone();

        let mut small: Vec<usize> = (0..count)
            .filter(|&c| size[c] < self.params.threshold)
            .collect();
        small.sort_by_key(|&c| (size[c], c));

        let mut merged = 0;
        for region in small {
            let root = find(&mut parent, region);
            if size[root] >= self.params.threshold {
                continue;
            }

            let neighbours: BTreeSet<usize> = adjacency[root]
                .clone()
                .into_iter()
                .map(|n| find(&mut parent, n))
                .filter(|&n| n != root)
                .collect();

            // Largest neighbour wins, lowest label on ties
            let target = neighbours
                .iter()
                .copied()
                .max_by(|&a, &b| size[a].cmp(&size[b]).then(b.cmp(&a)));

            if let Some(target) = target {
                parent[root] = target;
                size[target] += size[root];
                let absorbed = std::mem::take(&mut adjacency[root]);
                adjacency[target].extend(absorbed);
                merged += 1;
            }
        }

        log::debug!(
            "Sieve: {} regions, {} merged (threshold {})",
            count,
            merged,
            self.params.threshold
        );

        let mut output = grid.clone();
        for ((row, col), &label) in components.labels.indexed_iter() {
            let root = find(&mut parent, label);
            output[[row, col]] = components.values[root];
        }
        output
    }
}

fn find(parent: &mut [usize], mut node: usize) -> usize {
    while parent[node] != node {
        parent[node] = parent[parent[node]];
        node = parent[node];
    }
    node
}
