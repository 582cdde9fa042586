//! Approximate nearest-neighbour search under cosine distance.
//!
//! [`HnswIndex`] is a hierarchical navigable small-world graph over
//! L2-normalized vectors. [`ScopeIndex`] picks between an exact flat scan
//! (small scopes) and the graph, and [`ScopeIndexCache`] keeps built
//! indexes per `(owner, course)` scope, keyed by the scope's stored version
//! and bounded in memory.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::mem::size_of;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::RetrievalConfig;
use crate::embedding::cosine_distance;
use crate::error::StoreError;
use crate::models::Scope;

const MAX_LEVEL: usize = 16;

/// Index construction and query parameters.
#[derive(Debug, Clone, Copy)]
pub struct AnnParams {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    /// Scopes with at most this many rows use an exact flat scan.
    pub flat_scan_threshold: usize,
    /// Byte budget for [`ScopeIndexCache`].
    pub cache_bytes: usize,
}

impl Default for AnnParams {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for AnnParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            m: config.ann_m.max(2),
            ef_construction: config.ann_ef_construction.max(1),
            ef_search: config.ann_ef_search.max(1),
            flat_scan_threshold: config.flat_scan_threshold,
            cache_bytes: config.index_cache_bytes,
        }
    }
}

/// Rank `(id, distance)` pairs ascending by distance, ties by id.
pub(crate) fn rank(mut scored: Vec<(i64, f32)>, k: usize) -> Vec<(i64, f32)> {
    scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}

fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return vec![0.0; vector.len()];
    }
    vector.iter().map(|x| x / norm).collect()
}

/// Distance between two normalized vectors; zero vectors sit at distance 1.
fn unit_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (1.0 - dot).clamp(0.0, 2.0)
}

#[derive(Debug, Clone, Copy)]
struct Scored(f32, usize);

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0).then(self.1.cmp(&other.1))
    }
}

struct Node {
    id: i64,
    vector: Vec<f32>,
    neighbors: Vec<Vec<usize>>,
}

pub struct HnswIndex {
    dims: usize,
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    ef_search: usize,
    level_mult: f64,
    nodes: Vec<Node>,
    entry: Option<usize>,
    max_level: usize,
    rng_state: u64,
}

impl HnswIndex {
    pub fn new(dims: usize, params: &AnnParams) -> Self {
        let m = params.m.max(2);
        Self {
            dims,
            m,
            m_max0: m * 2,
            ef_construction: params.ef_construction.max(m),
            ef_search: params.ef_search.max(1),
            level_mult: 1.0 / (m as f64).ln(),
            nodes: Vec::new(),
            entry: None,
            max_level: 0,
            rng_state: 0x9E37_79B9_7F4A_7C15,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn approx_bytes(&self) -> usize {
        let nodes: usize = self
            .nodes
            .iter()
            .map(|node| {
                size_of::<Node>()
                    + node.vector.len() * size_of::<f32>()
                    + node
                        .neighbors
                        .iter()
                        .map(|layer| size_of::<Vec<usize>>() + layer.len() * size_of::<usize>())
                        .sum::<usize>()
            })
            .sum();
        size_of::<Self>() + nodes
    }

    pub fn insert(&mut self, id: i64, vector: &[f32]) -> Result<(), StoreError> {
        if vector.len() != self.dims {
            return Err(StoreError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }

        let level = self.random_level();
        let idx = self.nodes.len();
        let query = normalize(vector);
        self.nodes.push(Node {
            id,
            vector: query.clone(),
            neighbors: vec![Vec::new(); level + 1],
        });

        let Some(entry) = self.entry else {
            self.entry = Some(idx);
            self.max_level = level;
            return Ok(());
        };

        let mut ep = entry;
        for layer in (level + 1..=self.max_level).rev() {
            ep = self.greedy(&query, ep, layer);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates = self.search_layer(&query, ep, self.ef_construction, layer);
            let max_conn = if layer == 0 { self.m_max0 } else { self.m };
            let selected: Vec<usize> = candidates
                .iter()
                .filter(|s| s.1 != idx)
                .take(self.m)
                .map(|s| s.1)
                .collect();

            for &n in &selected {
                self.nodes[n].neighbors[layer].push(idx);
                if self.nodes[n].neighbors[layer].len() > max_conn {
                    self.prune(n, layer, max_conn);
                }
            }
            self.nodes[idx].neighbors[layer] = selected;

            if let Some(closest) = candidates.first() {
                ep = closest.1;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry = Some(idx);
        }
        Ok(())
    }

    /// Return up to `k` `(id, distance)` pairs, nearest first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(i64, f32)> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        if k == 0 || query.len() != self.dims {
            return Vec::new();
        }

        let query = normalize(query);
        let mut ep = entry;
        for layer in (1..=self.max_level).rev() {
            ep = self.greedy(&query, ep, layer);
        }
        let found = self.search_layer(&query, ep, self.ef_search.max(k), 0);
        rank(
            found
                .into_iter()
                .map(|s| (self.nodes[s.1].id, s.0))
                .collect(),
            k,
        )
    }

    fn distance_to(&self, query: &[f32], idx: usize) -> f32 {
        unit_distance(query, &self.nodes[idx].vector)
    }

    fn greedy(&self, query: &[f32], mut ep: usize, layer: usize) -> usize {
        let mut best = self.distance_to(query, ep);
        loop {
            let mut changed = false;
            for &n in &self.nodes[ep].neighbors[layer] {
                let d = self.distance_to(query, n);
                if d < best {
                    best = d;
                    ep = n;
                    changed = true;
                }
            }
            if !changed {
                return ep;
            }
        }
    }

    /// Beam search on one layer; result is sorted nearest first.
    fn search_layer(&self, query: &[f32], ep: usize, ef: usize, layer: usize) -> Vec<Scored> {
        let mut visited = HashSet::new();
        let mut candidates = BinaryHeap::new();
        let mut results = BinaryHeap::new();

        let d = self.distance_to(query, ep);
        visited.insert(ep);
        candidates.push(Reverse(Scored(d, ep)));
        results.push(Scored(d, ep));

        while let Some(Reverse(Scored(d, current))) = candidates.pop() {
            let worst = results.peek().map(|s| s.0).unwrap_or(f32::INFINITY);
            if d > worst && results.len() >= ef {
                break;
            }
            for &n in &self.nodes[current].neighbors[layer] {
                if !visited.insert(n) {
                    continue;
                }
                let dn = self.distance_to(query, n);
                let worst = results.peek().map(|s| s.0).unwrap_or(f32::INFINITY);
                if results.len() < ef || dn < worst {
                    candidates.push(Reverse(Scored(dn, n)));
                    results.push(Scored(dn, n));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    fn prune(&mut self, idx: usize, layer: usize, max_conn: usize) {
        let base = self.nodes[idx].vector.clone();
        let mut scored: Vec<Scored> = self.nodes[idx].neighbors[layer]
            .iter()
            .map(|&n| Scored(unit_distance(&base, &self.nodes[n].vector), n))
            .collect();
        scored.sort();
        scored.truncate(max_conn);
        self.nodes[idx].neighbors[layer] = scored.into_iter().map(|s| s.1).collect();
    }

    fn random_level(&mut self) -> usize {
        // splitmix64
        self.rng_state = self.rng_state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.rng_state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        let uniform = ((z >> 11) as f64 / (1u64 << 53) as f64).max(1e-12);
        ((-uniform.ln() * self.level_mult) as usize).min(MAX_LEVEL)
    }
}

/// A built search structure for one scope.
pub enum ScopeIndex {
    Flat { dims: usize, rows: Vec<(i64, Vec<f32>)> },
    Graph(HnswIndex),
}

impl ScopeIndex {
    pub fn build(
        dims: usize,
        rows: Vec<(i64, Vec<f32>)>,
        params: &AnnParams,
    ) -> Result<Self, StoreError> {
        if rows.len() <= params.flat_scan_threshold {
            if let Some((_, v)) = rows.iter().find(|(_, v)| v.len() != dims) {
                return Err(StoreError::DimensionMismatch {
                    expected: dims,
                    actual: v.len(),
                });
            }
            return Ok(ScopeIndex::Flat { dims, rows });
        }
        let mut index = HnswIndex::new(dims, params);
        for (id, vector) in &rows {
            index.insert(*id, vector)?;
        }
        Ok(ScopeIndex::Graph(index))
    }

    pub fn len(&self) -> usize {
        match self {
            ScopeIndex::Flat { rows, .. } => rows.len(),
            ScopeIndex::Graph(index) => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_graph(&self) -> bool {
        matches!(self, ScopeIndex::Graph(_))
    }

    /// Rough heap footprint, used to bound [`ScopeIndexCache`].
    pub fn approx_bytes(&self) -> usize {
        match self {
            ScopeIndex::Flat { dims, rows } => {
                size_of::<Self>()
                    + rows.len() * (size_of::<(i64, Vec<f32>)>() + dims * size_of::<f32>())
            }
            ScopeIndex::Graph(index) => index.approx_bytes(),
        }
    }

    pub fn search(&self, query: &[f32], k: usize) -> Vec<(i64, f32)> {
        match self {
            ScopeIndex::Flat { dims, rows } => {
                if query.len() != *dims {
                    return Vec::new();
                }
                rank(
                    rows.iter()
                        .map(|(id, v)| (*id, cosine_distance(query, v)))
                        .collect(),
                    k,
                )
            }
            ScopeIndex::Graph(index) => index.search(query, k),
        }
    }
}

struct CachedIndex {
    version: i64,
    index: Arc<ScopeIndex>,
    bytes: usize,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<Scope, CachedIndex>,
    total_bytes: usize,
    clock: u64,
}

impl CacheState {
    fn remove(&mut self, scope: &Scope) {
        if let Some(entry) = self.entries.remove(scope) {
            self.total_bytes -= entry.bytes;
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Built indexes keyed by scope, tagged with the scope version they were
/// built from and bounded by an approximate byte budget.
///
/// The version lives in the database, so an entry built before another
/// process wrote to the scope no longer matches and is rebuilt. When the
/// budget is exceeded the least recently used scopes are dropped first.
pub struct ScopeIndexCache {
    max_bytes: usize,
    state: Mutex<CacheState>,
}

impl Default for ScopeIndexCache {
    fn default() -> Self {
        Self::new(AnnParams::default().cache_bytes)
    }
}

impl ScopeIndexCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// The cached index for `scope` if it was built at `version`.
    /// An entry from any other version is dropped.
    pub fn get(&self, scope: &Scope, version: i64) -> Option<Arc<ScopeIndex>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = state.tick();
        match state.entries.get_mut(scope) {
            Some(entry) if entry.version == version => {
                entry.last_used = now;
                return Some(entry.index.clone());
            }
            Some(_) => {}
            None => return None,
        }
        state.remove(scope);
        None
    }

    /// Cache `index` as the build of `scope` at `version` and hand it back.
    ///
    /// Empty indexes, indexes larger than the whole budget, and builds older
    /// than the entry already cached are returned without being kept.
    pub fn store(&self, scope: &Scope, version: i64, index: ScopeIndex) -> Arc<ScopeIndex> {
        let bytes = index.approx_bytes();
        let index = Arc::new(index);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state
            .entries
            .get(scope)
            .is_some_and(|entry| entry.version > version)
        {
            return index;
        }
        state.remove(scope);
        if index.is_empty() || bytes > self.max_bytes {
            return index;
        }

        while state.total_bytes + bytes > self.max_bytes {
            let Some(oldest) = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(scope, _)| scope.clone())
            else {
                break;
            };
            state.remove(&oldest);
        }

        let last_used = state.tick();
        state.total_bytes += bytes;
        state.entries.insert(
            scope.clone(),
            CachedIndex {
                version,
                index: index.clone(),
                bytes,
                last_used,
            },
        );
        index
    }

    /// Drop the cached index for `scope`.
    pub fn evict(&self, scope: &Scope) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.remove(scope);
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.total_bytes
    }
}
