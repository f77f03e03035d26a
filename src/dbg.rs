/* De Bruijn graph reduction over a BWT.
 *
 * find_min_dbg searches a range of orders k for the one whose edge-reduced
 * de Bruijn graph keeps the fewest rows of the BWT, and returns the k-mer
 * interval bounds of the winner. mark_prefix_intervals turns those bounds
 * into the dout/din bit pair that the compaction step consumes.
 */

use std::collections::BTreeMap;

use simple_sds_sbwt::raw_vector::{AccessRaw, RawVector};

use crate::WaveletL;

/// Range of de Bruijn graph orders tried by [`find_min_dbg`].
#[derive(Clone, Debug)]
pub struct DbgParams {
    pub min_k: usize,
    pub max_k: usize,
}

impl Default for DbgParams {
    fn default() -> Self {
        DbgParams { min_k: 1, max_k: 4 }
    }
}

/// Outcome of the order search, for logging.
#[derive(Clone, Copy, Debug)]
pub struct DbgStats {
    /// Chosen de Bruijn graph order.
    pub k: usize,
    /// Number of distinct k-mer intervals at that order.
    pub nodes: usize,
    /// Rows of the BWT that survive edge reduction.
    pub edges: usize,
}

/* A tunnel is a chain of equally tall row intervals, each the LF-image of
 * the previous one. Every column except the last is uniform in L, so the
 * interior rows repeat information that the entry and exit columns carry.
 */
struct Tunnel {
    cols: Vec<usize>,
    height: usize,
}

impl Tunnel {
    fn saved(&self) -> usize {
        (self.cols.len() - 1) * (self.height - 1)
    }
}

/* Searches min_k..=max_k for the order whose reduced graph has the fewest
 * edges and returns its interval-bound bitvector B. B[i] = 1 iff row i
 * starts a new k-mer interval; ties go to the smaller order.
 */
pub fn find_min_dbg(l: &WaveletL, c: &[u64], params: &DbgParams) -> (DbgStats, RawVector) {
    let n = l.len();
    if n == 0 {
        let stats = DbgStats { k: params.min_k, nodes: 0, edges: 0 };
        return (stats, RawVector::new());
    }

    let psi = psi_array(l, c);
    let b1 = char_class_bounds(l, c, n);
    let mut b = b1.clone();
    let min_k = params.min_k.max(1);
    for _ in 1..min_k {
        b = refine(&b, &b1, &psi);
    }

    let mut k = min_k;
    let mut best_stats = DbgStats {
        k,
        nodes: ones(&b),
        edges: n - saved_rows(l, c, &b),
    };
    let mut best_b = b.clone();

    while k < params.max_k && ones(&b) < n {
        b = refine(&b, &b1, &psi);
        k += 1;
        let stats = DbgStats {
            k,
            nodes: ones(&b),
            edges: n - saved_rows(l, c, &b),
        };
        if stats.edges < best_stats.edges {
            best_stats = stats;
            best_b = b.clone();
        }
    }

    (best_stats, best_b)
}

/* Expands B into the dout/din pair of length n+1, sentinels included.
 * For every accepted tunnel, din loses the non-top rows of all columns but
 * the last (collapsed incoming edges) and dout loses the non-top rows of
 * all columns but the first (collapsed outgoing edges).
 */
pub fn mark_prefix_intervals(l: &WaveletL, c: &[u64], b: &RawVector) -> (RawVector, RawVector) {
    let n = l.len();
    let mut dout = RawVector::with_len(n + 1, true);
    let mut din = RawVector::with_len(n + 1, true);

    for tunnel in collect_tunnels(l, c, b) {
        let width = tunnel.cols.len();
        for (col, &start) in tunnel.cols.iter().enumerate() {
            for row in 1..tunnel.height {
                if col + 1 < width {
                    din.set_bit(start + row, false);
                }
                if col > 0 {
                    dout.set_bit(start + row, false);
                }
            }
        }
    }

    (dout, din)
}

// Inverse LF. psi[j] is the row whose LF-image is j.
fn psi_array(l: &WaveletL, c: &[u64]) -> Vec<usize> {
    let mut psi = vec![0; l.len()];
    for i in 0..l.len() {
        let (rank, sym) = l.inverse_select(i);
        psi[c[sym as usize] as usize + rank] = i;
    }
    psi
}

// Order-1 bounds: one interval per character of the first column.
fn char_class_bounds(l: &WaveletL, c: &[u64], n: usize) -> RawVector {
    let mut b = RawVector::with_len(n, false);
    for sym in 0..l.sigma() {
        if c[sym + 1] > c[sym] {
            b.set_bit(c[sym] as usize, true);
        }
    }
    b
}

/* One refinement round: rows j-1 and j stay in a common interval iff they
 * share the first character and their successor rows share an interval of
 * the previous order.
 */
fn refine(b: &RawVector, b1: &RawVector, psi: &[usize]) -> RawVector {
    let n = psi.len();
    let mut id = vec![0usize; n];
    let mut cur = 0;
    for j in 0..n {
        if b.bit(j) {
            cur += 1;
        }
        id[j] = cur;
    }

    let mut next = RawVector::with_len(n, false);
    next.set_bit(0, true);
    for j in 1..n {
        if b1.bit(j) || id[psi[j]] != id[psi[j - 1]] {
            next.set_bit(j, true);
        }
    }
    next
}

fn saved_rows(l: &WaveletL, c: &[u64], b: &RawVector) -> usize {
    collect_tunnels(l, c, b).iter().map(Tunnel::saved).sum()
}

/* Collects the tunnels used for a given set of interval bounds. Entry
 * columns are the maximal uniform runs inside a single interval; chains
 * follow LF-images while they stay uniform. Tunnels are then picked
 * greedily by saved rows, keeping only those whose columns are disjoint
 * from every column picked before.
 */
fn collect_tunnels(l: &WaveletL, c: &[u64], b: &RawVector) -> Vec<Tunnel> {
    let n = l.len();
    let mut candidates = Vec::new();
    let mut start = 0;
    for i in 1..=n {
        if i == n || b.bit(i) || l.access(i) != l.access(start) {
            if i - start >= 2 {
                if let Some(tunnel) = grow_tunnel(l, c, start, i - start) {
                    candidates.push(tunnel);
                }
            }
            start = i;
        }
    }

    candidates.sort_by(|x, y| y.saved().cmp(&x.saved()).then(x.cols[0].cmp(&y.cols[0])));

    let mut taken: BTreeMap<usize, usize> = BTreeMap::new();
    let mut tunnels = Vec::new();
    for tunnel in candidates {
        let free = tunnel
            .cols
            .iter()
            .all(|&s| !overlaps(&taken, s, s + tunnel.height));
        if !free {
            continue;
        }
        for &s in &tunnel.cols {
            taken.insert(s, s + tunnel.height);
        }
        tunnels.push(tunnel);
    }
    tunnels
}

/* Follows LF-images from an entry run. The chain stops at the first
 * column that is not uniform (it becomes the exit) or before an image
 * that would overlap the chain itself, which rejects self-overlapping
 * repeats such as character runs of the text.
 */
fn grow_tunnel(l: &WaveletL, c: &[u64], start: usize, height: usize) -> Option<Tunnel> {
    let mut cols = vec![start];
    let mut cur = start;
    let mut sym = l.access(start);
    loop {
        let img = c[sym as usize] as usize + l.rank(sym, cur);
        if cols.iter().any(|&s| s.abs_diff(img) < height) {
            break;
        }
        cols.push(img);
        match uniform(l, img, height) {
            Some(next) => {
                cur = img;
                sym = next;
            }
            None => break,
        }
    }
    if cols.len() >= 2 {
        Some(Tunnel { cols, height })
    } else {
        None
    }
}

fn uniform(l: &WaveletL, start: usize, height: usize) -> Option<u8> {
    let sym = l.access(start);
    if l.rank(sym, start + height) - l.rank(sym, start) == height {
        Some(sym)
    } else {
        None
    }
}

fn overlaps(taken: &BTreeMap<usize, usize>, start: usize, end: usize) -> bool {
    if let Some((_, &prev_end)) = taken.range(..=start).next_back() {
        if prev_end > start {
            return true;
        }
    }
    if let Some((&next_start, _)) = taken.range(start..).next() {
        if next_start < end {
            return true;
        }
    }
    false
}

fn ones(bits: &RawVector) -> usize {
    (0..bits.len()).filter(|&i| bits.bit(i)).count()
}
