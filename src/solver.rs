use crate::cancel::{CancelToken, Cancelled, Progress};
use crate::candidates::{Candidate, CandidatePool, Credit, UNRANKED};
use crate::config::{SearchConfig, StrategyKind};
use crate::data::CourseId;
use crate::mask::TimeMask;
use log::{debug, info, trace};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;

/// Depth of the decision tree used to measure branch-and-bound progress.
const PROGRESS_DEPTH: usize = 10;

/// Inner-loop iterations between cancellation polls.
const POLL_INTERVAL: usize = 1024;

/// One ranked, conflict-free schedule: locked ids plus the selected candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleResult {
    pub credits: Credit,
    pub gened: u32,
    /// Sorted ascending.
    pub ids: Vec<CourseId>,
    /// Sorted priority ranks of `ids`.
    pub order_key: Vec<u64>,
    pub priority_sum: u64,
}

impl ScheduleResult {
    /// Best first: more credits, then smaller priority sum, then smaller rank sequence.
    pub fn rank_cmp(&self, other: &ScheduleResult) -> Ordering {
        other
            .credits
            .cmp(&self.credits)
            .then(self.priority_sum.cmp(&other.priority_sum))
            .then_with(|| self.order_key.cmp(&other.order_key))
    }
}

/// Running top-k of distinct id sets.
#[derive(Debug, Clone)]
pub struct Leaderboard {
    entries: Vec<ScheduleResult>,
    capacity: usize,
}

impl Leaderboard {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity + 1),
            capacity: capacity.max(1),
        }
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// The last kept entry, once the board is full.
    pub fn worst(&self) -> Option<&ScheduleResult> {
        if self.is_full() { self.entries.last() } else { None }
    }

    /// Whether a result with this credit and priority sum could still be kept.
    pub fn could_enter(&self, credits: Credit, priority_sum: u64) -> bool {
        match self.worst() {
            None => true,
            Some(w) => credits > w.credits || (credits == w.credits && priority_sum <= w.priority_sum),
        }
    }

    pub fn offer(&mut self, result: ScheduleResult) -> bool {
        if self.entries.iter().any(|e| e.ids == result.ids) {
            return false;
        }
        let pos = self
            .entries
            .partition_point(|e| e.rank_cmp(&result) != Ordering::Greater);
        if pos >= self.capacity {
            return false;
        }
        self.entries.insert(pos, result);
        self.entries.truncate(self.capacity);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<ScheduleResult> {
        self.entries
    }
}

/// Search actually run for a given input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    BranchAndBound,
    MeetInTheMiddle,
}

pub fn select_strategy(candidate_count: usize, config: &SearchConfig) -> Strategy {
    match config.strategy {
        StrategyKind::BranchAndBound => Strategy::BranchAndBound,
        StrategyKind::MeetInTheMiddle => Strategy::MeetInTheMiddle,
        StrategyKind::Auto if candidate_count <= config.exact_limit => Strategy::BranchAndBound,
        StrategyKind::Auto => Strategy::MeetInTheMiddle,
    }
}

fn rank_of(ranks: &HashMap<CourseId, u64>, id: CourseId) -> u64 {
    ranks.get(&id).copied().unwrap_or(UNRANKED)
}

fn assemble(
    pool: &CandidatePool,
    ranks: &HashMap<CourseId, u64>,
    selected: impl IntoIterator<Item = CourseId>,
    credit: Credit,
    gened: u32,
) -> ScheduleResult {
    let mut ids: Vec<CourseId> = pool.locked_ids.iter().copied().chain(selected).collect();
    ids.sort_unstable();
    ids.dedup();
    let mut order_key: Vec<u64> = ids.iter().map(|id| rank_of(ranks, *id)).collect();
    order_key.sort_unstable();
    let priority_sum = order_key.iter().sum();
    ScheduleResult {
        credits: pool.base_credit + credit,
        gened: pool.base_gened + gened,
        ids,
        order_key,
        priority_sum,
    }
}

/// Finds the best `max_results` schedules of the pool.
///
/// Returns an empty list when there is nothing to optimize and
/// `Err(Cancelled)` as soon as the token is observed set.
pub fn find_best_schedules(
    pool: &CandidatePool,
    ranks: &HashMap<CourseId, u64>,
    config: &SearchConfig,
    cancel: &CancelToken,
    progress: &mut Progress<'_>,
) -> Result<Vec<ScheduleResult>, Cancelled> {
    cancel.check()?;
    if pool.is_empty() {
        debug!("nothing to optimize");
        return Ok(Vec::new());
    }

    let start_time = Instant::now();
    let strategy = select_strategy(pool.candidates.len(), config);
    info!(
        "Searching best schedules over {} candidates ({} locked) using {:?}...",
        pool.candidates.len(),
        pool.locked_ids.len(),
        strategy
    );
    progress.report(0);

    let results = match strategy {
        Strategy::BranchAndBound => branch_and_bound(pool, ranks, config, cancel, progress)?,
        Strategy::MeetInTheMiddle => meet_in_the_middle(pool, ranks, config, cancel, progress)?,
    };

    progress.report(100);
    info!(
        "Found {} schedules in {:.2?}",
        results.len(),
        start_time.elapsed()
    );
    Ok(results)
}

// ---------------------------------------------------------------------------
// branch and bound

struct BranchAndBound<'a, 'p> {
    pool: &'a CandidatePool,
    ranks: &'a HashMap<CourseId, u64>,
    cancel: &'a CancelToken,
    progress: &'a mut Progress<'p>,
    suffix_max: Vec<Credit>,
    selected: Vec<CourseId>,
    board: Leaderboard,
    progress_depth: usize,
    progress_done: u64,
}

impl BranchAndBound<'_, '_> {
    /// Credits the finished subtree rooted at `depth` to the progress counter.
    fn account(&mut self, depth: usize) {
        if depth > self.progress_depth {
            return;
        }
        self.progress_done += 1 << (self.progress_depth - depth);
        self.progress
            .report_span(0, 99, self.progress_done, 1 << self.progress_depth);
    }

    fn dfs(&mut self, idx: usize, mask: TimeMask, credit: Credit, gened: u32) -> Result<(), Cancelled> {
        self.cancel.check()?;
        let pool = self.pool;
        let n = pool.candidates.len();

        if idx >= n {
            let result = assemble(pool, self.ranks, self.selected.iter().copied(), credit, gened);
            self.board.offer(result);
            self.account(idx);
            return Ok(());
        }

        // bound
        if let Some(worst_credits) = self.board.worst().map(|w| w.credits) {
            let max_possible = pool.base_credit + credit + self.suffix_max[idx];
            if max_possible < worst_credits {
                self.account(idx);
                return Ok(());
            }
        }

        let item = &pool.candidates[idx];
        if !mask.intersects(&item.mask) {
            self.selected.push(item.id);
            self.dfs(idx + 1, mask | item.mask, credit + item.credit, gened + item.gened)?;
            self.selected.pop();
        } else {
            self.account(idx + 1);
        }

        self.dfs(idx + 1, mask, credit, gened)?;

        if idx == self.progress_depth {
            self.account(idx);
        }
        Ok(())
    }
}

fn branch_and_bound(
    pool: &CandidatePool,
    ranks: &HashMap<CourseId, u64>,
    config: &SearchConfig,
    cancel: &CancelToken,
    progress: &mut Progress<'_>,
) -> Result<Vec<ScheduleResult>, Cancelled> {
    let n = pool.candidates.len();
    let mut suffix_max = vec![Credit::ZERO; n + 1];
    for i in (0..n).rev() {
        suffix_max[i] = suffix_max[i + 1] + pool.candidates[i].credit;
    }

    let mut search = BranchAndBound {
        pool,
        ranks,
        cancel,
        progress,
        suffix_max,
        selected: Vec::with_capacity(n),
        board: Leaderboard::new(config.max_results),
        progress_depth: n.min(PROGRESS_DEPTH),
        progress_done: 0,
    };
    search.dfs(0, pool.base_mask, Credit::ZERO, 0)?;
    Ok(search.board.into_vec())
}

// ---------------------------------------------------------------------------
// meet in the middle

/// One step of a reconstructed id path; parents are arena indices.
#[derive(Debug, Clone, Copy)]
struct PathNode {
    id: CourseId,
    rank: u64,
    parent: Option<u32>,
}

#[derive(Debug, Default)]
struct PathArena {
    nodes: Vec<PathNode>,
}

impl PathArena {
    fn push(&mut self, id: CourseId, rank: u64, parent: Option<u32>) -> u32 {
        self.nodes.push(PathNode { id, rank, parent });
        (self.nodes.len() - 1) as u32
    }

    fn walk(&self, mut at: Option<u32>) -> impl Iterator<Item = &PathNode> + '_ {
        std::iter::from_fn(move || {
            let node = &self.nodes[at? as usize];
            at = node.parent;
            Some(node)
        })
    }

    fn sorted_ranks(&self, at: Option<u32>, extra: Option<u64>) -> Vec<u64> {
        let mut ranks: Vec<u64> = self.walk(at).map(|n| n.rank).chain(extra).collect();
        ranks.sort_unstable();
        ranks
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Drops every node not reachable from a live state, rewriting their paths.
    fn compact<'s>(&mut self, states: impl Iterator<Item = &'s mut HalfState>) {
        let mut nodes = Vec::new();
        let mut remap: HashMap<u32, u32> = HashMap::new();
        for state in states {
            let mut chain = Vec::new();
            let mut cur = state.path;
            let mut anchor = None;
            while let Some(i) = cur {
                if let Some(&moved) = remap.get(&i) {
                    anchor = Some(moved);
                    break;
                }
                chain.push(i);
                cur = self.nodes[i as usize].parent;
            }
            let mut parent = anchor;
            for &i in chain.iter().rev() {
                let old = self.nodes[i as usize];
                nodes.push(PathNode { parent, ..old });
                let new = (nodes.len() - 1) as u32;
                remap.insert(i, new);
                parent = Some(new);
            }
            state.path = parent;
        }
        self.nodes = nodes;
    }
}

/// Best known subset of one half for a given occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HalfState {
    mask: TimeMask,
    credit: Credit,
    gened: u32,
    priority_sum: u64,
    path: Option<u32>,
}

impl HalfState {
    const ROOT: HalfState = HalfState {
        mask: TimeMask::EMPTY,
        credit: Credit::ZERO,
        gened: 0,
        priority_sum: 0,
        path: None,
    };
}

/// Credit descending, priority sum ascending; mask makes it total within one map.
fn beam_order(a: &HalfState, b: &HalfState) -> Ordering {
    b.credit
        .cmp(&a.credit)
        .then(a.priority_sum.cmp(&b.priority_sum))
        .then(a.mask.cmp(&b.mask))
}

struct HalfEnumeration {
    states: Vec<HalfState>,
    arena: PathArena,
    beam: bool,
    /// Largest live state count seen after any fold step.
    peak: usize,
}

/// Folds `items` one at a time into a mask-keyed map of dominant states.
///
/// Above `beam_threshold` items the map is cut back to the best `beam_width`
/// states after every fold, which may lose optimal subsets. The empty-mask
/// state is always among the survivors.
fn enumerate_half(
    items: &[Candidate],
    ranks: &HashMap<CourseId, u64>,
    config: &SearchConfig,
    cancel: &CancelToken,
    progress: &mut Progress<'_>,
    band: (u8, u8),
) -> Result<HalfEnumeration, Cancelled> {
    let beam = items.len() > config.beam_threshold;
    let width = config.beam_width.max(1);
    if beam {
        info!(
            "half of {} candidates exceeds {}; switching to beam search (width {})",
            items.len(),
            config.beam_threshold,
            width
        );
    }

    let mut arena = PathArena::default();
    let mut states: HashMap<TimeMask, HalfState> = HashMap::from([(TimeMask::EMPTY, HalfState::ROOT)]);
    let mut peak = states.len();

    for (i, item) in items.iter().enumerate() {
        cancel.check()?;
        let rank = rank_of(ranks, item.id);
        let snapshot: Vec<HalfState> = states.values().copied().collect();

        for (k, state) in snapshot.iter().enumerate() {
            if k % POLL_INTERVAL == 0 {
                cancel.check()?;
            }
            if state.mask.intersects(&item.mask) {
                continue;
            }
            let next = HalfState {
                mask: state.mask | item.mask,
                credit: state.credit + item.credit,
                gened: state.gened + item.gened,
                priority_sum: state.priority_sum + rank,
                path: state.path,
            };
            if let Some(existing) = states.get(&next.mask) {
                let wins = next.credit.cmp(&existing.credit).then(existing.priority_sum.cmp(&next.priority_sum));
                let wins = wins.then_with(|| {
                    arena
                        .sorted_ranks(existing.path, None)
                        .cmp(&arena.sorted_ranks(state.path, Some(rank)))
                });
                if wins != Ordering::Greater {
                    continue;
                }
            }
            let node = arena.push(item.id, rank, state.path);
            states.insert(next.mask, HalfState { path: Some(node), ..next });
        }

        if beam && states.len() > width {
            // the empty-mask state always survives so every state keeps a partner
            let root = states.remove(&TimeMask::EMPTY).unwrap_or(HalfState::ROOT);
            let keep = width - 1;
            let mut kept: Vec<HalfState> = states.drain().map(|(_, s)| s).collect();
            if keep > 0 && kept.len() > keep {
                kept.select_nth_unstable_by(keep - 1, beam_order);
            }
            kept.truncate(keep);
            states.extend(kept.into_iter().map(|s| (s.mask, s)));
            states.insert(TimeMask::EMPTY, root);
        }
        peak = peak.max(states.len());

        if arena.len() > 4 * states.len() + 4096 {
            arena.compact(states.values_mut());
        }
        trace!("folded candidate {}: {} live states", item.id, states.len());
        progress.report_span(band.0, band.1, (i + 1) as u64, items.len() as u64);
    }

    let mut states: Vec<HalfState> = states.into_values().collect();
    states.sort_unstable_by(beam_order);
    Ok(HalfEnumeration {
        states,
        arena,
        beam,
        peak,
    })
}

fn meet_in_the_middle(
    pool: &CandidatePool,
    ranks: &HashMap<CourseId, u64>,
    config: &SearchConfig,
    cancel: &CancelToken,
    progress: &mut Progress<'_>,
) -> Result<Vec<ScheduleResult>, Cancelled> {
    // anything clashing with the locked base can never be selected
    let usable: Vec<Candidate> = pool
        .candidates
        .iter()
        .filter(|c| !c.mask.intersects(&pool.base_mask))
        .cloned()
        .collect();
    let (left_items, right_items) = usable.split_at(usable.len() / 2);

    let left = enumerate_half(left_items, ranks, config, cancel, progress, (0, 40))?;
    let right = enumerate_half(right_items, ranks, config, cancel, progress, (40, 80))?;
    debug!(
        "half states: left {} (beam: {}, peak {}), right {} (beam: {}, peak {})",
        left.states.len(),
        left.beam,
        left.peak,
        right.states.len(),
        right.beam,
        right.peak
    );

    let base_priority: u64 = pool.locked_ids.iter().map(|id| rank_of(ranks, *id)).sum();
    let mut board = Leaderboard::new(config.max_results);
    let mut polls = 0usize;

    // both lists are sorted by credit desc, priority sum asc
    'left: for (i, l) in left.states.iter().enumerate() {
        cancel.check()?;
        for (j, r) in right.states.iter().enumerate() {
            polls += 1;
            if polls % POLL_INTERVAL == 0 {
                cancel.check()?;
            }
            let credits = pool.base_credit + l.credit + r.credit;
            let priority_sum = base_priority + l.priority_sum + r.priority_sum;
            if !board.could_enter(credits, priority_sum) {
                if j == 0 {
                    break 'left;
                }
                break;
            }
            if l.mask.intersects(&r.mask) {
                continue;
            }
            let selected = left
                .arena
                .walk(l.path)
                .chain(right.arena.walk(r.path))
                .map(|n| n.id);
            let result = assemble(pool, ranks, selected, l.credit + r.credit, l.gened + r.gened);
            board.offer(result);
        }
        progress.report_span(80, 99, (i + 1) as u64, left.states.len() as u64);
    }

    Ok(board.into_vec())
}
