//! Sessions and per-stage progress.
//!
//! A session is one bulk-research job: a keyword, a target product count,
//! and four pipeline stages (`search`, `splitting`, `demand`, `keywords`)
//! each tracked as `{total, remaining}`. Sessions are created optimistically
//! on a successful start request and thereafter mutated only by stream
//! events, polling reconciliation, or reconnect responses.

use serde::{Deserialize, Serialize};

/// Opaque session identifier, stable for the job's lifetime.
pub type SessionId = String;

/// Upper bound accepted for `desired_total` on creation.
pub const MAX_DESIRED_TOTAL: u64 = 500;

/// Default `splitting` stage total when a completed session never reported one.
const DEFAULT_SPLITTING_TOTAL: u64 = 2;

/// Session lifecycle status. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Ongoing,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Terminal statuses never regress and never re-attach a stream.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The four pipeline stages tracked per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Search,
    Splitting,
    Demand,
    Keywords,
}

impl Stage {
    /// All stages, in pipeline order.
    pub const ALL: [Stage; 4] = [Stage::Search, Stage::Splitting, Stage::Demand, Stage::Keywords];

    /// Map a wire-format stage name to a progress stage.
    ///
    /// `demand_extraction` and both keyword-research spellings collapse onto
    /// their local stage; `snapshot`/`completed` and anything unknown are not
    /// progress stages and return `None`.
    pub fn from_wire(stage: &str) -> Option<Stage> {
        match stage.to_ascii_lowercase().as_str() {
            "search" => Some(Stage::Search),
            "splitting" => Some(Stage::Splitting),
            "demand_extraction" => Some(Stage::Demand),
            "ai_keywords" | "keywords_research" => Some(Stage::Keywords),
            _ => None,
        }
    }
}

/// `{total, remaining}` for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    pub total: u64,
    pub remaining: u64,
}

impl StageProgress {
    pub fn new(total: u64, remaining: u64) -> Self {
        Self { total, remaining }
    }

    /// Completed units, clamped so a raised `remaining` can't go negative.
    pub fn done(&self) -> u64 {
        self.total.saturating_sub(self.remaining)
    }
}

/// Per-stage progress for all four stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub search: StageProgress,
    #[serde(default)]
    pub splitting: StageProgress,
    #[serde(default)]
    pub demand: StageProgress,
    #[serde(default)]
    pub keywords: StageProgress,
}

impl Progress {
    /// Initial progress for a freshly started job: every stage starts with
    /// the full desired total outstanding.
    pub fn initial(desired_total: u64) -> Self {
        let full = StageProgress::new(desired_total, desired_total);
        Self {
            search: full,
            splitting: full,
            demand: full,
            keywords: full,
        }
    }

    pub fn stage(&self, stage: Stage) -> &StageProgress {
        match stage {
            Stage::Search => &self.search,
            Stage::Splitting => &self.splitting,
            Stage::Demand => &self.demand,
            Stage::Keywords => &self.keywords,
        }
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageProgress {
        match stage {
            Stage::Search => &mut self.search,
            Stage::Splitting => &mut self.splitting,
            Stage::Demand => &mut self.demand,
            Stage::Keywords => &mut self.keywords,
        }
    }

    /// True when every stage reports zero remaining work.
    pub fn is_full(&self) -> bool {
        Stage::ALL.iter().all(|s| self.stage(*s).remaining == 0)
    }
}

/// A stage update where either field may be absent (stream stage events and
/// polling payloads both carry partial values).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialStageProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
}

impl PartialStageProgress {
    /// True when at least one field carries a value.
    pub fn has_value(&self) -> bool {
        self.total.is_some() || self.remaining.is_some()
    }
}

/// A progress object where any stage may be absent. Used by the polling
/// reconciliation's shallow merge: apply what's present, leave the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<PartialStageProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub splitting: Option<PartialStageProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demand: Option<PartialStageProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<PartialStageProgress>,
}

impl PartialProgress {
    pub fn stage(&self, stage: Stage) -> Option<&PartialStageProgress> {
        match stage {
            Stage::Search => self.search.as_ref(),
            Stage::Splitting => self.splitting.as_ref(),
            Stage::Demand => self.demand.as_ref(),
            Stage::Keywords => self.keywords.as_ref(),
        }
    }
}

/// One bulk-research job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub keyword: String,
    pub desired_total: u64,
    pub status: SessionStatus,
    #[serde(default)]
    pub progress: Progress,
    /// RFC 3339 creation timestamp, used for display ordering and cache
    /// provenance.
    pub created_at: String,
    /// Latest known result count, from snapshots or polling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries_count: Option<u64>,
}

impl Session {
    /// Optimistic local session inserted right after a successful start
    /// request, before any server event has been observed.
    pub fn optimistic(id: impl Into<SessionId>, keyword: impl Into<String>, desired_total: u64) -> Self {
        Self {
            id: id.into(),
            keyword: keyword.into(),
            desired_total,
            status: SessionStatus::Ongoing,
            progress: Progress::initial(desired_total),
            created_at: chrono::Utc::now().to_rfc3339(),
            entries_count: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Adopt a remote status without ever regressing a terminal local one.
    /// Returns true when the status actually changed.
    pub fn adopt_status(&mut self, remote: SessionStatus) -> bool {
        if self.status.is_terminal() || remote == self.status {
            return false;
        }
        self.status = remote;
        true
    }

    /// Apply a stage event's partial `{total, remaining}` update.
    pub fn apply_stage_update(&mut self, stage: Stage, update: PartialStageProgress) {
        let sp = self.progress.stage_mut(stage);
        if let Some(total) = update.total {
            sp.total = total;
        }
        if let Some(remaining) = update.remaining {
            sp.remaining = remaining;
        }
    }

    /// Normalize progress for a completed session so progress always reads
    /// 100% even when intermediate events were lost:
    ///
    /// - `search.total` becomes the desired total (when positive);
    /// - `splitting.total` keeps its discovered value, defaulting to 2;
    /// - `demand.total` is raised to at least the known result count;
    /// - `keywords.total` keeps its discovered value;
    /// - every stage's `remaining` drops to 0.
    pub fn normalize_completed(&mut self, entries_count: Option<u64>) {
        let known_count = entries_count.or(self.entries_count);

        let search = self.progress.stage_mut(Stage::Search);
        if self.desired_total > 0 {
            search.total = self.desired_total;
        }
        search.remaining = 0;

        let splitting = self.progress.stage_mut(Stage::Splitting);
        if splitting.total == 0 {
            splitting.total = DEFAULT_SPLITTING_TOTAL;
        }
        splitting.remaining = 0;

        let demand = self.progress.stage_mut(Stage::Demand);
        if let Some(count) = known_count {
            demand.total = demand.total.max(count);
        }
        demand.remaining = 0;

        self.progress.stage_mut(Stage::Keywords).remaining = 0;
    }

    /// Shallow per-stage merge of a polled remote progress object: a stage is
    /// overwritten only when the remote carries a value that actually differs;
    /// absent stages keep their local values. Returns true if anything changed.
    pub fn merge_remote_progress(&mut self, remote: &PartialProgress) -> bool {
        let mut changed = false;
        for stage in Stage::ALL {
            let Some(rp) = remote.stage(stage) else { continue };
            if !rp.has_value() {
                continue;
            }
            let lp = *self.progress.stage(stage);
            let next = StageProgress {
                total: rp.total.unwrap_or(lp.total),
                remaining: rp.remaining.unwrap_or(lp.remaining),
            };
            if next != lp {
                *self.progress.stage_mut(stage) = next;
                changed = true;
            }
        }
        changed
    }
}

/// Clamp a requested desired total into the accepted range `1..=500`.
pub fn clamp_desired_total(requested: u64) -> u64 {
    requested.clamp(1, MAX_DESIRED_TOTAL)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
