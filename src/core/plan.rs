//! Plan lifecycle and scope lock.
//!
//! A plan moves `draft → approved → in_progress → completed`. A failing phase
//! pauses the plan (the lock is kept so work can resume without
//! re-approval) and any non-terminal plan can be cancelled. Approval derives a
//! [`PlanLock`] which is the allow-list every proposed edit is checked against.
//!
//! Transition preconditions that do not hold make the call a no-op that
//! returns `false`/`None`; nothing here raises on a bad transition.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::core::broker::DbBroker;
use crate::core::error::GateError;
use crate::core::pipeline::ScopeCheck;
use crate::core::plan_store::{MemoryPlanStore, PlanStore};
use crate::core::time;
use crate::core::trace;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Approved,
    InProgress,
    Paused,
    Completed,
    Cancelled,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Statuses under which the plan's lock is installed.
    pub fn holds_lock(&self) -> bool {
        matches!(self, Self::Approved | Self::InProgress | Self::Paused)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "approved" => Ok(Self::Approved),
            "in_progress" => Ok(Self::InProgress),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(GateError::ValidationError(format!(
                "Unknown plan status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn estimate(total_tasks: usize, total_files: usize, phase_count: usize) -> Self {
        if total_tasks > 10 || total_files > 5 || phase_count > 4 {
            Self::High
        } else if total_tasks > 5 || total_files > 3 || phase_count > 2 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl FromStr for Complexity {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(GateError::ValidationError(format!(
                "Unknown complexity: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlanTask {
    pub id: String,
    pub phase_id: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_changes: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlanPhase {
    pub id: String,
    pub plan_id: String,
    pub index: usize,
    pub title: String,
    pub status: PhaseStatus,
    pub tasks: Vec<PlanTask>,
    pub affected_files: BTreeSet<String>,
    #[serde(default)]
    pub estimated_tokens: u64,
    #[serde(default)]
    pub actual_tokens_used: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanMetadata {
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: PlanStatus,
    pub phases: Vec<PlanPhase>,
    pub current_phase_index: usize,
    /// Always the union of every phase's `affected_files`.
    pub affected_files: BTreeSet<String>,
    pub metadata: PlanMetadata,
    pub complexity: Complexity,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Checksum recorded at approval. Never recomputed from stored rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_checksum: Option<String>,
}

impl Plan {
    pub fn current_phase(&self) -> Option<&PlanPhase> {
        self.phases.get(self.current_phase_index)
    }

    pub fn total_tasks(&self) -> usize {
        self.phases.iter().map(|p| p.tasks.len()).sum()
    }

    /// True when the plan still hashes to the checksum recorded at approval.
    /// A plan without a recorded checksum never matches.
    pub fn lock_matches(&self) -> bool {
        self.lock_checksum
            .as_deref()
            .is_some_and(|recorded| recorded == compute_checksum(self))
    }

    fn refresh_derived(&mut self) {
        self.affected_files = self
            .phases
            .iter()
            .flat_map(|p| p.affected_files.iter().cloned())
            .collect();
        self.complexity = Complexity::estimate(
            self.total_tasks(),
            self.affected_files.len(),
            self.phases.len(),
        );
    }

    /// Read-only snapshot handed to validators.
    pub fn view(&self, lock: Option<&PlanLock>) -> PlanView {
        let phase = self.current_phase();
        PlanView {
            plan_id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            phase_id: phase.map(|p| p.id.clone()),
            phase_title: phase.map(|p| p.title.clone()),
            tasks: phase
                .map(|p| {
                    p.tasks
                        .iter()
                        .map(|t| TaskView {
                            description: t.description.clone(),
                            target_file: t.target_file.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            affected_files: self.affected_files.clone(),
            lock: lock.cloned(),
        }
    }
}

/// Scope allow-list derived from an approved plan.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlanLock {
    pub plan_id: String,
    pub allowed_files: BTreeSet<String>,
    #[serde(default)]
    pub allowed_functions: BTreeMap<String, BTreeSet<String>>,
    pub checksum: String,
}

impl PlanLock {
    pub fn derive(plan: &Plan) -> Self {
        Self {
            plan_id: plan.id.clone(),
            allowed_files: plan.affected_files.clone(),
            allowed_functions: allowed_functions(plan),
            checksum: plan.lock_checksum.clone().unwrap_or_default(),
        }
    }

    pub fn allows_file(&self, path: &str) -> bool {
        self.allowed_files.contains(&normalize_plan_path(path))
    }

    /// Files without a function allow-list accept any function.
    pub fn allows_function(&self, path: &str, name: &str) -> bool {
        let path = normalize_plan_path(path);
        match self.allowed_functions.get(&path) {
            Some(names) => names.contains(name),
            None => self.allowed_files.contains(&path),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskView {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,
}

/// What validators see of the active plan.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlanView {
    pub plan_id: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_title: Option<String>,
    /// Tasks of the current phase.
    #[serde(default)]
    pub tasks: Vec<TaskView>,
    #[serde(default)]
    pub affected_files: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<PlanLock>,
}

impl PlanView {
    /// Description plus task descriptions, used for relevance scoring.
    pub fn scope_text(&self) -> String {
        let mut text = self.description.clone();
        for task in &self.tasks {
            text.push(' ');
            text.push_str(&task.description);
        }
        text
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    pub description: String,
    #[serde(default)]
    pub target_file: Option<String>,
    #[serde(default)]
    pub expected_changes: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub title: String,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub affected_files: Vec<String>,
    #[serde(default)]
    pub estimated_tokens: u64,
}

/// Flat input from which a plan is built.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlanSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub phases: Vec<PhaseSpec>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

/// Structural edit of a draft plan.
#[derive(Clone, Debug, Default)]
pub struct PlanPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub phases: Option<Vec<PhaseSpec>>,
    pub assumptions: Option<Vec<String>>,
    pub risks: Option<Vec<String>>,
}

pub fn normalize_plan_path(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    let mut rest = unified.as_str();
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    rest.to_string()
}

fn build_phases(plan_id: &str, specs: Vec<PhaseSpec>) -> Vec<PlanPhase> {
    specs
        .into_iter()
        .enumerate()
        .map(|(index, spec)| {
            let phase_id = time::new_prefixed_id("phase");
            let tasks = spec
                .tasks
                .into_iter()
                .map(|t| PlanTask {
                    id: time::new_prefixed_id("task"),
                    phase_id: phase_id.clone(),
                    description: t.description,
                    status: TaskStatus::Pending,
                    target_file: t.target_file.map(|f| normalize_plan_path(&f)),
                    expected_changes: t.expected_changes,
                })
                .collect();
            PlanPhase {
                id: phase_id,
                plan_id: plan_id.to_string(),
                index,
                title: spec.title,
                status: PhaseStatus::Pending,
                tasks,
                affected_files: spec
                    .affected_files
                    .iter()
                    .map(|f| normalize_plan_path(f))
                    .filter(|f| !f.is_empty())
                    .collect(),
                estimated_tokens: spec.estimated_tokens,
                actual_tokens_used: 0,
                started_at: None,
                completed_at: None,
                error: None,
            }
        })
        .collect()
}

/// Content hash over phase titles, tasks and affected files.
pub fn compute_checksum(plan: &Plan) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plan.id.as_bytes());
    hasher.update([0u8]);
    for phase in &plan.phases {
        hasher.update(b"phase:");
        hasher.update(phase.title.as_bytes());
        hasher.update([0u8]);
        for task in &phase.tasks {
            hasher.update(b"task:");
            hasher.update(task.description.as_bytes());
            hasher.update([0u8]);
            hasher.update(task.target_file.as_deref().unwrap_or("").as_bytes());
            hasher.update([0u8]);
            hasher.update(task.expected_changes.as_deref().unwrap_or("").as_bytes());
            hasher.update([0u8]);
        }
        for file in &phase.affected_files {
            hasher.update(b"file:");
            hasher.update(file.as_bytes());
            hasher.update([0u8]);
        }
    }
    format!("{:x}", hasher.finalize())
}

static CALL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_$][\w$]*)\s*\(\)").unwrap());

/// Function names mentioned as `name()` in a task's expected changes become
/// that task's target-file function allow-list.
fn allowed_functions(plan: &Plan) -> BTreeMap<String, BTreeSet<String>> {
    let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for task in plan.phases.iter().flat_map(|p| p.tasks.iter()) {
        let (Some(file), Some(expected)) = (&task.target_file, &task.expected_changes) else {
            continue;
        };
        for cap in CALL_NAME.captures_iter(expected) {
            out.entry(file.clone())
                .or_default()
                .insert(cap[1].to_string());
        }
    }
    out
}

/// Human-readable structural problems; empty means the plan may be approved.
pub fn structural_issues(plan: &Plan) -> Vec<String> {
    let mut issues = Vec::new();
    if plan.title.trim().is_empty() {
        issues.push("Plan title is required".to_string());
    }
    if plan.phases.is_empty() {
        issues.push("Plan must have at least one phase".to_string());
    }
    for phase in &plan.phases {
        if phase.tasks.is_empty() {
            issues.push(format!(
                "Phase {} ({}) has no tasks",
                phase.index + 1,
                phase.title
            ));
        }
        if phase.affected_files.is_empty() {
            issues.push(format!(
                "Phase {} ({}) has no affected files",
                phase.index + 1,
                phase.title
            ));
        }
    }
    issues
}

/// Files listed by more than one phase. Allowed; reported for the audit log.
pub fn overlapping_files(plan: &Plan) -> Vec<String> {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for phase in &plan.phases {
        for file in &phase.affected_files {
            *seen.entry(file.as_str()).or_default() += 1;
        }
    }
    seen.into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(file, _)| file.to_string())
        .collect()
}

#[derive(Clone, Debug)]
struct ActivePlan {
    plan_id: String,
    lock: PlanLock,
}

/// Owns the plan table, the single active plan and its lock.
pub struct PlanManager {
    store: Box<dyn PlanStore>,
    plans: BTreeMap<String, Plan>,
    active: Option<ActivePlan>,
    broker: Option<DbBroker>,
    persist_errors: Vec<String>,
}

impl PlanManager {
    /// Load every stored plan and re-install the lock of the most recently
    /// approved plan that still holds one. The lock keeps the checksum stored
    /// at approval, so rows edited since then fail `verify_lock`.
    pub fn open(store: Box<dyn PlanStore>, broker: Option<DbBroker>) -> Result<Self, GateError> {
        let mut plans = BTreeMap::new();
        for mut plan in store.list()? {
            plan.refresh_derived();
            plans.insert(plan.id.clone(), plan);
        }
        let active = plans
            .values()
            .filter(|p| p.status.holds_lock())
            .max_by(|a, b| a.approved_at.cmp(&b.approved_at))
            .map(|p| ActivePlan {
                plan_id: p.id.clone(),
                lock: PlanLock::derive(p),
            });
        let manager = Self {
            store,
            plans,
            active,
            broker,
            persist_errors: Vec::new(),
        };
        if let Some(plan) = manager.active_plan()
            && !plan.lock_matches()
        {
            manager.note("plan.lock.verify", &plan.id, "error", json!({ "reason": "checksum mismatch" }));
        }
        Ok(manager)
    }

    pub fn in_memory() -> Self {
        Self {
            store: Box::new(MemoryPlanStore::default()),
            plans: BTreeMap::new(),
            active: None,
            broker: None,
            persist_errors: Vec::new(),
        }
    }

    pub fn create_plan(&mut self, spec: PlanSpec) -> Plan {
        let id = time::new_prefixed_id("plan");
        let mut plan = Plan {
            id: id.clone(),
            title: spec.title,
            description: spec.description,
            status: PlanStatus::Draft,
            phases: build_phases(&id, spec.phases),
            current_phase_index: 0,
            affected_files: BTreeSet::new(),
            metadata: PlanMetadata {
                assumptions: spec.assumptions,
                risks: spec.risks,
            },
            complexity: Complexity::Low,
            created_at: time::now_iso(),
            approved_at: None,
            completed_at: None,
            lock_checksum: None,
        };
        plan.refresh_derived();
        self.plans.insert(id, plan.clone());
        self.persist(&plan, "plan.create");
        plan
    }

    pub fn get_plan(&self, id: &str) -> Option<&Plan> {
        self.plans.get(id)
    }

    pub fn list_plans(&self) -> Vec<&Plan> {
        self.plans.values().collect()
    }

    pub fn validate_plan(&self, id: &str) -> Vec<String> {
        match self.plans.get(id) {
            Some(plan) => structural_issues(plan),
            None => vec![format!("Plan {id} not found")],
        }
    }

    /// Structural edits are only accepted while the plan is a draft.
    pub fn update_plan(&mut self, id: &str, patch: PlanPatch) -> bool {
        self.transition(id, "plan.update", |plan| {
            if plan.status != PlanStatus::Draft {
                return None;
            }
            if let Some(title) = patch.title {
                plan.title = title;
            }
            if let Some(description) = patch.description {
                plan.description = description;
            }
            if let Some(phases) = patch.phases {
                plan.phases = build_phases(&plan.id, phases);
                plan.current_phase_index = 0;
            }
            if let Some(assumptions) = patch.assumptions {
                plan.metadata.assumptions = assumptions;
            }
            if let Some(risks) = patch.risks {
                plan.metadata.risks = risks;
            }
            plan.refresh_derived();
            Some(())
        })
        .is_some()
    }

    pub fn approve_plan(&mut self, id: &str) -> bool {
        let Some(plan) = self.plans.get(id) else {
            return false;
        };
        if plan.status != PlanStatus::Draft {
            self.note("plan.approve", id, "rejected", json!({ "status": plan.status }));
            return false;
        }
        let issues = structural_issues(plan);
        if !issues.is_empty() {
            self.note("plan.approve", id, "rejected", json!({ "issues": issues }));
            return false;
        }
        let overlaps = overlapping_files(plan);
        if !overlaps.is_empty() {
            self.note("plan.overlap", id, "allowed", json!({ "files": overlaps }));
        }

        let approved = self.transition(id, "plan.approve", |plan| {
            plan.status = PlanStatus::Approved;
            plan.approved_at = Some(time::now_iso());
            plan.lock_checksum = Some(compute_checksum(plan));
            Some(PlanLock::derive(plan))
        });
        match approved {
            Some(lock) => {
                if let Some(previous) = &self.active
                    && previous.plan_id != id
                {
                    self.note(
                        "plan.active.replace",
                        id,
                        "success",
                        json!({ "previous": previous.plan_id }),
                    );
                }
                self.active = Some(ActivePlan {
                    plan_id: id.to_string(),
                    lock,
                });
                true
            }
            None => false,
        }
    }

    /// Refuses plans whose content drifted from the checksum recorded at
    /// approval.
    pub fn start_execution(&mut self, id: &str) -> bool {
        if let Some(plan) = self.plans.get(id)
            && plan.status == PlanStatus::Approved
            && !plan.lock_matches()
        {
            self.note("plan.start", id, "rejected", json!({ "reason": "checksum mismatch" }));
            return false;
        }
        self.transition(id, "plan.start", |plan| {
            if plan.status != PlanStatus::Approved {
                return None;
            }
            plan.status = PlanStatus::InProgress;
            let index = plan.current_phase_index;
            let phase = plan.phases.get_mut(index)?;
            phase.status = PhaseStatus::InProgress;
            phase.started_at = Some(time::now_iso());
            Some(())
        })
        .is_some()
    }

    /// Finish the current phase. Returns the next phase, or `None` when the
    /// plan just completed or the plan is not executing.
    pub fn complete_phase(&mut self, id: &str, tokens_used: u64) -> Option<PlanPhase> {
        let outcome = self.transition(id, "plan.phase.complete", |plan| {
            if plan.status != PlanStatus::InProgress {
                return None;
            }
            let now = time::now_iso();
            let index = plan.current_phase_index;
            let phase = plan.phases.get_mut(index)?;
            for task in &mut phase.tasks {
                task.status = TaskStatus::Completed;
            }
            phase.status = PhaseStatus::Completed;
            phase.actual_tokens_used += tokens_used;
            phase.completed_at = Some(now.clone());

            if index + 1 >= plan.phases.len() {
                plan.status = PlanStatus::Completed;
                plan.completed_at = Some(now);
                return Some(None);
            }
            plan.current_phase_index = index + 1;
            let next = &mut plan.phases[index + 1];
            next.status = PhaseStatus::InProgress;
            next.started_at = Some(now);
            Some(Some(next.clone()))
        })?;
        if outcome.is_none() {
            self.release_lock(id);
        }
        outcome
    }

    /// Mark the current phase failed and pause the plan. The lock survives.
    pub fn fail_phase(&mut self, id: &str, error: &str) -> bool {
        self.transition(id, "plan.phase.fail", |plan| {
            if plan.status != PlanStatus::InProgress {
                return None;
            }
            let index = plan.current_phase_index;
            let phase = plan.phases.get_mut(index)?;
            phase.status = PhaseStatus::Failed;
            phase.error = Some(error.to_string());
            plan.status = PlanStatus::Paused;
            Some(())
        })
        .is_some()
    }

    /// Resume a paused plan at its failed phase.
    pub fn resume_plan(&mut self, id: &str) -> bool {
        self.transition(id, "plan.resume", |plan| {
            if plan.status != PlanStatus::Paused {
                return None;
            }
            let index = plan.current_phase_index;
            let phase = plan.phases.get_mut(index)?;
            phase.status = PhaseStatus::InProgress;
            phase.error = None;
            plan.status = PlanStatus::InProgress;
            Some(())
        })
        .is_some()
    }

    pub fn cancel_plan(&mut self, id: &str) -> bool {
        let cancelled = self
            .transition(id, "plan.cancel", |plan| {
                if plan.status.is_terminal() {
                    return None;
                }
                plan.status = PlanStatus::Cancelled;
                Some(())
            })
            .is_some();
        if cancelled {
            self.release_lock(id);
        }
        cancelled
    }

    pub fn active_plan(&self) -> Option<&Plan> {
        self.active
            .as_ref()
            .and_then(|a| self.plans.get(&a.plan_id))
    }

    pub fn lock(&self) -> Option<&PlanLock> {
        self.active.as_ref().map(|a| &a.lock)
    }

    /// No lock means no active plan, which means unrestricted.
    pub fn is_file_allowed(&self, path: &str) -> bool {
        match self.lock() {
            None => true,
            Some(lock) => lock.allows_file(path),
        }
    }

    pub fn is_function_allowed(&self, path: &str, name: &str) -> bool {
        match self.lock() {
            None => true,
            Some(lock) => lock.allows_function(path, name),
        }
    }

    /// Recompute the checksum of the active plan and compare it with the lock
    /// installed at approval. False if anything drifted or `id` is not active.
    pub fn verify_lock(&self, id: &str) -> bool {
        let Some(active) = self.active.as_ref().filter(|a| a.plan_id == id) else {
            return false;
        };
        self.plans
            .get(id)
            .is_some_and(|plan| compute_checksum(plan) == active.lock.checksum)
    }

    pub fn active_view(&self) -> Option<PlanView> {
        let active = self.active.as_ref()?;
        let plan = self.plans.get(&active.plan_id)?;
        Some(plan.view(Some(&active.lock)))
    }

    /// Persistence failures collected since the last call. Transitions still
    /// take effect in memory when the store write fails.
    pub fn take_persist_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.persist_errors)
    }

    fn release_lock(&mut self, id: &str) {
        if self.active.as_ref().is_some_and(|a| a.plan_id == id) {
            self.active = None;
            self.note("plan.lock.release", id, "success", serde_json::Value::Null);
        }
    }

    fn transition<R>(
        &mut self,
        id: &str,
        op: &str,
        f: impl FnOnce(&mut Plan) -> Option<R>,
    ) -> Option<R> {
        let plan = self.plans.get_mut(id)?;
        let before = plan.status;
        let mut working = plan.clone();
        let outcome = f(&mut working);
        match outcome {
            Some(_) => {
                *plan = working.clone();
                self.persist(&working, op);
            }
            None => self.note(op, id, "rejected", json!({ "status": before })),
        }
        outcome
    }

    fn persist(&mut self, plan: &Plan, op: &str) {
        match self.store.save(plan) {
            Ok(()) => self.note(op, &plan.id, "success", json!({ "status": plan.status })),
            Err(e) => {
                let msg = format!("{op} {}: {e}", plan.id);
                self.note(op, &plan.id, "error", json!({ "error": e.to_string() }));
                self.persist_errors.push(msg);
            }
        }
    }

    fn note(&self, op: &str, subject: &str, status: &str, detail: serde_json::Value) {
        trace::trace(&format!("{op} {subject} {status}"));
        if let Some(broker) = &self.broker {
            broker.note("plan-manager", op, subject, status, detail);
        }
    }
}

impl ScopeCheck for PlanManager {
    fn active_plan_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.plan_id.as_str())
    }

    fn is_file_allowed(&self, path: &str) -> bool {
        PlanManager::is_file_allowed(self, path)
    }

    fn lock_intact(&self) -> bool {
        self.active
            .as_ref()
            .is_none_or(|active| self.verify_lock(&active.plan_id))
    }
}
