//! Persistence seam for plans.
//!
//! The SQLite store keeps one row per plan with nested phases, files and
//! metadata as JSON columns. Every access goes through the broker so it is
//! serialized and audited.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::GateError;
use crate::core::plan::{Complexity, Plan, PlanStatus};
use crate::core::schemas;
use crate::core::store::Store;

pub trait PlanStore {
    fn load(&self, id: &str) -> Result<Option<Plan>, GateError>;
    fn save(&self, plan: &Plan) -> Result<(), GateError>;
    fn list(&self) -> Result<Vec<Plan>, GateError>;
}

#[derive(Default)]
pub struct MemoryPlanStore {
    plans: RefCell<BTreeMap<String, Plan>>,
}

impl PlanStore for MemoryPlanStore {
    fn load(&self, id: &str) -> Result<Option<Plan>, GateError> {
        Ok(self.plans.borrow().get(id).cloned())
    }

    fn save(&self, plan: &Plan) -> Result<(), GateError> {
        self.plans
            .borrow_mut()
            .insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Plan>, GateError> {
        Ok(self.plans.borrow().values().cloned().collect())
    }
}

pub struct SqlitePlanStore {
    broker: DbBroker,
    db_path: PathBuf,
}

const PLAN_COLUMNS: &str = "id, title, description, status, phases, current_phase_index, \
     affected_files, metadata, complexity, created_at, approved_at, completed_at, lock_checksum";

struct PlanRow {
    id: String,
    title: String,
    description: String,
    status: String,
    phases: String,
    current_phase_index: i64,
    affected_files: String,
    metadata: String,
    complexity: String,
    created_at: String,
    approved_at: Option<String>,
    completed_at: Option<String>,
    lock_checksum: Option<String>,
}

impl PlanRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            status: row.get(3)?,
            phases: row.get(4)?,
            current_phase_index: row.get(5)?,
            affected_files: row.get(6)?,
            metadata: row.get(7)?,
            complexity: row.get(8)?,
            created_at: row.get(9)?,
            approved_at: row.get(10)?,
            completed_at: row.get(11)?,
            lock_checksum: row.get(12)?,
        })
    }

    fn into_plan(self) -> Result<Plan, GateError> {
        Ok(Plan {
            id: self.id,
            title: self.title,
            description: self.description,
            status: self.status.parse::<PlanStatus>()?,
            phases: serde_json::from_str(&self.phases)?,
            current_phase_index: self.current_phase_index.max(0) as usize,
            affected_files: serde_json::from_str(&self.affected_files)?,
            metadata: serde_json::from_str(&self.metadata)?,
            complexity: self.complexity.parse::<Complexity>()?,
            created_at: self.created_at,
            approved_at: self.approved_at,
            completed_at: self.completed_at,
            lock_checksum: self.lock_checksum,
        })
    }
}

impl SqlitePlanStore {
    pub fn open(store: &Store) -> Result<Self, GateError> {
        store.ensure()?;
        let broker = DbBroker::new(&store.root);
        let db_path = db::plans_db_path(&store.data_dir());
        broker.with_conn(&db_path, "plan-store", "plans.init", |conn| {
            conn.execute(schemas::PLANS_DB_SCHEMA, [])?;
            conn.execute(schemas::PLANS_DB_INDEX_STATUS, [])?;
            let has_checksum: i64 =
                conn.query_row(schemas::PLANS_DB_HAS_LOCK_CHECKSUM, [], |row| row.get(0))?;
            if has_checksum == 0 {
                conn.execute(schemas::PLANS_DB_ADD_LOCK_CHECKSUM, [])?;
            }
            Ok(())
        })?;
        Ok(Self { broker, db_path })
    }
}

impl PlanStore for SqlitePlanStore {
    fn load(&self, id: &str) -> Result<Option<Plan>, GateError> {
        let row = self
            .broker
            .with_conn(&self.db_path, "plan-store", "plans.load", |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?1"))?;
                let mut rows = stmt.query_map([id], PlanRow::from_row)?;
                Ok(rows.next().transpose()?)
            })?;
        row.map(PlanRow::into_plan).transpose()
    }

    fn save(&self, plan: &Plan) -> Result<(), GateError> {
        let phases = serde_json::to_string(&plan.phases)?;
        let files = serde_json::to_string(&plan.affected_files)?;
        let metadata = serde_json::to_string(&plan.metadata)?;
        self.broker
            .with_conn(&self.db_path, "plan-store", "plans.save", |conn| {
                conn.execute(
                    "INSERT INTO plans (id, title, description, status, phases, current_phase_index,
                         affected_files, metadata, complexity, created_at, approved_at, completed_at,
                         lock_checksum)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                     ON CONFLICT(id) DO UPDATE SET
                         title=excluded.title,
                         description=excluded.description,
                         status=excluded.status,
                         phases=excluded.phases,
                         current_phase_index=excluded.current_phase_index,
                         affected_files=excluded.affected_files,
                         metadata=excluded.metadata,
                         complexity=excluded.complexity,
                         approved_at=excluded.approved_at,
                         completed_at=excluded.completed_at,
                         lock_checksum=excluded.lock_checksum",
                    rusqlite::params![
                        plan.id,
                        plan.title,
                        plan.description,
                        plan.status.as_str(),
                        phases,
                        plan.current_phase_index as i64,
                        files,
                        metadata,
                        plan.complexity.as_str(),
                        plan.created_at,
                        plan.approved_at,
                        plan.completed_at,
                        plan.lock_checksum,
                    ],
                )?;
                Ok(())
            })
    }

    fn list(&self) -> Result<Vec<Plan>, GateError> {
        let rows = self
            .broker
            .with_conn(&self.db_path, "plan-store", "plans.list", |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PLAN_COLUMNS} FROM plans ORDER BY created_at, id"
                ))?;
                let rows = stmt
                    .query_map([], PlanRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })?;
        rows.into_iter().map(PlanRow::into_plan).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::{PhaseSpec, PlanManager, PlanSpec, TaskSpec};

    fn spec() -> PlanSpec {
        PlanSpec {
            title: "Refactor api".to_string(),
            description: "Split handlers".to_string(),
            phases: vec![PhaseSpec {
                title: "Split".to_string(),
                tasks: vec![TaskSpec {
                    description: "Move handlers".to_string(),
                    target_file: Some("src/api.ts".to_string()),
                    expected_changes: None,
                }],
                affected_files: vec!["src/api.ts".to_string()],
                estimated_tokens: 0,
            }],
            ..PlanSpec::default()
        }
    }

    #[test]
    fn sqlite_store_survives_reopen_with_active_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::for_project(tmp.path());

        let plan_id = {
            let backend = SqlitePlanStore::open(&store).unwrap();
            let mut mgr = PlanManager::open(Box::new(backend), None).unwrap();
            let plan = mgr.create_plan(spec());
            assert!(mgr.approve_plan(&plan.id));
            assert!(mgr.start_execution(&plan.id));
            assert!(mgr.take_persist_errors().is_empty());
            plan.id
        };

        let backend = SqlitePlanStore::open(&store).unwrap();
        let loaded = backend.load(&plan_id).unwrap().unwrap();
        assert_eq!(loaded.status, PlanStatus::InProgress);
        assert_eq!(loaded.phases.len(), 1);

        let mgr = PlanManager::open(Box::new(backend), None).unwrap();
        assert_eq!(mgr.active_plan().map(|p| p.id.as_str()), Some(plan_id.as_str()));
        assert!(mgr.is_file_allowed("src/api.ts"));
        assert!(!mgr.is_file_allowed("src/other.ts"));
        assert!(mgr.verify_lock(&plan_id));
    }

    const WIDEN_PHASE: &str = r#"UPDATE plans
        SET phases = replace(phases, '"affected_files":["src/api.ts"]', '"affected_files":["src/api.ts","src/evil.ts"]')
        WHERE id = ?1"#;

    #[test]
    fn row_edited_after_approval_breaks_the_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::for_project(tmp.path());
        let plan_id = {
            let backend = SqlitePlanStore::open(&store).unwrap();
            let mut mgr = PlanManager::open(Box::new(backend), None).unwrap();
            let plan = mgr.create_plan(spec());
            assert!(mgr.approve_plan(&plan.id));
            plan.id
        };

        let backend = SqlitePlanStore::open(&store).unwrap();
        let conn = db::db_connect(&backend.db_path.to_string_lossy()).unwrap();
        assert_eq!(conn.execute(WIDEN_PHASE, [&plan_id]).unwrap(), 1);
        drop(conn);

        let mut mgr = PlanManager::open(Box::new(backend), None).unwrap();
        let plan = mgr.get_plan(&plan_id).unwrap();
        assert!(plan.affected_files.contains("src/evil.ts"));
        assert!(plan.lock_checksum.is_some());
        assert!(!mgr.verify_lock(&plan_id));
        assert!(!mgr.start_execution(&plan_id));
        assert_eq!(mgr.get_plan(&plan_id).unwrap().status, PlanStatus::Approved);
    }

    #[test]
    fn legacy_table_gains_lock_column() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::for_project(tmp.path());
        store.ensure().unwrap();
        let path = db::plans_db_path(&store.data_dir());
        let conn = db::db_connect(&path.to_string_lossy()).unwrap();
        conn.execute(
            &schemas::PLANS_DB_SCHEMA.replace(",\n        lock_checksum TEXT", ""),
            [],
        )
        .unwrap();
        let before: i64 = conn
            .query_row(schemas::PLANS_DB_HAS_LOCK_CHECKSUM, [], |row| row.get(0))
            .unwrap();
        assert_eq!(before, 0);
        drop(conn);

        let backend = SqlitePlanStore::open(&store).unwrap();
        let mut mgr = PlanManager::open(Box::new(backend), None).unwrap();
        let plan = mgr.create_plan(spec());
        assert!(mgr.approve_plan(&plan.id));
        assert!(mgr.take_persist_errors().is_empty());
    }

    #[test]
    fn load_missing_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = SqlitePlanStore::open(&Store::for_project(tmp.path())).unwrap();
        assert!(backend.load("plan_missing").unwrap().is_none());
        assert!(backend.list().unwrap().is_empty());
    }
}
