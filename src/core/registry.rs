//! Validator registration.
//!
//! Adding a validator: implement [`Validator`] and append one entry to
//! `VALIDATORS` in its stage position.

use crate::validators::{
    Stage, Validator, accessibility::FrontendAccessibility, api_contract::ApiContract,
    breaking_change::BreakingChange, change_size::ChangeSizeMonitor,
    complexity::ComplexityValidator, cycles::CircularDependency, database::DatabaseSafety,
    deprecated::DeprecatedApiValidator, hallucination::HallucinationDetector,
    imports::ImportResolution, performance::PerformanceValidator, plan_coverage::PlanCoverage,
    rollback::RollbackCheckpointValidator, scope_guard::ScopeGuard, security::SecurityScanner,
    style::StyleConsistency, syntax::SyntaxValidator, test_presence::TestPresence,
    type_integrity::TypeIntegrity,
};

pub struct ValidatorEntry {
    pub id: &'static str,
    pub stage: Stage,
    pub build: fn() -> Box<dyn Validator>,
}

/// Every validator, in run order (stage order, then registration order).
pub const VALIDATORS: &[ValidatorEntry] = &[
    ValidatorEntry { id: "scope-guard", stage: Stage::Scope, build: || Box::new(ScopeGuard) },
    ValidatorEntry { id: "hallucination-detector", stage: Stage::Scope, build: || Box::new(HallucinationDetector) },
    ValidatorEntry { id: "change-size-monitor", stage: Stage::Scope, build: || Box::new(ChangeSizeMonitor) },
    ValidatorEntry { id: "syntax", stage: Stage::Quality, build: || Box::new(SyntaxValidator) },
    ValidatorEntry { id: "security-scanner", stage: Stage::Quality, build: || Box::new(SecurityScanner) },
    ValidatorEntry { id: "style-consistency", stage: Stage::Quality, build: || Box::new(StyleConsistency) },
    ValidatorEntry { id: "complexity", stage: Stage::Quality, build: || Box::new(ComplexityValidator) },
    ValidatorEntry { id: "type-integrity", stage: Stage::Integrity, build: || Box::new(TypeIntegrity) },
    ValidatorEntry { id: "import-resolution", stage: Stage::Integrity, build: || Box::new(ImportResolution) },
    ValidatorEntry { id: "circular-dependency", stage: Stage::Integrity, build: || Box::new(CircularDependency) },
    ValidatorEntry { id: "rollback-checkpoint", stage: Stage::Compliance, build: || Box::new(RollbackCheckpointValidator) },
    ValidatorEntry { id: "plan-coverage", stage: Stage::Compliance, build: || Box::new(PlanCoverage) },
    ValidatorEntry { id: "breaking-change", stage: Stage::Compliance, build: || Box::new(BreakingChange) },
    ValidatorEntry { id: "database-safety", stage: Stage::Specialist, build: || Box::new(DatabaseSafety) },
    ValidatorEntry { id: "frontend-accessibility", stage: Stage::Specialist, build: || Box::new(FrontendAccessibility) },
    ValidatorEntry { id: "api-contract", stage: Stage::Specialist, build: || Box::new(ApiContract) },
    ValidatorEntry { id: "performance", stage: Stage::Specialist, build: || Box::new(PerformanceValidator) },
    ValidatorEntry { id: "deprecated-api", stage: Stage::Accuracy, build: || Box::new(DeprecatedApiValidator) },
    ValidatorEntry { id: "test-presence", stage: Stage::Accuracy, build: || Box::new(TestPresence) },
];

pub fn entry(id: &str) -> Option<&'static ValidatorEntry> {
    VALIDATORS.iter().find(|e| e.id == id)
}

pub fn build(id: &str) -> Option<Box<dyn Validator>> {
    entry(id).map(|e| (e.build)())
}

pub fn ids_in_stage(stage: Stage) -> impl Iterator<Item = &'static str> {
    VALIDATORS.iter().filter(move |e| e.stage == stage).map(|e| e.id)
}

pub fn all_ids() -> Vec<&'static str> {
    VALIDATORS.iter().map(|e| e.id).collect()
}
