use changegate::core::change::{ChangeOperation, FileChange, Severity, ValidatorContext};
use changegate::core::plan::{PhaseSpec, PlanManager, PlanSpec, TaskSpec};
use changegate::validators::change_size::{ChangeSizeMonitor, SizeAlert};
use changegate::validators::hallucination::HallucinationDetector;
use changegate::validators::scope_guard::ScopeGuard;
use changegate::validators::{Validator, ValidatorArtifact};
use serde_json::json;

const MATH: &str = "\
export function add(a, b) {
  return a + b;
}

export function sub(a, b) {
  return a - b;
}
";

fn codes(issues: &[changegate::core::change::ValidationIssue]) -> Vec<&str> {
    issues.iter().filter_map(|i| i.code.as_deref()).collect()
}

#[test]
fn configured_allow_list_supports_prefixes() {
    let ctx = ValidatorContext::new(vec![
        FileChange::new("src/api/users.ts", ChangeOperation::Update, "export const u = 1;\n"),
        FileChange::new("src/db/pool.ts", ChangeOperation::Update, "export const p = 1;\n"),
        FileChange::new("src/api/new.ts", ChangeOperation::Create, "export const n = 1;\n"),
        FileChange::new("src/db/new.ts", ChangeOperation::Create, "export const n = 1;\n"),
    ])
    .with_config("allowed_files", json!(["src/api/*"]));
    let out = ScopeGuard.validate(&ctx).unwrap();
    assert_eq!(codes(&out.issues), vec!["SCOPE_FILE_NOT_ALLOWED", "SCOPE_NEW_FILE"]);
    assert_eq!(out.issues[1].severity, Severity::Warning);
    match out.artifact {
        Some(ValidatorArtifact::ScopeViolations { files, functions }) => {
            assert_eq!(files, vec!["src/db/pool.ts".to_string()]);
            assert!(functions.is_empty());
        }
        other => panic!("unexpected artifact {other:?}"),
    }
}

#[test]
fn function_allow_list_catches_edits_to_other_functions() {
    let edited = MATH.replace("a - b", "b - a");
    let ctx = ValidatorContext::new(vec![FileChange::new("src/math.ts", ChangeOperation::Update, &edited)])
        .with_existing("src/math.ts", MATH)
        .with_config("allowed_files", json!(["src/math.ts"]))
        .with_config("allowed_functions", json!({ "src/math.ts": ["add"] }));
    let out = ScopeGuard.validate(&ctx).unwrap();
    assert_eq!(codes(&out.issues), vec!["SCOPE_FUNCTION_NOT_ALLOWED"]);
    assert!(out.issues[0].message.contains("sub"));

    let allowed = MATH.replace("a + b", "b + a");
    let ctx = ValidatorContext::new(vec![FileChange::new("src/math.ts", ChangeOperation::Update, &allowed)])
        .with_existing("src/math.ts", MATH)
        .with_config("allowed_files", json!(["src/math.ts"]))
        .with_config("allowed_functions", json!({ "src/math.ts": ["add"] }));
    assert!(ScopeGuard.validate(&ctx).unwrap().issues.is_empty());
}

#[test]
fn plan_lock_drives_the_guard_without_config() {
    let mut plans = PlanManager::in_memory();
    let plan = plans.create_plan(PlanSpec {
        title: "Math".to_string(),
        description: "Rework the subtraction helper".to_string(),
        phases: vec![PhaseSpec {
            title: "Subtraction".to_string(),
            tasks: vec![TaskSpec {
                description: "Rework subtraction helper".to_string(),
                target_file: Some("src/math.ts".to_string()),
                expected_changes: Some("Update sub() ordering".to_string()),
            }],
            affected_files: vec!["src/math.ts".to_string()],
            estimated_tokens: 100,
        }],
        ..PlanSpec::default()
    });
    assert!(plans.approve_plan(&plan.id));
    assert!(plans.is_function_allowed("src/math.ts", "sub"));
    assert!(!plans.is_function_allowed("src/math.ts", "add"));

    let edited = MATH.replace("a + b", "b + a");
    let ctx = ValidatorContext::new(vec![
        FileChange::new("src/math.ts", ChangeOperation::Update, &edited)
            .with_explanation("Rework subtraction helper ordering"),
    ])
    .with_existing("src/math.ts", MATH)
    .with_plan(plans.active_view().unwrap());
    let out = ScopeGuard.validate(&ctx).unwrap();
    assert_eq!(codes(&out.issues), vec!["SCOPE_FUNCTION_NOT_ALLOWED"]);
    assert!(HallucinationDetector.validate(&ctx).unwrap().issues.is_empty());
}

#[test]
fn no_allow_list_means_nothing_to_enforce() {
    let ctx = ValidatorContext::new(vec![FileChange::new("anything.ts", ChangeOperation::Update, "x")]);
    let out = ScopeGuard.validate(&ctx).unwrap();
    assert!(out.issues.is_empty());
}

#[test]
fn explanations_unrelated_to_the_plan_are_flagged() {
    let ctx = ValidatorContext::new(vec![
        FileChange::new("src/theme.ts", ChangeOperation::Update, "export const c = 'red';\n")
            .with_explanation("Switch colour palette"),
        FileChange::new("src/cart.ts", ChangeOperation::Update, "export const total = 0;\n"),
    ])
    .with_config("plan_description", json!("Fix rounding in checkout cart totals"));
    let out = HallucinationDetector.validate(&ctx).unwrap();
    assert_eq!(
        codes(&out.issues),
        vec!["HALLUCINATION_OUT_OF_SCOPE", "HALLUCINATION_NO_EXPLANATION"]
    );
    assert!(out.issues.iter().all(|i| i.severity == Severity::Warning));
}

#[test]
fn placeholder_attributes_are_not_placeholders() {
    let ctx = ValidatorContext::new(vec![
        FileChange::new(
            "src/form.tsx",
            ChangeOperation::Create,
            "<input placeholder=\"Email\" />\nthrow new Error('not implemented');\n",
        )
        .with_explanation("Adds the form"),
    ]);
    let out = HallucinationDetector.validate(&ctx).unwrap();
    assert_eq!(codes(&out.issues), vec!["HALLUCINATION_PLACEHOLDER"]);
    assert_eq!(out.issues[0].line, Some(2));
}

#[test]
fn size_expectation_falls_back_to_plan_files() {
    let mut plans = PlanManager::in_memory();
    let plan = plans.create_plan(PlanSpec {
        title: "One file".to_string(),
        phases: vec![PhaseSpec {
            title: "Only".to_string(),
            tasks: vec![TaskSpec {
                description: "Edit".to_string(),
                ..TaskSpec::default()
            }],
            affected_files: vec!["a.ts".to_string()],
            estimated_tokens: 0,
        }],
        ..PlanSpec::default()
    });
    assert!(plans.approve_plan(&plan.id));
    let changes = ["a.ts", "b.ts", "c.ts"]
        .iter()
        .map(|p| FileChange::new(p, ChangeOperation::Update, "x\n"))
        .collect();
    let ctx = ValidatorContext::new(changes).with_plan(plans.active_view().unwrap());
    let out = ChangeSizeMonitor.validate(&ctx).unwrap();
    assert_eq!(codes(&out.issues), vec!["SIZE_FILES_EXCEEDED"]);
    match out.artifact {
        Some(ValidatorArtifact::SizeReport(report)) => {
            assert_eq!(report.expected_files, Some(1));
            assert_eq!(report.alert, SizeAlert::Critical);
            assert_eq!(report.max_overage_percent, 200.0);
        }
        other => panic!("unexpected artifact {other:?}"),
    }
}
