use changegate::core::change::{ChangeOperation, FileChange, Severity, ValidatorContext};
use changegate::core::pipeline::Pipeline;
use changegate::validators::breaking_change::BreakingChange;
use changegate::validators::cycles::CircularDependency;
use changegate::validators::imports::ImportResolution;
use changegate::validators::type_integrity::TypeIntegrity;
use changegate::validators::{Stage, Validator, ValidatorArtifact};
use std::fs;
use tempfile::TempDir;

fn codes(issues: &[changegate::core::change::ValidationIssue]) -> Vec<&str> {
    issues.iter().filter_map(|i| i.code.as_deref()).collect()
}

#[test]
fn imports_resolve_against_changes_and_existing_files() {
    let ctx = ValidatorContext::new(vec![
        FileChange::new(
            "src/app.ts",
            ChangeOperation::Update,
            "import { db } from './db';\nimport { ui } from './ui';\nimport { nope } from './missing';\n",
        ),
        FileChange::new("src/ui/index.tsx", ChangeOperation::Create, "export const ui = 1;\n"),
    ])
    .with_existing("src/db.ts", "export const db = {};\n");
    let out = ImportResolution.validate(&ctx).unwrap();
    assert_eq!(codes(&out.issues), vec!["IMPORT_UNRESOLVED"]);
    assert_eq!(out.issues[0].line, Some(3));
    assert_eq!(out.issues[0].severity, Severity::Error);
}

#[test]
fn imports_of_deleted_files_are_named() {
    let ctx = ValidatorContext::new(vec![
        FileChange::new("src/app.ts", ChangeOperation::Update, "import { db } from './db';\n"),
        FileChange::new("src/db.ts", ChangeOperation::Delete, ""),
    ])
    .with_existing("src/db.ts", "export const db = {};\n");
    let out = ImportResolution.validate(&ctx).unwrap();
    assert_eq!(codes(&out.issues), vec!["IMPORT_DELETED_TARGET"]);
    assert!(out.issues[0].message.contains("src/db.ts"));
}

#[test]
fn imports_fall_back_to_the_project_tree() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("lib")).unwrap();
    fs::write(tmp.path().join("lib/format.js"), "module.exports = {};\n").unwrap();
    let mut ctx = ValidatorContext::new(vec![FileChange::new(
        "lib/index.js",
        ChangeOperation::Create,
        "const format = require('./format');\n",
    )]);
    ctx.project_path = tmp.path().to_path_buf();
    assert!(ImportResolution.validate(&ctx).unwrap().issues.is_empty());
}

#[test]
fn two_file_cycle_is_reported_once() {
    let ctx = ValidatorContext::new(vec![
        FileChange::new("src/a.ts", ChangeOperation::Update, "import { b } from './b';\n"),
        FileChange::new("src/b.ts", ChangeOperation::Update, "import { a } from './a';\n"),
    ]);
    let out = CircularDependency.validate(&ctx).unwrap();
    assert_eq!(out.issues.len(), 1);
    assert_eq!(out.issues[0].severity, Severity::Warning);
    assert_eq!(
        out.issues[0].message,
        "Circular dependency: src/a.ts -> src/b.ts -> src/a.ts"
    );
    match out.artifact {
        Some(ValidatorArtifact::DependencyCycles { cycles }) => {
            assert_eq!(cycles, vec![vec!["src/a.ts", "src/b.ts", "src/a.ts"]]);
        }
        other => panic!("unexpected artifact {other:?}"),
    }
}

#[test]
fn typescript_escape_hatches() {
    let ctx = ValidatorContext::new(vec![FileChange::new(
        "src/user.ts",
        ChangeOperation::Create,
        "export function load(id: string): User {\n  const raw: any = fetchUser(id);\n  return raw!.user;\n}\n",
    )]);
    let out = TypeIntegrity.validate(&ctx).unwrap();
    assert_eq!(codes(&out.issues), vec!["TYPE_EXPLICIT_ANY", "TYPE_NON_NULL_ASSERTION"]);
}

#[test]
fn removing_an_export_breaks_callers() {
    let ctx = ValidatorContext::new(vec![FileChange::new(
        "src/math.ts",
        ChangeOperation::Update,
        "export function add(a: number, b: number): number {\n  return a + b;\n}\n",
    )])
    .with_existing(
        "src/math.ts",
        "export function add(a: number, b: number): number {\n  return a + b;\n}\nexport function sub(a: number, b: number): number {\n  return a - b;\n}\n",
    );
    let out = BreakingChange.validate(&ctx).unwrap();
    assert_eq!(codes(&out.issues), vec!["BREAKING_EXPORT_REMOVED"]);
    assert!(out.issues[0].message.contains("sub"));
}

#[test]
fn integrity_stage_runs_all_three_checks() {
    let ctx = ValidatorContext::new(vec![FileChange::new(
        "src/a.ts",
        ChangeOperation::Create,
        "import { x } from './x';\nexport const a: any = x;\n",
    )]);
    let results = Pipeline::run_stage(Stage::Integrity, &ctx);
    let names: Vec<&str> = results.iter().map(|r| r.validator.as_str()).collect();
    assert_eq!(names, vec!["type-integrity", "import-resolution", "circular-dependency"]);
    assert!(results[0].passed);
    assert!(!results[1].passed);
    assert!(results[2].issues.is_empty());
}
