//! Cross-check between the active phase's tasks and the files a change set
//! actually touches.

use std::collections::BTreeSet;

use crate::core::change::{ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::core::plan::normalize_plan_path;
use crate::validators::{Stage, Validator, ValidatorOutput};

pub struct PlanCoverage;

impl Validator for PlanCoverage {
    fn id(&self) -> &'static str {
        "plan-coverage"
    }

    fn stage(&self) -> Stage {
        Stage::Compliance
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let Some(plan) = &ctx.plan else {
            return Ok(ValidatorOutput::default());
        };

        let touched: BTreeSet<String> = ctx
            .changes
            .iter()
            .map(|c| normalize_plan_path(&c.path))
            .collect();
        let targeted: BTreeSet<String> = plan
            .tasks
            .iter()
            .filter_map(|t| t.target_file.as_deref())
            .map(normalize_plan_path)
            .collect();
        let mut planned: BTreeSet<String> = plan
            .affected_files
            .iter()
            .map(|p| normalize_plan_path(p))
            .collect();
        if let Some(lock) = &plan.lock {
            planned.extend(lock.allowed_files.iter().cloned());
        }

        let mut issues = Vec::new();
        for task in &plan.tasks {
            let Some(target) = task.target_file.as_deref() else {
                continue;
            };
            if !touched.contains(&normalize_plan_path(target)) {
                issues.push(
                    ValidationIssue::info(
                        target,
                        format!("Task not covered by this change: {}", task.description),
                    )
                    .with_code("PLAN_TASK_UNCOVERED"),
                );
            }
        }
        for change in &ctx.changes {
            let path = normalize_plan_path(&change.path);
            if targeted.contains(&path) || planned.contains(&path) {
                continue;
            }
            issues.push(
                ValidationIssue::warning(&change.path, "File is not part of the active plan")
                    .with_code("PLAN_UNPLANNED_FILE")
                    .with_suggestion("Add the file to the plan or drop the change"),
            );
        }
        Ok(issues.into())
    }
}
