use indexmap::IndexSet;

use crate::api::{JobTask, PipelineTask};
use crate::error::Result;
use crate::structs::job_graph;

/// Validates the task graph and maps each task to a pipeline task whose
/// `run_after` mirrors its `after` list.
///
/// Tasks keep their declaration order. Duplicate `after` entries collapse
/// into one.
///
/// # Errors
///
/// Returns any graph validation error: duplicate names, unknown `after`
/// references, or a cycle.
pub fn order_tasks(jobs: &[JobTask]) -> Result<Vec<PipelineTask>> {
    job_graph(jobs)?;

    Ok(jobs
        .iter()
        .map(|job| {
            let run_after: IndexSet<&String> = job.after.iter().collect();
            PipelineTask {
                name: job.name.clone(),
                run_after: run_after.into_iter().cloned().collect(),
                image: job.image.clone(),
                script: job.script.clone(),
                custom: None,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OperatorError;

    fn task(name: &str, after: &[&str]) -> JobTask {
        JobTask {
            name: name.to_string(),
            after: after.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn keeps_declaration_order_and_direct_dependencies() {
        let jobs = vec![
            task("build", &[]),
            task("test", &["build"]),
            task("deploy", &["test", "build"]),
        ];

        let tasks = order_tasks(&jobs).unwrap();

        let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["build", "test", "deploy"]);
        assert!(tasks[0].run_after.is_empty());
        assert_eq!(tasks[2].run_after, vec!["test", "build"]);
    }

    #[test]
    fn collapses_repeated_dependencies() {
        let jobs = vec![task("a", &[]), task("b", &["a", "a"])];

        let tasks = order_tasks(&jobs).unwrap();

        assert_eq!(tasks[1].run_after, vec!["a"]);
    }

    #[test]
    fn rejects_cycles() {
        let jobs = vec![task("a", &["b"]), task("b", &["a"])];

        let err = order_tasks(&jobs).unwrap_err();

        assert!(matches!(err, OperatorError::CyclicJobGraph));
    }

    #[test]
    fn rejects_unknown_reference() {
        let jobs = vec![task("a", &["ghost"])];

        assert!(matches!(
            order_tasks(&jobs),
            Err(OperatorError::UnknownJobReference { .. })
        ));
    }
}
