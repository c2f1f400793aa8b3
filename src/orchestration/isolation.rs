//! # Isolated Step Runner
//!
//! Both the order dispatcher and the transformer chain run a sequence of
//! steps where each step may fail without stopping the ones after it. This
//! module holds that try/log/continue loop once.
//!
//! A step is any future returning `Result<T, E>`. Errors and panics are logged
//! with the step's position and label, recorded in a [`StepReport`] and turned
//! into `None`; the caller moves on to the next step.

use futures::FutureExt;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error};

/// One absorbed failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub index: usize,
    pub step: String,
    pub error: String,
}

/// What happened across a run of isolated steps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<StepFailure>,
}

impl StepReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs steps one at a time, absorbing their failures
#[derive(Debug)]
pub struct IsolatedStepRunner {
    component: &'static str,
    report: StepReport,
}

impl IsolatedStepRunner {
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            report: StepReport::default(),
        }
    }

    /// Await one step; `Some` on success, `None` once the failure is logged
    pub async fn run<T, E, Fut>(&mut self, step: impl Into<String>, fut: Fut) -> Option<T>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let index = self.report.attempted;
        let step = step.into();
        self.report.attempted += 1;

        let error = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => {
                self.report.succeeded += 1;
                debug!(
                    component = self.component,
                    step_index = index,
                    step = %step,
                    "Step completed"
                );
                return Some(value);
            }
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
        };

        error!(
            component = self.component,
            step_index = index,
            step = %step,
            error = %error,
            "Step failed, continuing with the next one"
        );
        self.report.failures.push(StepFailure { index, step, error });
        None
    }

    pub fn report(&self) -> &StepReport {
        &self.report
    }

    pub fn finish(self) -> StepReport {
        self.report
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failures_do_not_stop_later_steps() {
        let mut runner = IsolatedStepRunner::new("test");
        let mut seen = Vec::new();

        for i in 0..4 {
            let outcome = runner
                .run(format!("step-{i}"), async move {
                    if i == 1 {
                        Err(format!("step {i} broke"))
                    } else {
                        Ok(i)
                    }
                })
                .await;
            if let Some(value) = outcome {
                seen.push(value);
            }
        }

        assert_eq!(seen, vec![0, 2, 3]);
        let report = runner.finish();
        assert_eq!(report.attempted, 4);
        assert_eq!(report.succeeded, 3);
        assert_eq!(
            report.failures,
            vec![StepFailure {
                index: 1,
                step: "step-1".to_string(),
                error: "step 1 broke".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_panicking_step_is_absorbed() {
        let mut runner = IsolatedStepRunner::new("test");

        let outcome: Option<()> = runner
            .run("explodes", async {
                if true {
                    panic!("transformer bug");
                }
                Ok::<(), String>(())
            })
            .await;
        assert!(outcome.is_none());

        let after = runner.run("after", async { Ok::<_, String>("ran") }).await;
        assert_eq!(after, Some("ran"));

        let report = runner.report();
        assert_eq!(report.failed(), 1);
        assert!(report.failures[0].error.contains("transformer bug"));
    }
}
