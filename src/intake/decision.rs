// src/intake/decision.rs

//! Routing of inbound items into the store.
//!
//! A [`Classifier`] (an external collaborator, typically a model call)
//! decides what an item *is*; [`IntakeHandler`] then performs the matching
//! store mutation. Classification is advisory: any classifier failure
//! degrades to "store it as an ordinary task" so no inbound item is ever
//! lost to a flaky collaborator.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::intake::queue::ItemHandler;
use crate::store::{self, Store};
use crate::workflow::{self, StepSpec, WorkflowPlan};

/// A raw inbound item, before classification.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: String,
    pub text: String,
}

/// What the classifier decided an item is. Flags are checked in priority
/// order: periodic, then scheduled, then workflow, then plain task.
#[derive(Debug, Clone, Default)]
pub struct Decision {
    /// Normalized task content; falls back to the raw item text when empty.
    pub task_content: String,

    pub is_periodic: bool,
    pub cron_expression: Option<String>,

    pub is_scheduled: bool,
    /// RFC 3339 fire time for a scheduled item.
    pub scheduled_at: Option<String>,

    pub is_research: bool,
    pub is_workflow: bool,
}

/// External classification collaborator.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one inbound item.
    async fn classify(&self, item: &WorkItem) -> anyhow::Result<Decision>;

    /// Decompose task content into workflow steps.
    async fn decompose(&self, content: &str) -> anyhow::Result<Vec<StepSpec>>;
}

/// Queue handler wiring the classifier's decisions into the store.
pub struct IntakeHandler {
    store: Arc<Mutex<Store>>,
    classifier: Arc<dyn Classifier>,
}

impl IntakeHandler {
    pub fn new(store: Arc<Mutex<Store>>, classifier: Arc<dyn Classifier>) -> Self {
        Self { store, classifier }
    }

    async fn route(&self, item: &WorkItem, decision: Decision) -> anyhow::Result<()> {
        let content = if decision.task_content.trim().is_empty() {
            item.text.clone()
        } else {
            decision.task_content.clone()
        };
        let category = if decision.is_research { "research" } else { "general" };

        if decision.is_periodic {
            if let Some(expr) = &decision.cron_expression {
                let mut store = self.store.lock().await;
                store
                    .add_cron_job(expr, &content, category)
                    .context("registering cron job")?;
                return Ok(());
            }
            warn!(item = %item.id, "periodic decision without a cron expression; storing as a task");
        }

        if decision.is_scheduled {
            if let Some(at) = &decision.scheduled_at {
                // Decompose up front so fire time only materializes,
                // never calls back into the classifier.
                let plan = if decision.is_workflow {
                    match self.classifier.decompose(&content).await {
                        Ok(steps) => Some(WorkflowPlan {
                            name: plan_name(&content),
                            steps,
                        }),
                        Err(err) => {
                            warn!(item = %item.id, error = %err, "decomposition failed; scheduling as a single task");
                            None
                        }
                    }
                } else {
                    None
                };
                let mut store = self.store.lock().await;
                store
                    .add_scheduled_task(&content, category, at, plan, Some(&item.id))
                    .context("registering scheduled task")?;
                return Ok(());
            }
            warn!(item = %item.id, "scheduled decision without a fire time; storing as a task");
        }

        if decision.is_workflow {
            match self.classifier.decompose(&content).await {
                Ok(steps) => {
                    let mut store = self.store.lock().await;
                    workflow::engine::create_workflow(
                        &mut store,
                        &plan_name(&content),
                        steps,
                        Some(&item.id),
                    )
                    .context("creating workflow")?;
                    return Ok(());
                }
                Err(err) => {
                    warn!(item = %item.id, error = %err, "decomposition failed; storing as a single task");
                }
            }
        }

        let uid = store::generate_id("task");
        let mut store = self.store.lock().await;
        store.add_record(&uid, &content, category)?;
        Ok(())
    }
}

#[async_trait]
impl ItemHandler<WorkItem> for IntakeHandler {
    async fn handle(&self, item: &WorkItem) -> anyhow::Result<()> {
        let decision = self
            .classifier
            .classify(item)
            .await
            .context("classifying item")?;
        info!(
            item = %item.id,
            periodic = decision.is_periodic,
            scheduled = decision.is_scheduled,
            workflow = decision.is_workflow,
            research = decision.is_research,
            "item classified"
        );
        self.route(item, decision).await
    }

    /// Once retries are exhausted, fall back to storing the raw text as an
    /// ordinary task so the item is not lost.
    async fn on_settled(&self, item: &WorkItem, succeeded: bool) -> anyhow::Result<()> {
        if succeeded {
            return Ok(());
        }
        warn!(item = %item.id, "classification failed after retries; storing raw item");
        let uid = store::generate_id("task");
        let mut store = self.store.lock().await;
        store.add_record(&uid, &item.text, "general")?;
        Ok(())
    }
}

/// Workflow name derived from the first line of the content, capped.
fn plan_name(content: &str) -> String {
    let first = content.lines().next().unwrap_or("").trim();
    let name: String = first.chars().take(60).collect();
    if name.is_empty() {
        "workflow".to_string()
    } else {
        name
    }
}
