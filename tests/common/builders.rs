//! Test harness wiring the engine, the configuration service and in-memory
//! collaborators around a small software workflow:
//!
//! ```text
//! To Do --Start--> In Progress --Finish--> Done
//!   |                                       |
//!   +-----------Approve (admin)------------>+
//! Done --Reopen--> To Do
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use issue_workflow::config::EngineConfig;
use issue_workflow::events::OutboundDispatcher;
use issue_workflow::models::{
    Actor, ConditionKind, IssueId, IssueSnapshot, IssueTypeId, NewStatus, NewTransition,
    OrganizationId, PostFunctionKind, ProjectId, StatusCategory, StatusId, TransitionId, UserId,
    ValidatorKind, WorkflowId,
};
use issue_workflow::registry::{RuleRegistry, WorkflowRegistry};
use issue_workflow::services::{InMemoryDirectory, OrganizationRole, TransitionConfigurationService};
use issue_workflow::state_machine::errors::DispatchResult;
use issue_workflow::state_machine::{
    ExternalCheck, InMemoryIssueStore, TransitionContext, WorkflowEvent,
};
use issue_workflow::WorkflowEngine;

/// Dispatcher that keeps every event it receives
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl RecordingDispatcher {
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

#[async_trait]
impl OutboundDispatcher for RecordingDispatcher {
    async fn dispatch(&self, event: &WorkflowEvent) -> DispatchResult<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// External check that sleeps before answering
#[derive(Debug, Clone)]
pub struct SlowCheck {
    pub delay: Duration,
    pub verdict: Result<(), String>,
}

#[async_trait]
impl ExternalCheck for SlowCheck {
    async fn check(
        &self,
        _issue: &IssueSnapshot,
        _actor: &Actor,
        _context: &TransitionContext,
    ) -> Result<(), String> {
        tokio::time::sleep(self.delay).await;
        self.verdict.clone()
    }

    fn description(&self) -> &'static str {
        "slow check"
    }
}

/// Identifiers of the software workflow
#[derive(Debug, Clone, Copy)]
pub struct SoftwareFlow {
    pub workflow_id: WorkflowId,
    pub todo: StatusId,
    pub in_progress: StatusId,
    pub done: StatusId,
    pub start: TransitionId,
    pub finish: TransitionId,
    pub approve: TransitionId,
    pub reopen: TransitionId,
}

pub struct Harness {
    pub registry: Arc<WorkflowRegistry>,
    pub store: Arc<InMemoryIssueStore>,
    pub directory: Arc<InMemoryDirectory>,
    pub rules: Arc<RuleRegistry>,
    pub recorder: Arc<RecordingDispatcher>,
    pub engine: Arc<WorkflowEngine>,
    pub service: TransitionConfigurationService,
    pub org: OrganizationId,
    pub project: ProjectId,
    pub issue_type: IssueTypeId,
    /// Organization owner and project admin
    pub admin: UserId,
    /// Project member with the developer role
    pub developer: UserId,
    pub reporter: UserId,
    pub flow: SoftwareFlow,
}

pub struct HarnessBuilder {
    config: EngineConfig,
    dispatcher: Option<Arc<dyn OutboundDispatcher>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            dispatcher: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the recording dispatcher the engine hands events to
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn OutboundDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub async fn build(self) -> Harness {
        let registry = Arc::new(WorkflowRegistry::new());
        let store = Arc::new(InMemoryIssueStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let rules = Arc::new(RuleRegistry::new());
        let recorder = Arc::new(RecordingDispatcher::default());

        let org = OrganizationId::new();
        let project = ProjectId::new();
        let issue_type = IssueTypeId::new();
        let admin = UserId::new();
        let developer = UserId::new();
        let reporter = UserId::new();

        directory.grant_organization_role(org, admin, OrganizationRole::Owner);
        directory.grant_project_role(project, admin, "admin");
        directory.grant_project_role(project, developer, "developer");
        directory.add_member(project, reporter);

        let service =
            TransitionConfigurationService::new(registry.clone(), store.clone(), directory.clone())
                .with_config(&self.config);
        let flow = build_software_flow(&service, admin, org).await;
        service
            .create_scheme(admin, project, "Software scheme", flow.workflow_id)
            .await
            .expect("scheme is created");

        let dispatcher: Arc<dyn OutboundDispatcher> = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => recorder.clone(),
        };
        let engine = WorkflowEngine::new(
            registry.clone(),
            store.clone(),
            directory.clone(),
            dispatcher,
            self.config,
        )
        .with_rule_registry(rules.clone());

        Harness {
            registry,
            store,
            directory,
            rules,
            recorder,
            engine: Arc::new(engine),
            service,
            org,
            project,
            issue_type,
            admin,
            developer,
            reporter,
            flow,
        }
    }
}

async fn build_software_flow(
    service: &TransitionConfigurationService,
    admin: UserId,
    org: OrganizationId,
) -> SoftwareFlow {
    let workflow = service
        .create_workflow(
            admin,
            org,
            "Software",
            "Default software workflow",
            NewStatus::new("To Do", StatusCategory::ToDo),
        )
        .await
        .expect("workflow is created");
    let todo = workflow.initial_status().expect("initial status").id;

    let in_progress = service
        .add_status(
            admin,
            workflow.id,
            NewStatus::new("In Progress", StatusCategory::InProgress).at_position(1),
        )
        .await
        .expect("status is added");
    let done = service
        .add_status(
            admin,
            workflow.id,
            NewStatus::new("Done", StatusCategory::Done).at_position(2),
        )
        .await
        .expect("status is added");

    let ids = service
        .bulk_add_transitions(
            admin,
            workflow.id,
            vec![
                NewTransition::new("Start", todo, in_progress).at_position(0),
                NewTransition::new("Finish", in_progress, done)
                    .with_validator(ValidatorKind::ResolutionRequiredIfDone {})
                    .with_post_function(PostFunctionKind::SetResolution { resolution: None }),
                NewTransition::new("Approve", todo, done)
                    .with_condition(ConditionKind::ActorHasRoleInProject {
                        role: "admin".to_string(),
                    })
                    .with_post_function(PostFunctionKind::SetResolution {
                        resolution: Some("approved".to_string()),
                    })
                    .at_position(1),
                NewTransition::new("Reopen", done, todo),
            ],
        )
        .await
        .expect("transitions are added");

    SoftwareFlow {
        workflow_id: workflow.id,
        todo,
        in_progress,
        done,
        start: ids[0],
        finish: ids[1],
        approve: ids[2],
        reopen: ids[3],
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::new()
    }

    pub async fn new() -> Self {
        HarnessBuilder::new().build().await
    }

    /// New issue in the initial status of the project's workflow
    pub fn create_issue(&self) -> IssueId {
        self.create_issue_of(self.issue_type)
    }

    /// New issue of `issue_type` in the entry status its scheme resolves to
    pub fn create_issue_of(&self, issue_type: IssueTypeId) -> IssueId {
        let initial = self
            .engine
            .initial_status_for(self.project, issue_type)
            .expect("initial status resolves");
        let mut issue = IssueSnapshot::new(self.project, issue_type, initial.id);
        issue.reporter = Some(self.reporter);
        self.store.insert(issue)
    }

    /// New issue placed directly in `status`
    pub fn create_issue_in(&self, status: StatusId) -> IssueId {
        let mut issue = IssueSnapshot::new(self.project, self.issue_type, status);
        issue.reporter = Some(self.reporter);
        self.store.insert(issue)
    }

    pub fn issue(&self, issue_id: IssueId) -> IssueSnapshot {
        self.store.snapshot(issue_id).expect("issue exists")
    }

    pub fn status_of(&self, issue_id: IssueId) -> StatusId {
        self.issue(issue_id).current_status
    }
}
