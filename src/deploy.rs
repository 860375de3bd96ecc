use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use aws_sdk_cloudformation::types::{Capability, ChangeSetStatus, ChangeSetType, OnFailure, Output, Parameter, Stack, StackStatus};

use crate::error::{aws_error, Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// where a stack is in its lifecycle, as far as a deployment cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackState {
    Done,
    InProgress,
    Failed(String),
}

/// what was asked of CloudFormation. the same status means different
/// things depending on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOperation {
    Create,
    Update,
    Delete,
}

pub fn classify_status(operation: StackOperation, status: &StackStatus, reason: Option<&str>) -> StackState {
    let failed = || StackState::Failed(format!(
        "{}: {}",
        status.as_str(),
        reason.unwrap_or("Failed to get stack failure reason"),
    ));
    if operation == StackOperation::Delete {
        return match status {
            StackStatus::DeleteComplete => StackState::Done,
            StackStatus::DeleteFailed => failed(),
            // the delete has not shown up yet
            _ => StackState::InProgress,
        };
    }
    match status {
        // done and return success:
        StackStatus::CreateComplete |
        StackStatus::UpdateComplete |
        StackStatus::ImportComplete => StackState::Done,

        // keep trying
        StackStatus::CreateInProgress |
        StackStatus::ImportInProgress |
        StackStatus::ImportRollbackInProgress |
        StackStatus::ReviewInProgress |
        StackStatus::RollbackInProgress |
        StackStatus::UpdateCompleteCleanupInProgress |
        StackStatus::UpdateInProgress |
        StackStatus::UpdateRollbackCompleteCleanupInProgress |
        StackStatus::UpdateRollbackInProgress => StackState::InProgress,

        // a failed create is deleted (OnFailure::Delete), and a rolled back
        // update left the old stack in place. both are failed deployments.
        _ => failed(),
    }
}

/// CloudFormation reports "nothing to do" as an error, with one message for
/// UpdateStack and another for a change set.
pub fn is_no_change(reason: &str) -> bool {
    reason.contains("No updates are to be performed") || reason.contains("didn't contain changes")
}

/// stacks that can only be deleted: a failed create kept by OnFailure::Rollback,
/// or the placeholder of a create change set that was never executed.
pub fn needs_recreate(status: Option<&StackStatus>) -> bool {
    matches!(status, Some(StackStatus::RollbackComplete) | Some(StackStatus::ReviewInProgress))
}

/// a create or update CloudFormation accepted and is now working on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackChange {
    pub operation: StackOperation,
    pub stack_id: String,
}

/// one pending change of a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub action: String,
    pub logical_id: String,
    pub resource_type: String,
    pub replacement: String,
}

pub struct StackDeployer {
    client: aws_sdk_cloudformation::Client,
    stack_name: String,
}

pub async fn aws_config_for(region: &str) -> aws_config::SdkConfig {
    aws_config::from_env()
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await
}

impl StackDeployer {
    pub fn new(config: &aws_config::SdkConfig, stack_name: &str) -> Self {
        Self {
            client: aws_sdk_cloudformation::Client::new(config),
            stack_name: stack_name.to_string(),
        }
    }

    pub async fn does_stack_exist(&self) -> Result<bool> {
        Ok(self.describe(&self.stack_name).await?.is_some())
    }

    /// `stack` is a name or a stack id. a deleted stack can still be
    /// described by id, but not by name.
    async fn describe(&self, stack: &str) -> Result<Option<Stack>> {
        match self.client.describe_stacks().stack_name(stack).send().await {
            Ok(d) => Ok(d.stacks().first().cloned()),
            Err(e) => {
                let err = aws_error(e);
                // does not exist
                if err.to_string().contains("does not exist") {
                    return Ok(None);
                }
                Err(err)
            }
        }
    }

    /// creates the stack, or updates it if it already exists.
    /// returns None if there was nothing to update.
    pub async fn create_or_update_stack(&self, body: &str, parameters: &BTreeMap<String, String>) -> Result<Option<StackChange>> {
        let name = &self.stack_name;
        let params = to_parameters(parameters);
        let mut existing = self.describe(name).await?;
        if let Some(stack) = &existing {
            if needs_recreate(stack.stack_status()) {
                tracing::info!("{name} is {}, deleting it before creating it again", stack.stack_status().map(|s| s.as_str()).unwrap_or_default());
                self.delete_and_wait(stack.stack_id().unwrap_or(name)).await?;
                existing = None;
            }
        }
        if existing.is_some() {
            tracing::info!("Updating {name} ...");
            let res = self.client
                .update_stack()
                .capabilities(Capability::CapabilityNamedIam)
                .capabilities(Capability::CapabilityIam)
                .stack_name(name)
                .template_body(body)
                .set_parameters(Some(params))
                .send()
                .await;
            match res {
                Ok(out) => Ok(Some(StackChange {
                    operation: StackOperation::Update,
                    stack_id: out.stack_id().unwrap_or(name).to_string(),
                })),
                Err(e) => {
                    let err = aws_error(e);
                    if is_no_change(&err.to_string()) {
                        tracing::info!("{name} is already up to date");
                        return Ok(None);
                    }
                    Err(err)
                }
            }
        } else {
            tracing::info!("Creating {name} ...");
            let out = self.client
                .create_stack()
                .on_failure(OnFailure::Delete)
                .capabilities(Capability::CapabilityNamedIam)
                .capabilities(Capability::CapabilityIam)
                .stack_name(name)
                .template_body(body)
                .set_parameters(Some(params))
                .send()
                .await
                .map_err(aws_error)?;
            Ok(Some(StackChange {
                operation: StackOperation::Create,
                stack_id: out.stack_id().unwrap_or(name).to_string(),
            }))
        }
    }

    /// polls `stack_id` until `operation` reaches a terminal status.
    /// None means the stack is gone, which only a delete waits for.
    async fn wait_for(&self, stack_id: &str, operation: StackOperation) -> Result<Option<Stack>> {
        // a stack being deleted after a failed create no longer carries the
        // reason the create failed, so keep the last one seen
        let mut last_reason: Option<String> = None;
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            let stack = match self.describe(stack_id).await? {
                Some(s) => s,
                None if operation == StackOperation::Delete => return Ok(None),
                None => {
                    let reason = last_reason.unwrap_or_else(|| "stack no longer exists".into());
                    return Err(Error::StackFailed { stack: self.stack_name.clone(), reason });
                }
            };
            if let Some(reason) = stack.stack_status_reason().filter(|r| !r.is_empty()) {
                last_reason = Some(reason.to_string());
            }
            let status = match stack.stack_status() {
                Some(s) => s,
                None => continue,
            };
            match classify_status(operation, status, last_reason.as_deref()) {
                StackState::Done => return Ok(Some(stack)),
                StackState::InProgress => tracing::debug!(status = status.as_str(), "still waiting on {}", self.stack_name),
                StackState::Failed(reason) => {
                    return Err(Error::StackFailed { stack: self.stack_name.clone(), reason });
                }
            }
        }
    }

    /// waits for a create or update to finish, then returns the stack outputs.
    pub async fn wait_for_output(&self, change: &StackChange) -> Result<HashMap<String, String>> {
        match self.wait_for(&change.stack_id, change.operation).await? {
            Some(stack) => Ok(stack_outputs(&stack)),
            None => Err(Error::StackFailed { stack: self.stack_name.clone(), reason: "stack no longer exists".into() }),
        }
    }

    pub async fn deploy(&self, body: &str, parameters: &BTreeMap<String, String>) -> Result<HashMap<String, String>> {
        match self.create_or_update_stack(body, parameters).await? {
            Some(change) => self.wait_for_output(&change).await,
            None => self.outputs().await,
        }
    }

    pub async fn outputs(&self) -> Result<HashMap<String, String>> {
        match self.describe(&self.stack_name).await? {
            Some(stack) => Ok(stack_outputs(&stack)),
            None => Err(Error::Aws(format!("Stack {} not found", self.stack_name))),
        }
    }

    /// the changes a deployment of `body` would make, without making them.
    /// an up to date stack yields an empty plan.
    pub async fn plan(&self, body: &str, parameters: &BTreeMap<String, String>) -> Result<Vec<PlannedChange>> {
        let name = &self.stack_name;
        let exists = match self.describe(name).await? {
            Some(stack) => stack.stack_status() != Some(&StackStatus::ReviewInProgress),
            None => false,
        };
        let change_set_type = if exists { ChangeSetType::Update } else { ChangeSetType::Create };
        let change_set_name = format!("{name}-plan");
        let created = self.client
            .create_change_set()
            .stack_name(name)
            .change_set_name(&change_set_name)
            .change_set_type(change_set_type)
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityIam)
            .template_body(body)
            .set_parameters(Some(to_parameters(parameters)))
            .send()
            .await
            .map_err(aws_error)?;
        let change_set_id = created.id().unwrap_or(&change_set_name).to_string();
        let stack_id = created.stack_id().unwrap_or(name).to_string();

        let result = self.collect_changes(&change_set_id).await;

        // cleanup failures are logged, the plan result is what gets returned
        if let Err(e) = self.client.delete_change_set()
            .stack_name(&stack_id)
            .change_set_name(&change_set_id)
            .send()
            .await
        {
            tracing::warn!("failed to delete change set {change_set_name}: {}", aws_error(e));
        }
        if !exists {
            // the placeholder stack left behind by a CREATE change set
            if let Err(e) = self.delete_and_wait(&stack_id).await {
                tracing::warn!("failed to delete placeholder stack {name}: {e}");
            }
        }
        result
    }

    async fn collect_changes(&self, change_set_id: &str) -> Result<Vec<PlannedChange>> {
        let mut changes = vec![];
        let mut next_token: Option<String> = None;
        loop {
            let desc = self.client.describe_change_set()
                .stack_name(&self.stack_name)
                .change_set_name(change_set_id)
                .set_next_token(next_token.clone())
                .send()
                .await
                .map_err(aws_error)?;
            match desc.status() {
                Some(ChangeSetStatus::CreatePending) | Some(ChangeSetStatus::CreateInProgress) | None => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                    continue;
                }
                Some(ChangeSetStatus::Failed) => {
                    let reason = desc.status_reason().unwrap_or_default();
                    if is_no_change(reason) {
                        return Ok(vec![]);
                    }
                    return Err(Error::StackFailed { stack: self.stack_name.clone(), reason: reason.to_string() });
                }
                _ => {}
            }
            for change in desc.changes() {
                if let Some(rc) = change.resource_change() {
                    changes.push(PlannedChange {
                        action: rc.action().map(|a| a.as_str().to_string()).unwrap_or_default(),
                        logical_id: rc.logical_resource_id().unwrap_or_default().to_string(),
                        resource_type: rc.resource_type().unwrap_or_default().to_string(),
                        replacement: rc.replacement().map(|r| r.as_str().to_string()).unwrap_or_default(),
                    });
                }
            }
            match desc.next_token() {
                Some(t) => next_token = Some(t.to_string()),
                None => break,
            }
        }
        Ok(changes)
    }

    async fn delete_and_wait(&self, stack_id: &str) -> Result<()> {
        self.client.delete_stack().stack_name(stack_id).send().await.map_err(aws_error)?;
        self.wait_for(stack_id, StackOperation::Delete).await?;
        Ok(())
    }

    pub async fn destroy(&self) -> Result<()> {
        let stack = match self.describe(&self.stack_name).await? {
            Some(s) => s,
            None => {
                tracing::info!("{} does not exist, nothing to delete", self.stack_name);
                return Ok(());
            }
        };
        tracing::info!("Deleting {} ...", self.stack_name);
        self.delete_and_wait(stack.stack_id().unwrap_or(&self.stack_name)).await
    }
}

fn to_parameters(parameters: &BTreeMap<String, String>) -> Vec<Parameter> {
    parameters.iter()
        .map(|(k, v)| Parameter::builder().parameter_key(k).parameter_value(v).build())
        .collect()
}

fn stack_outputs(stack: &Stack) -> HashMap<String, String> {
    collect_outputs(stack.outputs())
}

fn collect_outputs(outputs: &[Output]) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for output in outputs {
        if let (Some(key), Some(val)) = (output.output_key(), output.output_value()) {
            out.insert(key.to_string(), val.to_string());
        }
    }
    out
}
