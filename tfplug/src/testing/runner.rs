//! Step execution for [`TestCase`]

use super::error::TestError;
use super::fixture::{Block, Fixture};
use super::state::{ResourceMode, ResourceState, TestState};
use super::{ImportStep, Outcome, StepKind, TestCase, TestStep};
use crate::context::Context;
use crate::data_source::{
    ConfigureDataSourceRequest, DataSource, DataSourceSchemaRequest, DataSourceWithConfigure,
    ReadDataSourceRequest, ValidateDataSourceConfigRequest,
};
use crate::provider::{
    ConfigureProviderRequest, DataSourceFactory, Provider, ProviderData, ProviderSchemaRequest,
    ResourceFactory,
};
use crate::resource::{
    ConfigureResourceRequest, CreateResourceRequest, DeleteResourceRequest,
    ImportResourceStateRequest, ReadResourceRequest, Resource, ResourceSchemaRequest,
    ResourceWithConfigure, UpdateResourceRequest, ValidateResourceConfigRequest,
};
use crate::schema::{self, NestingMode, Schema};
use crate::types::{has_errors, AttributePath, Diagnostic, Dynamic, DynamicValue};
use std::collections::HashMap;

const HARNESS_VERSION: &str = "tfplug-testing";

pub(crate) async fn run(case: TestCase) -> Result<Outcome, TestError> {
    if let Some(pre_check) = &case.pre_check {
        pre_check().map_err(TestError::PreCheck)?;
    }

    let ctx = Context::new().with_timeout(case.timeout);
    let mut runner = Runner::configure(ctx.clone(), &case).await?;

    let result = runner.run_steps(&case.steps).await;

    let snapshot = runner.state.clone();
    let destroyed = runner.destroy_all().await;

    let checked = match (&case.check_destroy, &destroyed) {
        (Some(check), Ok(())) => check
            .check_destroy(ctx, runner.provider_data.clone(), &snapshot)
            .await
            .map_err(TestError::DestroyCheck),
        _ => Ok(()),
    };

    result?;
    destroyed?;
    checked?;

    Ok(Outcome::Passed {
        steps: case.steps.len(),
    })
}

struct Runner {
    ctx: Context,
    provider_data: Option<ProviderData>,
    resources: HashMap<String, ResourceFactory>,
    data_sources: HashMap<String, DataSourceFactory>,
    state: TestState,
}

impl Runner {
    async fn configure(ctx: Context, case: &TestCase) -> Result<Self, TestError> {
        let mut provider: Box<dyn Provider> = (case.provider_factory)();
        let address = format!("provider.{}", provider.type_name());
        tracing::debug!("Configuring {}", address);

        let schema_response = provider.schema(ctx.clone(), ProviderSchemaRequest).await;
        if has_errors(&schema_response.diagnostics) {
            return Err(provisioning(0, &address, schema_response.diagnostics));
        }

        let schema = schema_response.schema;
        let diagnostics = schema.validate(&case.provider_config);
        if has_errors(&diagnostics) {
            return Err(provisioning(0, &address, diagnostics));
        }

        let response = provider
            .configure(
                ctx.clone(),
                ConfigureProviderRequest {
                    terraform_version: HARNESS_VERSION.to_string(),
                    config: schema.coerce(&case.provider_config),
                },
            )
            .await;
        if has_errors(&response.diagnostics) {
            return Err(provisioning(0, &address, response.diagnostics));
        }

        Ok(Self {
            ctx,
            provider_data: response.provider_data,
            resources: provider.resources(),
            data_sources: provider.data_sources(),
            state: TestState::default(),
        })
    }

    async fn run_steps(&mut self, steps: &[TestStep]) -> Result<(), TestError> {
        for (idx, step) in steps.iter().enumerate() {
            let number = idx + 1;
            tracing::info!("Running step {}/{}", number, steps.len());

            let result = self.run_step(number, step).await;
            match (&step.expect_error, result) {
                (None, result) => result?,
                (Some(pattern), Err(err)) => {
                    let actual = err.to_string();
                    if !pattern.is_match(&actual) {
                        return Err(TestError::ExpectedError {
                            step: number,
                            pattern: pattern.as_str().to_string(),
                            actual,
                        });
                    }
                    tracing::debug!("Step {} failed as expected: {}", number, actual);
                }
                (Some(pattern), Ok(())) => {
                    return Err(TestError::ExpectedError {
                        step: number,
                        pattern: pattern.as_str().to_string(),
                        actual: "no error".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn run_step(&mut self, step: usize, test_step: &TestStep) -> Result<(), TestError> {
        match &test_step.kind {
            StepKind::Apply(fixture) => self.apply(step, fixture).await?,
            StepKind::Import(import) => self.import(step, import).await?,
        }

        if let Some(check) = &test_step.check {
            check(&self.state).map_err(|source| TestError::Check { step, source })?;
        }
        Ok(())
    }

    async fn apply(&mut self, step: usize, fixture: &Fixture) -> Result<(), TestError> {
        tracing::debug!("Applying configuration:\n{}", fixture);

        let order = fixture
            .apply_order()
            .map_err(|e| TestError::provisioning(step, "configuration", e))?;

        self.state.clear_data_sources();

        for address in self.state.destroy_order() {
            if fixture.block(&address).is_none() {
                tracing::info!("Destroying {}, no longer in configuration", address);
                self.destroy(&address)
                    .await
                    .map_err(|diagnostics| provisioning(step, &address, diagnostics))?;
            }
        }

        for block in order {
            match block.mode {
                ResourceMode::Managed => self.apply_resource(step, block).await?,
                ResourceMode::Data => self.read_data_source(step, block).await?,
            }
        }
        Ok(())
    }

    async fn apply_resource(&mut self, step: usize, block: &Block) -> Result<(), TestError> {
        let address = block.address();
        let resource = self.resource(step, &address, &block.type_name).await?;

        let schema_response = resource
            .schema(self.ctx.clone(), ResourceSchemaRequest)
            .await;
        if has_errors(&schema_response.diagnostics) {
            return Err(provisioning(step, &address, schema_response.diagnostics));
        }
        let schema = schema_response.schema;

        let raw = self.evaluate(step, block, &schema)?;
        let diagnostics = schema.validate(&raw);
        if has_errors(&diagnostics) {
            return Err(provisioning(step, &address, diagnostics));
        }
        let config = schema.coerce(&raw);

        let diagnostics = resource
            .validate(
                self.ctx.clone(),
                ValidateResourceConfigRequest {
                    type_name: block.type_name.clone(),
                    config: config.clone(),
                },
            )
            .await
            .diagnostics;
        if has_errors(&diagnostics) {
            return Err(provisioning(step, &address, diagnostics));
        }

        let prior = self.state.get(&address).cloned();
        let applied = match prior {
            Some(prior) if prior.config == config => {
                tracing::debug!("{} unchanged, refreshing", address);
                match self.read(step, &address, resource.as_ref(), &prior.value).await? {
                    Some(current) => current,
                    None => {
                        tracing::info!("{} disappeared, creating it again", address);
                        self.create(step, &address, resource.as_ref(), &schema, &config)
                            .await?
                    }
                }
            }
            Some(prior) => {
                tracing::info!("Updating {}", address);
                let response = resource
                    .update(
                        self.ctx.clone(),
                        UpdateResourceRequest {
                            type_name: block.type_name.clone(),
                            prior_state: prior.value.clone(),
                            planned_state: plan_update(&schema, &prior.value, &config),
                            config: config.clone(),
                        },
                    )
                    .await;
                if has_errors(&response.diagnostics) {
                    return Err(provisioning(step, &address, response.diagnostics));
                }
                self.read_after_write(step, &address, resource.as_ref(), &response.new_state)
                    .await?
            }
            None => {
                self.create(step, &address, resource.as_ref(), &schema, &config)
                    .await?
            }
        };

        self.state.insert(ResourceState::new(
            ResourceMode::Managed,
            &block.type_name,
            &block.name,
            applied,
            config,
        ));
        Ok(())
    }

    async fn create(
        &mut self,
        step: usize,
        address: &str,
        resource: &dyn ResourceWithConfigure,
        schema: &Schema,
        config: &DynamicValue,
    ) -> Result<DynamicValue, TestError> {
        tracing::info!("Creating {}", address);
        let response = resource
            .create(
                self.ctx.clone(),
                CreateResourceRequest {
                    type_name: resource.type_name().to_string(),
                    planned_state: schema.plan(config),
                    config: config.clone(),
                },
            )
            .await;

        if has_errors(&response.diagnostics) {
            // A partially created object still has to be destroyed
            if has_id(&response.new_state) {
                tracing::warn!("{} was created but failed; keeping it for destroy", address);
                let (type_name, name) = split_address(address);
                self.state.insert(ResourceState::new(
                    ResourceMode::Managed,
                    type_name,
                    name,
                    DynamicValue::new(response.new_state.value.unknowns_to_null()),
                    config.clone(),
                ));
            }
            return Err(provisioning(step, address, response.diagnostics));
        }

        self.read_after_write(step, address, resource, &response.new_state)
            .await
    }

    async fn read_after_write(
        &self,
        step: usize,
        address: &str,
        resource: &dyn ResourceWithConfigure,
        written: &DynamicValue,
    ) -> Result<DynamicValue, TestError> {
        match self.read(step, address, resource, written).await? {
            Some(current) => Ok(current),
            None => Err(TestError::provisioning(
                step,
                address,
                "Provider produced an object that no longer exists when read back",
            )),
        }
    }

    async fn read(
        &self,
        step: usize,
        address: &str,
        resource: &dyn ResourceWithConfigure,
        current: &DynamicValue,
    ) -> Result<Option<DynamicValue>, TestError> {
        let response = resource
            .read(
                self.ctx.clone(),
                ReadResourceRequest {
                    type_name: resource.type_name().to_string(),
                    current_state: current.clone(),
                },
            )
            .await;
        if has_errors(&response.diagnostics) {
            return Err(provisioning(step, address, response.diagnostics));
        }
        Ok(response.new_state)
    }

    async fn read_data_source(&mut self, step: usize, block: &Block) -> Result<(), TestError> {
        let address = block.address();
        let data_source = self.data_source(step, &address, &block.type_name).await?;

        let schema_response = data_source
            .schema(self.ctx.clone(), DataSourceSchemaRequest)
            .await;
        if has_errors(&schema_response.diagnostics) {
            return Err(provisioning(step, &address, schema_response.diagnostics));
        }
        let schema = schema_response.schema;

        let raw = self.evaluate(step, block, &schema)?;
        let diagnostics = schema.validate(&raw);
        if has_errors(&diagnostics) {
            return Err(provisioning(step, &address, diagnostics));
        }
        let config = schema.coerce(&raw);

        let diagnostics = data_source
            .validate(
                self.ctx.clone(),
                ValidateDataSourceConfigRequest {
                    type_name: block.type_name.clone(),
                    config: config.clone(),
                },
            )
            .await
            .diagnostics;
        if has_errors(&diagnostics) {
            return Err(provisioning(step, &address, diagnostics));
        }

        tracing::info!("Reading {}", address);
        let response = data_source
            .read(
                self.ctx.clone(),
                ReadDataSourceRequest {
                    type_name: block.type_name.clone(),
                    config: config.clone(),
                },
            )
            .await;
        if has_errors(&response.diagnostics) {
            return Err(provisioning(step, &address, response.diagnostics));
        }

        self.state.insert(ResourceState::new(
            ResourceMode::Data,
            &block.type_name,
            &block.name,
            response.state,
            config,
        ));
        Ok(())
    }

    async fn import(&mut self, step: usize, import: &ImportStep) -> Result<(), TestError> {
        let import_error = |message: String| TestError::Import {
            step,
            address: import.address.clone(),
            message,
        };

        let existing = self
            .state
            .get(&import.address)
            .cloned()
            .ok_or_else(|| import_error("not found in state".to_string()))?;
        let id = match &import.id {
            Some(id) => id.clone(),
            None => existing
                .id()
                .map(str::to_string)
                .ok_or_else(|| import_error("state has no id to import".to_string()))?,
        };

        tracing::info!("Importing {} with id {}", import.address, id);
        let resource = self
            .resource(step, &import.address, &existing.type_name)
            .await?;
        let response = resource
            .import_state(
                self.ctx.clone(),
                ImportResourceStateRequest {
                    type_name: existing.type_name.clone(),
                    id: id.clone(),
                },
            )
            .await;
        if has_errors(&response.diagnostics) {
            return Err(import_error(join(&response.diagnostics)));
        }

        let imported = response
            .imported_resources
            .into_iter()
            .find(|r| r.type_name == existing.type_name)
            .ok_or_else(|| import_error(format!("no {} was imported", existing.type_name)))?;

        let current = self
            .read(step, &import.address, resource.as_ref(), &imported.state)
            .await?
            .ok_or_else(|| import_error(format!("object with id {} does not exist", id)))?;

        if import.verify {
            let actual = current.flatten();
            let ignored = |key: &str| {
                import
                    .verify_ignore
                    .iter()
                    .any(|prefix| key.starts_with(prefix.as_str()))
            };

            let mut differences = Vec::new();
            for key in existing.attributes.keys().chain(actual.keys()) {
                if ignored(key) || differences.iter().any(|(k, _, _)| k == key) {
                    continue;
                }
                let expected = existing.attribute(key);
                let got = actual.get(key).map(String::as_str);
                if expected != got {
                    differences.push((key.clone(), expected, got));
                }
            }

            if !differences.is_empty() {
                let details: Vec<String> = differences
                    .iter()
                    .map(|(key, expected, got)| {
                        format!("{}: expected {:?}, got {:?}", key, expected, got)
                    })
                    .collect();
                return Err(import_error(format!(
                    "imported attributes differ from applied state: {}",
                    details.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Destroy every managed resource, newest first. Keeps going after a
    /// failure and reports the first one.
    async fn destroy_all(&mut self) -> Result<(), TestError> {
        let mut first_error = None;
        for address in self.state.destroy_order() {
            tracing::info!("Destroying {}", address);
            if let Err(diagnostics) = self.destroy(&address).await {
                tracing::error!("Failed to destroy {}: {}", address, join(&diagnostics));
                first_error.get_or_insert(TestError::Destroy {
                    address,
                    diagnostics,
                });
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn destroy(&mut self, address: &str) -> Result<(), Vec<Diagnostic>> {
        let Some(existing) = self.state.get(address).cloned() else {
            return Ok(());
        };

        let resource = self
            .resource(0, address, &existing.type_name)
            .await
            .map_err(|e| vec![Diagnostic::error(e.to_string(), "")])?;

        let response = resource
            .delete(
                self.ctx.clone(),
                DeleteResourceRequest {
                    type_name: existing.type_name.clone(),
                    prior_state: existing.value.clone(),
                },
            )
            .await;
        if has_errors(&response.diagnostics) {
            return Err(response.diagnostics);
        }

        self.state.remove(address);
        Ok(())
    }

    fn evaluate(&self, step: usize, block: &Block, schema: &Schema) -> Result<DynamicValue, TestError> {
        let value = block
            .body
            .evaluate(&self.state)
            .map_err(|e| TestError::provisioning(step, &block.address(), e))?;
        Ok(DynamicValue::new(normalize_blocks(&schema.block, value)))
    }

    async fn resource(
        &self,
        step: usize,
        address: &str,
        type_name: &str,
    ) -> Result<Box<dyn ResourceWithConfigure>, TestError> {
        let factory = self.resources.get(type_name).ok_or_else(|| {
            TestError::provisioning(
                step,
                address,
                format!("The provider does not support resource type {:?}", type_name),
            )
        })?;

        let mut resource = factory();
        let response = resource
            .configure(
                self.ctx.clone(),
                ConfigureResourceRequest {
                    provider_data: self.provider_data.clone(),
                },
            )
            .await;
        if has_errors(&response.diagnostics) {
            return Err(provisioning(step, address, response.diagnostics));
        }
        Ok(resource)
    }

    async fn data_source(
        &self,
        step: usize,
        address: &str,
        type_name: &str,
    ) -> Result<Box<dyn DataSourceWithConfigure>, TestError> {
        let factory = self.data_sources.get(type_name).ok_or_else(|| {
            TestError::provisioning(
                step,
                address,
                format!("The provider does not support data source {:?}", type_name),
            )
        })?;

        let mut data_source = factory();
        let response = data_source
            .configure(
                self.ctx.clone(),
                ConfigureDataSourceRequest {
                    provider_data: self.provider_data.clone(),
                },
            )
            .await;
        if has_errors(&response.diagnostics) {
            return Err(provisioning(step, address, response.diagnostics));
        }
        Ok(data_source)
    }
}

fn provisioning(step: usize, address: &str, diagnostics: Vec<Diagnostic>) -> TestError {
    TestError::Provisioning {
        step,
        address: address.to_string(),
        diagnostics,
    }
}

fn join(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn has_id(value: &DynamicValue) -> bool {
    matches!(
        value.get_optional_string(&AttributePath::new("id")),
        Ok(Some(id)) if !id.is_empty()
    )
}

fn split_address(address: &str) -> (&str, &str) {
    address.split_once('.').unwrap_or((address, ""))
}

/// Fixture bodies always produce lists for nested blocks; single-nested
/// blocks are objects in configuration values.
fn normalize_blocks(block: &schema::Block, value: Dynamic) -> Dynamic {
    let Dynamic::Map(mut entries) = value else {
        return value;
    };

    for nested in &block.block_types {
        let Some(raw) = entries.remove(&nested.type_name) else {
            continue;
        };
        let normalized = match (nested.nesting, raw) {
            (NestingMode::Single, Dynamic::List(mut items)) if items.len() <= 1 => items
                .pop()
                .map(|item| normalize_blocks(&nested.block, item))
                .unwrap_or(Dynamic::Null),
            (NestingMode::List, Dynamic::List(items)) => Dynamic::List(
                items
                    .into_iter()
                    .map(|item| normalize_blocks(&nested.block, item))
                    .collect(),
            ),
            (_, other) => other,
        };
        entries.insert(nested.type_name.clone(), normalized);
    }
    Dynamic::Map(entries)
}

/// Planned state for an in-place update: the new configuration with
/// computed attributes carried over from the prior state
fn plan_update(schema: &Schema, prior: &DynamicValue, config: &DynamicValue) -> DynamicValue {
    let mut planned = schema.coerce(config);
    if let (Dynamic::Map(entries), Dynamic::Map(prior)) = (&mut planned.value, &prior.value) {
        for attr in schema.block.attributes.iter().filter(|a| a.computed) {
            if entries.get(&attr.name).map_or(true, Dynamic::is_null) {
                let carried = prior.get(&attr.name).cloned().unwrap_or(Dynamic::Unknown);
                entries.insert(attr.name.clone(), carried);
            }
        }
    }
    planned
}
