//! In-process acceptance test harness
//!
//! A [`TestCase`] drives a provider the way Terraform would: it configures
//! the provider, applies each step's [`Fixture`], runs the step's checks
//! against the resulting [`TestState`], and finally destroys everything it
//! created before handing the pre-destroy state to a [`DestroyCheck`].
//!
//! ```ignore
//! let case = TestCase::new(AwsProvider::new)
//!     .pre_check(pre_check)
//!     .check_destroy(CustomerGatewayDestroyed)
//!     .step(TestStep::apply(fixture).check(compose(vec![
//!         resource_attr_pair("aws_customer_gateway.test", "bgp_asn",
//!                            "data.aws_customer_gateway.test", "bgp_asn"),
//!     ])));
//!
//! parallel_test(case).await?;
//! ```

pub mod check;
mod error;
pub mod fixture;
pub mod random;
mod runner;
pub mod state;

pub use check::{
    compose, compose_aggregate, resource_attr, resource_attr_pair, resource_attr_set, CheckError,
    CheckFunc,
};
pub use error::TestError;
pub use fixture::{list, map, reference, Body, Expr, Fixture};
pub use random::{rand_int_range, random_with_prefix};
pub use state::{ResourceMode, ResourceState, TestState};

use crate::context::Context;
use crate::provider::{Provider, ProviderData};
use crate::types::DynamicValue;
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;

/// Environment variable that enables acceptance tests against real infrastructure
pub const TF_ACC: &str = "TF_ACC";

/// Environment variable holding the harness log level
pub const TF_LOG: &str = "TF_LOG";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub type PreCheckFunc = Box<dyn Fn() -> Result<(), String> + Send + Sync>;

pub type ProviderFactory = Box<dyn Fn() -> Box<dyn Provider> + Send + Sync>;

/// Verifies that destroyed infrastructure is really gone.
///
/// `state` is the last state before destroy, so implementations can look up
/// every object the test created.
#[async_trait]
pub trait DestroyCheck: Send + Sync {
    async fn check_destroy(
        &self,
        ctx: Context,
        provider_data: Option<ProviderData>,
        state: &TestState,
    ) -> Result<(), String>;
}

/// A sequence of steps run against one configured provider
pub struct TestCase {
    pub(crate) pre_check: Option<PreCheckFunc>,
    pub(crate) provider_factory: ProviderFactory,
    pub(crate) provider_config: DynamicValue,
    pub(crate) check_destroy: Option<Box<dyn DestroyCheck>>,
    pub(crate) steps: Vec<TestStep>,
    pub(crate) timeout: Duration,
}

impl TestCase {
    pub fn new<F, P>(provider_factory: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Provider + 'static,
    {
        Self {
            pre_check: None,
            provider_factory: Box::new(move || Box::new(provider_factory())),
            provider_config: DynamicValue::object(),
            check_destroy: None,
            steps: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Runs before anything is provisioned; an error aborts the case
    pub fn pre_check<F>(mut self, check: F) -> Self
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        self.pre_check = Some(Box::new(check));
        self
    }

    /// Body of the `provider` block. Defaults to an empty block.
    pub fn provider_config(mut self, config: DynamicValue) -> Self {
        self.provider_config = config;
        self
    }

    pub fn check_destroy(mut self, check: impl DestroyCheck + 'static) -> Self {
        self.check_destroy = Some(Box::new(check));
        self
    }

    pub fn step(mut self, step: TestStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Upper bound for the whole case, destroy included
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One apply or import step
pub struct TestStep {
    pub(crate) kind: StepKind,
    pub(crate) check: Option<CheckFunc>,
    pub(crate) expect_error: Option<Regex>,
}

pub(crate) enum StepKind {
    Apply(Fixture),
    Import(ImportStep),
}

pub(crate) struct ImportStep {
    pub(crate) address: String,
    pub(crate) id: Option<String>,
    pub(crate) verify: bool,
    pub(crate) verify_ignore: Vec<String>,
}

impl TestStep {
    /// Apply `fixture`, creating, updating or destroying resources to match it
    pub fn apply(fixture: Fixture) -> Self {
        Self {
            kind: StepKind::Apply(fixture),
            check: None,
            expect_error: None,
        }
    }

    /// Import the resource at `address` from the current state by its id
    pub fn import(address: &str) -> Self {
        Self {
            kind: StepKind::Import(ImportStep {
                address: address.to_string(),
                id: None,
                verify: false,
                verify_ignore: Vec::new(),
            }),
            check: None,
            expect_error: None,
        }
    }

    pub fn check(mut self, check: CheckFunc) -> Self {
        self.check = Some(check);
        self
    }

    /// The step passes only if it fails with an error matching `pattern`
    pub fn expect_error(mut self, pattern: Regex) -> Self {
        self.expect_error = Some(pattern);
        self
    }

    /// Import with this id instead of the id recorded in state
    pub fn import_state_id(mut self, id: &str) -> Self {
        if let StepKind::Import(import) = &mut self.kind {
            import.id = Some(id.to_string());
        }
        self
    }

    /// Compare the imported attributes with the applied ones
    pub fn import_state_verify(mut self) -> Self {
        if let StepKind::Import(import) = &mut self.kind {
            import.verify = true;
        }
        self
    }

    /// Attribute prefixes left out of import verification
    pub fn import_state_verify_ignore(mut self, keys: &[&str]) -> Self {
        if let StepKind::Import(import) = &mut self.kind {
            import
                .verify_ignore
                .extend(keys.iter().map(|k| k.to_string()));
        }
        self
    }
}

/// How a test case ended when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed { steps: usize },
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped { .. })
    }
}

/// True when `TF_ACC` is set to anything but empty or "0"
pub fn acceptance_enabled() -> bool {
    std::env::var(TF_ACC)
        .map(|v| !v.is_empty() && v != "0")
        .unwrap_or(false)
}

/// Install a fmt subscriber writing through the test writer. The level comes
/// from `TF_LOG` and defaults to WARN. Safe to call from every test.
pub fn init_logging() {
    let level = std::env::var(TF_LOG)
        .ok()
        .and_then(|v| v.parse::<tracing::Level>().ok())
        .unwrap_or(tracing::Level::WARN);

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_test_writer()
        .try_init();
}

/// Run an acceptance test case. Skipped unless `TF_ACC` is set, since it
/// provisions real infrastructure.
pub async fn parallel_test(case: TestCase) -> Result<Outcome, TestError> {
    init_logging();
    if !acceptance_enabled() {
        let reason = format!("Acceptance tests skipped unless env '{}' set", TF_ACC);
        tracing::warn!("{}", reason);
        return Ok(Outcome::Skipped { reason });
    }
    runner::run(case).await
}

/// Run a test case unconditionally, for providers wired to local fakes
pub async fn unit_test(case: TestCase) -> Result<Outcome, TestError> {
    init_logging();
    runner::run(case).await
}
