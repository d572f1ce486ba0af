#![allow(clippy::disallowed_methods)] // Allow unwrap() in tests for clarity

use async_trait::async_trait;
use regex::Regex;
use serial_test::serial;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tfplug::context::Context;
use tfplug::data_source::{
    ConfigureDataSourceRequest, ConfigureDataSourceResponse, DataSourceSchemaRequest,
    DataSourceSchemaResponse, ReadDataSourceRequest, ReadDataSourceResponse,
    ValidateDataSourceConfigRequest, ValidateDataSourceConfigResponse,
};
use tfplug::provider::{
    ConfigureProviderRequest, ConfigureProviderResponse, DataSourceFactory, ProviderSchemaRequest,
    ProviderSchemaResponse, ResourceFactory,
};
use tfplug::resource::{
    ConfigureResourceRequest, ConfigureResourceResponse, CreateResourceRequest,
    CreateResourceResponse, DeleteResourceRequest, DeleteResourceResponse,
    ImportResourceStateRequest, ImportResourceStateResponse, ReadResourceRequest,
    ReadResourceResponse, ResourceSchemaRequest, ResourceSchemaResponse, UpdateResourceRequest,
    UpdateResourceResponse, ValidateResourceConfigRequest, ValidateResourceConfigResponse,
};
use tfplug::schema::NestingMode;
use tfplug::testing::{
    compose, list, map, parallel_test, reference, resource_attr, resource_attr_pair,
    resource_attr_set, unit_test, DestroyCheck, Fixture, Outcome, TestCase, TestError, TestState,
    TestStep,
};
use tfplug::{
    import_state_passthrough_id, AttributeBuilder, AttributePath, AttributeType, DataSource,
    DataSourceWithConfigure, Diagnostic, DynamicValue, NestedBlockBuilder, Provider, ProviderData,
    Resource, ResourceWithConfigure, Schema, SchemaBuilder,
};

/// Backing store shared by the toy provider and the assertions
#[derive(Default)]
struct Shelf {
    items: Mutex<BTreeMap<String, Item>>,
    next_id: Mutex<u32>,
    log: Mutex<Vec<String>>,
}

#[derive(Clone)]
struct Item {
    name: String,
    labels: BTreeMap<String, String>,
}

impl Shelf {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn contains(&self, id: &str) -> bool {
        self.items.lock().unwrap().contains_key(id)
    }
}

struct ShelfProvider {
    shelf: Arc<Shelf>,
}

#[async_trait]
impl Provider for ShelfProvider {
    fn type_name(&self) -> &str {
        "shelf"
    }

    async fn schema(&self, _ctx: Context, _request: ProviderSchemaRequest) -> ProviderSchemaResponse {
        ProviderSchemaResponse {
            schema: SchemaBuilder::new()
                .attribute(
                    AttributeBuilder::new("label_prefix", AttributeType::String)
                        .optional()
                        .build(),
                )
                .build(),
            diagnostics: vec![],
        }
    }

    async fn configure(
        &mut self,
        _ctx: Context,
        _request: ConfigureProviderRequest,
    ) -> ConfigureProviderResponse {
        ConfigureProviderResponse {
            diagnostics: vec![],
            provider_data: Some(self.shelf.clone() as ProviderData),
        }
    }

    fn resources(&self) -> HashMap<String, ResourceFactory> {
        let mut resources: HashMap<String, ResourceFactory> = HashMap::new();
        resources.insert(
            "shelf_item".to_string(),
            Box::new(|| Box::new(ItemResource { shelf: None })),
        );
        resources
    }

    fn data_sources(&self) -> HashMap<String, DataSourceFactory> {
        let mut data_sources: HashMap<String, DataSourceFactory> = HashMap::new();
        data_sources.insert(
            "shelf_item".to_string(),
            Box::new(|| Box::new(ItemDataSource { shelf: None })),
        );
        data_sources
    }
}

fn downcast(provider_data: Option<ProviderData>) -> Option<Arc<Shelf>> {
    provider_data.and_then(|data| data.downcast::<Shelf>().ok())
}

fn item_state(id: &str, item: &Item) -> DynamicValue {
    let mut state = DynamicValue::object();
    state.set_string(&AttributePath::new("id"), id).unwrap();
    state.set_string(&AttributePath::new("name"), &item.name).unwrap();
    state
        .set_string_map(&AttributePath::new("labels"), &item.labels)
        .unwrap();
    state
}

struct ItemResource {
    shelf: Option<Arc<Shelf>>,
}

impl ItemResource {
    fn shelf(&self) -> &Shelf {
        self.shelf.as_deref().unwrap()
    }
}

fn item_schema() -> Schema {
    SchemaBuilder::new()
        .attribute(
            AttributeBuilder::new("id", AttributeType::String)
                .computed()
                .build(),
        )
        .attribute(
            AttributeBuilder::new("name", AttributeType::String)
                .required()
                .build(),
        )
        .attribute(
            AttributeBuilder::new("labels", AttributeType::Map(Box::new(AttributeType::String)))
                .optional()
                .build(),
        )
        .build()
}

#[async_trait]
impl Resource for ItemResource {
    fn type_name(&self) -> &str {
        "shelf_item"
    }

    async fn schema(&self, _ctx: Context, _request: ResourceSchemaRequest) -> ResourceSchemaResponse {
        ResourceSchemaResponse {
            schema: item_schema(),
            diagnostics: vec![],
        }
    }

    async fn validate(
        &self,
        _ctx: Context,
        request: ValidateResourceConfigRequest,
    ) -> ValidateResourceConfigResponse {
        let mut diagnostics = vec![];
        if let Ok(name) = request.config.get_string(&AttributePath::new("name")) {
            if name == "forbidden" {
                diagnostics.push(
                    Diagnostic::error("Invalid name", "the name \"forbidden\" is reserved")
                        .with_attribute(AttributePath::new("name")),
                );
            }
        }
        ValidateResourceConfigResponse { diagnostics }
    }

    async fn create(&self, _ctx: Context, request: CreateResourceRequest) -> CreateResourceResponse {
        let shelf = self.shelf();
        let id = {
            let mut next = shelf.next_id.lock().unwrap();
            *next += 1;
            format!("item-{}", next)
        };
        let item = Item {
            name: request
                .config
                .get_string(&AttributePath::new("name"))
                .unwrap(),
            labels: request
                .config
                .get_string_map(&AttributePath::new("labels"))
                .unwrap(),
        };
        shelf.items.lock().unwrap().insert(id.clone(), item.clone());
        shelf.record(format!("create {}", item.name));

        CreateResourceResponse {
            new_state: item_state(&id, &item),
            diagnostics: vec![],
        }
    }

    async fn read(&self, _ctx: Context, request: ReadResourceRequest) -> ReadResourceResponse {
        let id = request
            .current_state
            .get_string(&AttributePath::new("id"))
            .unwrap();
        let items = self.shelf().items.lock().unwrap();
        ReadResourceResponse {
            new_state: items.get(&id).map(|item| item_state(&id, item)),
            diagnostics: vec![],
        }
    }

    async fn update(&self, _ctx: Context, request: UpdateResourceRequest) -> UpdateResourceResponse {
        let id = request
            .prior_state
            .get_string(&AttributePath::new("id"))
            .unwrap();
        let item = Item {
            name: request
                .config
                .get_string(&AttributePath::new("name"))
                .unwrap(),
            labels: request
                .config
                .get_string_map(&AttributePath::new("labels"))
                .unwrap(),
        };
        self.shelf()
            .items
            .lock()
            .unwrap()
            .insert(id.clone(), item.clone());
        self.shelf().record(format!("update {}", item.name));

        UpdateResourceResponse {
            new_state: item_state(&id, &item),
            diagnostics: vec![],
        }
    }

    async fn delete(&self, _ctx: Context, request: DeleteResourceRequest) -> DeleteResourceResponse {
        let id = request
            .prior_state
            .get_string(&AttributePath::new("id"))
            .unwrap();
        let removed = self.shelf().items.lock().unwrap().remove(&id);
        if let Some(item) = removed {
            self.shelf().record(format!("delete {}", item.name));
        }
        DeleteResourceResponse {
            diagnostics: vec![],
        }
    }

    async fn import_state(
        &self,
        _ctx: Context,
        request: ImportResourceStateRequest,
    ) -> ImportResourceStateResponse {
        import_state_passthrough_id(AttributePath::new("id"), &request)
    }
}

#[async_trait]
impl ResourceWithConfigure for ItemResource {
    async fn configure(
        &mut self,
        _ctx: Context,
        request: ConfigureResourceRequest,
    ) -> ConfigureResourceResponse {
        self.shelf = downcast(request.provider_data);
        ConfigureResourceResponse {
            diagnostics: vec![],
        }
    }
}

struct ItemDataSource {
    shelf: Option<Arc<Shelf>>,
}

#[async_trait]
impl DataSource for ItemDataSource {
    fn type_name(&self) -> &str {
        "shelf_item"
    }

    async fn schema(
        &self,
        _ctx: Context,
        _request: DataSourceSchemaRequest,
    ) -> DataSourceSchemaResponse {
        DataSourceSchemaResponse {
            schema: SchemaBuilder::new()
                .attribute(
                    AttributeBuilder::new("id", AttributeType::String)
                        .optional()
                        .computed()
                        .build(),
                )
                .attribute(
                    AttributeBuilder::new("name", AttributeType::String)
                        .computed()
                        .build(),
                )
                .attribute(
                    AttributeBuilder::new(
                        "labels",
                        AttributeType::Map(Box::new(AttributeType::String)),
                    )
                    .computed()
                    .build(),
                )
                .block(
                    NestedBlockBuilder::new("filter", NestingMode::List)
                        .attribute(
                            AttributeBuilder::new("name", AttributeType::String)
                                .required()
                                .build(),
                        )
                        .attribute(
                            AttributeBuilder::new(
                                "values",
                                AttributeType::List(Box::new(AttributeType::String)),
                            )
                            .required()
                            .build(),
                        )
                        .build(),
                )
                .build(),
            diagnostics: vec![],
        }
    }

    async fn validate(
        &self,
        _ctx: Context,
        _request: ValidateDataSourceConfigRequest,
    ) -> ValidateDataSourceConfigResponse {
        ValidateDataSourceConfigResponse {
            diagnostics: vec![],
        }
    }

    async fn read(&self, _ctx: Context, request: ReadDataSourceRequest) -> ReadDataSourceResponse {
        let items = self.shelf.as_ref().unwrap().items.lock().unwrap();
        let wanted_id = request
            .config
            .get_optional_string(&AttributePath::new("id"))
            .unwrap();
        let wanted_names: Vec<String> = request
            .config
            .get_list(&AttributePath::new("filter"))
            .unwrap()
            .iter()
            .filter_map(|f| {
                let f = DynamicValue::new(f.clone());
                f.get_list(&AttributePath::new("values")).ok()
            })
            .flatten()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        let found = items.iter().find(|(id, item)| {
            wanted_id.as_deref().map_or(true, |w| w == id.as_str())
                && (wanted_names.is_empty() || wanted_names.contains(&item.name))
        });

        match found {
            Some((id, item)) => ReadDataSourceResponse {
                state: item_state(id, item),
                diagnostics: vec![],
            },
            None => ReadDataSourceResponse {
                state: request.config,
                diagnostics: vec![Diagnostic::error("no matching item found", "")],
            },
        }
    }
}

#[async_trait]
impl DataSourceWithConfigure for ItemDataSource {
    async fn configure(
        &mut self,
        _ctx: Context,
        request: ConfigureDataSourceRequest,
    ) -> ConfigureDataSourceResponse {
        self.shelf = downcast(request.provider_data);
        ConfigureDataSourceResponse {
            diagnostics: vec![],
        }
    }
}

struct ItemsGone;

#[async_trait]
impl DestroyCheck for ItemsGone {
    async fn check_destroy(
        &self,
        _ctx: Context,
        provider_data: Option<ProviderData>,
        state: &TestState,
    ) -> Result<(), String> {
        let shelf = downcast(provider_data).ok_or("provider not configured")?;
        for item in state.resources_of_type("shelf_item") {
            let id = item.id().unwrap_or_default();
            if shelf.contains(id) {
                return Err(format!("shelf item {} still exists", id));
            }
        }
        Ok(())
    }
}

fn case(shelf: &Arc<Shelf>) -> TestCase {
    let shelf = shelf.clone();
    TestCase::new(move || ShelfProvider {
        shelf: shelf.clone(),
    })
}

fn labelled(name: &str) -> Fixture {
    Fixture::new()
        .resource("shelf_item", "test", |b| {
            b.attr("name", name).attr("labels", map([("Name", name)]))
        })
        .data("shelf_item", "test", |b| {
            b.block("filter", |f| {
                f.attr("name", "name")
                    .attr("values", list([reference("shelf_item.test.name")]))
            })
        })
}

#[tokio::test]
async fn test_lookup_by_filter_matches_resource() {
    let shelf = Arc::new(Shelf::default());

    let outcome = unit_test(
        case(&shelf).check_destroy(ItemsGone).step(
            TestStep::apply(labelled("widget")).check(compose(vec![
                resource_attr_pair("shelf_item.test", "id", "data.shelf_item.test", "id"),
                resource_attr_pair("shelf_item.test", "name", "data.shelf_item.test", "name"),
                resource_attr_pair(
                    "shelf_item.test",
                    "labels.%",
                    "data.shelf_item.test",
                    "labels.%",
                ),
                resource_attr("data.shelf_item.test", "labels.Name", "widget"),
            ])),
        ),
    )
    .await
    .unwrap();

    assert_eq!(outcome, Outcome::Passed { steps: 1 });
    assert_eq!(shelf.log(), vec!["create widget", "delete widget"]);
}

#[tokio::test]
async fn test_dependencies_are_applied_first_and_destroyed_last() {
    let shelf = Arc::new(Shelf::default());
    let fixture = Fixture::new()
        .resource("shelf_item", "child", |b| {
            b.attr("name", reference("shelf_item.parent.id"))
        })
        .resource("shelf_item", "parent", |b| b.attr("name", "parent"));

    unit_test(case(&shelf).step(TestStep::apply(fixture)))
        .await
        .unwrap();

    assert_eq!(
        shelf.log(),
        vec![
            "create parent",
            "create item-1",
            "delete item-1",
            "delete parent"
        ]
    );
}

#[tokio::test]
async fn test_failed_check_still_destroys() {
    let shelf = Arc::new(Shelf::default());

    let err = unit_test(
        case(&shelf).check_destroy(ItemsGone).step(
            TestStep::apply(labelled("widget"))
                .check(resource_attr("shelf_item.test", "name", "gadget")),
        ),
    )
    .await
    .unwrap_err();

    match err {
        TestError::Check { step, source } => {
            assert_eq!(step, 1);
            assert!(source.to_string().contains("Attribute 'name'"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(shelf.items.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_schema_violation_is_a_provisioning_failure() {
    let shelf = Arc::new(Shelf::default());
    let fixture = Fixture::new().resource("shelf_item", "test", |b| b.attr("colour", "red"));

    let err = unit_test(case(&shelf).step(TestStep::apply(fixture)))
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("shelf_item.test"), "{}", message);
    assert!(message.contains("Missing required argument"), "{}", message);
    assert!(shelf.log().is_empty());
}

#[tokio::test]
async fn test_expect_error_matches_validation_message() {
    let shelf = Arc::new(Shelf::default());
    let fixture = Fixture::new().resource("shelf_item", "test", |b| b.attr("name", "forbidden"));

    unit_test(
        case(&shelf)
            .step(TestStep::apply(fixture).expect_error(Regex::new("is reserved").unwrap())),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_undeclared_reference_fails_before_provisioning() {
    let shelf = Arc::new(Shelf::default());
    let fixture = Fixture::new()
        .resource("shelf_item", "cert", |b| b.attr("name", "cert"))
        .resource("shelf_item", "test", |b| {
            b.attr("name", reference("shelf_item.other.id"))
        });

    let err = unit_test(case(&shelf).step(TestStep::apply(fixture)))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("undeclared resource shelf_item.other"));
    assert!(shelf.log().is_empty());
}

#[tokio::test]
async fn test_second_step_updates_and_removes() {
    let shelf = Arc::new(Shelf::default());
    let first = Fixture::new()
        .resource("shelf_item", "a", |b| b.attr("name", "a"))
        .resource("shelf_item", "b", |b| b.attr("name", "b"));
    let second =
        Fixture::new().resource("shelf_item", "a", |b| b.attr("name", "a").attr("labels", map([("k", "v")])));

    unit_test(
        case(&shelf)
            .step(TestStep::apply(first))
            .step(TestStep::apply(second).check(resource_attr("shelf_item.a", "labels.k", "v"))),
    )
    .await
    .unwrap();

    assert_eq!(
        shelf.log(),
        vec!["create a", "create b", "delete b", "update a", "delete a"]
    );
}

#[tokio::test]
async fn test_import_verifies_state() {
    let shelf = Arc::new(Shelf::default());
    let fixture = Fixture::new().resource("shelf_item", "test", |b| b.attr("name", "widget"));

    unit_test(
        case(&shelf)
            .step(TestStep::apply(fixture).check(resource_attr_set("shelf_item.test", "id")))
            .step(TestStep::import("shelf_item.test").import_state_verify()),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_import_of_missing_object_fails() {
    let shelf = Arc::new(Shelf::default());
    let fixture = Fixture::new().resource("shelf_item", "test", |b| b.attr("name", "widget"));

    let err = unit_test(
        case(&shelf)
            .step(TestStep::apply(fixture))
            .step(TestStep::import("shelf_item.test").import_state_id("item-404")),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TestError::Import { step: 2, .. }), "{}", err);
}

#[tokio::test]
async fn test_pre_check_aborts_before_configure() {
    let shelf = Arc::new(Shelf::default());

    let err = unit_test(
        case(&shelf)
            .pre_check(|| Err("SHELF_TOKEN must be set".to_string()))
            .step(TestStep::apply(labelled("widget"))),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TestError::PreCheck(ref m) if m.contains("SHELF_TOKEN")));
    assert!(shelf.log().is_empty());
}

#[tokio::test]
async fn test_destroy_check_failure_is_reported() {
    struct NeverGone;

    #[async_trait]
    impl DestroyCheck for NeverGone {
        async fn check_destroy(
            &self,
            _ctx: Context,
            _provider_data: Option<ProviderData>,
            state: &TestState,
        ) -> Result<(), String> {
            let count = state.resources_of_type("shelf_item").count();
            Err(format!("{} shelf items still exist", count))
        }
    }

    let shelf = Arc::new(Shelf::default());
    let err = unit_test(
        case(&shelf)
            .check_destroy(NeverGone)
            .step(TestStep::apply(labelled("widget"))),
    )
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "destroy check failed: 1 shelf items still exist");
}

#[tokio::test]
#[serial]
async fn test_parallel_test_skips_without_tf_acc() {
    std::env::remove_var("TF_ACC");
    let shelf = Arc::new(Shelf::default());

    let outcome = parallel_test(case(&shelf).step(TestStep::apply(labelled("widget"))))
        .await
        .unwrap();

    assert!(outcome.is_skipped());
    assert!(shelf.log().is_empty());
}

#[tokio::test]
#[serial]
async fn test_parallel_test_runs_with_tf_acc() {
    std::env::set_var("TF_ACC", "1");
    let shelf = Arc::new(Shelf::default());

    let outcome = parallel_test(case(&shelf).step(TestStep::apply(labelled("widget"))))
        .await
        .unwrap();
    std::env::remove_var("TF_ACC");

    assert_eq!(outcome, Outcome::Passed { steps: 1 });
}
