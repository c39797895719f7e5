//! Validated, immutable snapshot of routes, variants, and collections.
//!
//! A [`MockSet`] is built wholesale from [`MockDefinitions`] and never
//! mutated afterwards. Each collection stores its resolved effective
//! selections, so requests never walk `from` chains.

use super::definitions::{CollectionDefinition, MethodDefinition, MockDefinitions, RouteDefinition};
use super::handlers::{HandlerCore, HandlerRegistry, VariantHandler};
use super::path::PathPattern;
use super::validation::{IssueKind, ValidationError, ValidationReport};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const KNOWN_METHODS: [&str; 9] = [
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "TRACE", "CONNECT",
];

/// Methods a route answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Methods {
    Any,
    Only(Vec<String>),
}

impl Methods {
    fn parse(definition: &MethodDefinition) -> Result<Self, String> {
        let raw = definition.as_vec();
        if raw.is_empty() {
            return Err("at least one method is required".to_string());
        }
        if raw.iter().any(|m| m.trim() == "*") {
            return Ok(Methods::Any);
        }
        let mut methods = Vec::with_capacity(raw.len());
        for method in raw {
            let upper = method.trim().to_ascii_uppercase();
            if !KNOWN_METHODS.contains(&upper.as_str()) {
                return Err(format!("'{}' is not a valid HTTP method", method));
            }
            if !methods.contains(&upper) {
                methods.push(upper);
            }
        }
        Ok(Methods::Only(methods))
    }

    pub fn allows(&self, method: &str) -> bool {
        match self {
            Methods::Any => true,
            Methods::Only(methods) => methods.iter().any(|m| m.eq_ignore_ascii_case(method)),
        }
    }

    pub fn to_strings(&self) -> Vec<String> {
        match self {
            Methods::Any => vec!["*".to_string()],
            Methods::Only(methods) => methods.clone(),
        }
    }
}

pub struct Variant {
    id: String,
    route_id: String,
    handler_type: String,
    options: Value,
    delay: Option<u64>,
    handler: Arc<dyn VariantHandler>,
}

impl Variant {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    /// `routeId:variantId`
    pub fn full_id(&self) -> String {
        format!("{}:{}", self.route_id, self.id)
    }

    pub fn handler_type(&self) -> &str {
        &self.handler_type
    }

    pub fn options(&self) -> &Value {
        &self.options
    }

    pub fn delay(&self) -> Option<u64> {
        self.delay
    }

    pub fn handler(&self) -> &Arc<dyn VariantHandler> {
        &self.handler
    }

    pub fn info(&self) -> VariantInfo {
        VariantInfo {
            id: self.full_id(),
            route: self.route_id.clone(),
            handler_type: self.handler_type.clone(),
            delay: self.delay,
            preview: self.handler.preview(),
        }
    }
}

impl std::fmt::Debug for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variant")
            .field("id", &self.full_id())
            .field("type", &self.handler_type)
            .field("delay", &self.delay)
            .finish()
    }
}

#[derive(Debug)]
pub struct Route {
    id: String,
    pattern: PathPattern,
    methods: Methods,
    delay: Option<u64>,
    variants: Vec<Arc<Variant>>,
}

impl Route {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn methods(&self) -> &Methods {
        &self.methods
    }

    pub fn delay(&self) -> Option<u64> {
        self.delay
    }

    pub fn variants(&self) -> &[Arc<Variant>] {
        &self.variants
    }

    pub fn variant(&self, id: &str) -> Option<&Arc<Variant>> {
        self.variants.iter().find(|v| v.id == id)
    }

    pub fn info(&self) -> RouteInfo {
        RouteInfo {
            id: self.id.clone(),
            url: self.url().to_string(),
            method: self.methods.to_strings(),
            delay: self.delay,
            variants: self.variants.iter().map(|v| v.full_id()).collect(),
        }
    }
}

/// One route and the variant that answers it.
#[derive(Debug, Clone)]
pub struct Selection {
    pub route: Arc<Route>,
    pub variant: Arc<Variant>,
}

impl Selection {
    pub fn full_id(&self) -> String {
        self.variant.full_id()
    }
}

#[derive(Debug)]
pub struct Collection {
    id: String,
    from: Option<String>,
    own: Vec<String>,
    selections: Vec<Selection>,
}

impl Collection {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn from(&self) -> Option<&str> {
        self.from.as_deref()
    }

    /// Effective selections after inheritance, in first-seen route order.
    pub fn selections(&self) -> &[Selection] {
        &self.selections
    }

    pub fn info(&self) -> CollectionInfo {
        CollectionInfo {
            id: self.id.clone(),
            from: self.from.clone(),
            defined_routes: self.own.clone(),
            routes: self.selections.iter().map(Selection::full_id).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    pub id: String,
    pub url: String,
    pub method: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantInfo {
    pub id: String,
    pub route: String,
    #[serde(rename = "type")]
    pub handler_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    pub preview: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInfo {
    pub id: String,
    pub from: Option<String>,
    pub defined_routes: Vec<String>,
    pub routes: Vec<String>,
}

#[derive(Debug)]
pub struct MockSet {
    version: u64,
    definitions: MockDefinitions,
    routes: Vec<Arc<Route>>,
    routes_by_id: HashMap<String, usize>,
    collections: Vec<Arc<Collection>>,
    collections_by_id: HashMap<String, usize>,
}

impl MockSet {
    /// Mock set with nothing in it; active before the first reload.
    pub fn empty() -> Self {
        Self {
            version: 0,
            definitions: MockDefinitions::default(),
            routes: Vec::new(),
            routes_by_id: HashMap::new(),
            collections: Vec::new(),
            collections_by_id: HashMap::new(),
        }
    }

    /// Validate and build in one go.
    pub fn build(
        definitions: MockDefinitions,
        registry: &HandlerRegistry,
        core: &HandlerCore,
        version: u64,
    ) -> Result<Self, ValidationError> {
        let mut builder = MockSetBuilder::new(registry, core);
        builder.build_routes(&definitions.routes);
        builder.build_collections(&definitions.collections);
        builder.finish(definitions, version)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Raw definitions this set was built from.
    pub fn definitions(&self) -> &MockDefinitions {
        &self.definitions
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn route(&self, id: &str) -> Option<&Arc<Route>> {
        self.routes_by_id.get(id).map(|&i| &self.routes[i])
    }

    pub fn variants(&self) -> impl Iterator<Item = &Arc<Variant>> {
        self.routes.iter().flat_map(|route| route.variants.iter())
    }

    /// Look up a selection by `routeId:variantId`.
    pub fn selection(&self, full_id: &str) -> Option<Selection> {
        let (route_id, variant_id) = split_selection(full_id)?;
        let route = self.route(route_id)?;
        let variant = route.variant(variant_id)?;
        Some(Selection {
            route: Arc::clone(route),
            variant: Arc::clone(variant),
        })
    }

    /// Collections in declaration order.
    pub fn collections(&self) -> &[Arc<Collection>] {
        &self.collections
    }

    pub fn collection(&self, id: &str) -> Option<&Arc<Collection>> {
        self.collections_by_id.get(id).map(|&i| &self.collections[i])
    }

    pub fn first_collection(&self) -> Option<&Arc<Collection>> {
        self.collections.first()
    }
}

/// Split `routeId:variantId` at the first `:`.
pub fn split_selection(full_id: &str) -> Option<(&str, &str)> {
    let (route, variant) = full_id.split_once(':')?;
    if route.is_empty() || variant.is_empty() {
        return None;
    }
    Some((route, variant))
}

/// Builds a mock set in phases, collecting every problem along the way.
pub(crate) struct MockSetBuilder<'a> {
    registry: &'a HandlerRegistry,
    core: &'a HandlerCore,
    report: ValidationReport,
    routes: Vec<Arc<Route>>,
    routes_by_id: HashMap<String, usize>,
    // Declared but rejected; selections pointing at them are not reported twice.
    invalid_routes: HashSet<String>,
    invalid_variants: HashSet<String>,
    collections: Vec<Arc<Collection>>,
    collections_by_id: HashMap<String, usize>,
}

impl<'a> MockSetBuilder<'a> {
    pub(crate) fn new(registry: &'a HandlerRegistry, core: &'a HandlerCore) -> Self {
        Self {
            registry,
            core,
            report: ValidationReport::default(),
            routes: Vec::new(),
            routes_by_id: HashMap::new(),
            invalid_routes: HashSet::new(),
            invalid_variants: HashSet::new(),
            collections: Vec::new(),
            collections_by_id: HashMap::new(),
        }
    }

    pub(crate) fn build_routes(&mut self, definitions: &[RouteDefinition]) {
        for (index, definition) in definitions.iter().enumerate() {
            let location = format!("routes[{}]", index);
            if definition.id.trim().is_empty() {
                self.report.add(IssueKind::MissingId, location, "route id is required");
                continue;
            }
            let location = format!("{}({})", location, definition.id);
            if self.routes_by_id.contains_key(&definition.id)
                || self.invalid_routes.contains(&definition.id)
            {
                self.report.add(
                    IssueKind::DuplicateRoute,
                    location,
                    format!("route '{}' is defined more than once", definition.id),
                );
                continue;
            }

            let pattern = PathPattern::compile(&definition.url)
                .map_err(|e| self.report.add(IssueKind::InvalidUrl, format!("{}.url", location), e))
                .ok();
            let methods = Methods::parse(&definition.method)
                .map_err(|e| self.report.add(IssueKind::InvalidMethod, format!("{}.method", location), e))
                .ok();
            let delay = parse_delay(definition.delay.as_ref())
                .map_err(|e| self.report.add(IssueKind::InvalidDelay, format!("{}.delay", location), e))
                .ok();
            let variants = self.build_variants(definition, &location);

            match (pattern, methods, delay) {
                (Some(pattern), Some(methods), Some(delay)) => {
                    self.routes_by_id
                        .insert(definition.id.clone(), self.routes.len());
                    self.routes.push(Arc::new(Route {
                        id: definition.id.clone(),
                        pattern,
                        methods,
                        delay,
                        variants,
                    }));
                }
                _ => {
                    self.invalid_routes.insert(definition.id.clone());
                }
            }
        }
    }

    fn build_variants(&mut self, route: &RouteDefinition, route_location: &str) -> Vec<Arc<Variant>> {
        let registry = self.registry;
        let mut variants: Vec<Arc<Variant>> = Vec::with_capacity(route.variants.len());
        let mut seen = HashSet::new();

        for (index, definition) in route.variants.iter().enumerate() {
            let location = format!("{}.variants[{}]", route_location, index);
            if definition.id.trim().is_empty() {
                self.report.add(IssueKind::MissingId, location, "variant id is required");
                continue;
            }
            let location = format!("{}({})", location, definition.id);
            let full_id = format!("{}:{}", route.id, definition.id);
            if !seen.insert(definition.id.clone()) {
                self.report.add(
                    IssueKind::DuplicateVariant,
                    location,
                    format!("variant '{}' is defined more than once", full_id),
                );
                continue;
            }

            let Some(factory) = registry.get(&definition.handler_type) else {
                self.report.add(
                    IssueKind::HandlerNotFound,
                    location,
                    format!(
                        "no variant handler registered for type '{}'",
                        definition.handler_type
                    ),
                );
                self.invalid_variants.insert(full_id);
                continue;
            };

            let delay = match parse_delay(definition.delay.as_ref()) {
                Ok(delay) => delay,
                Err(message) => {
                    self.report
                        .add(IssueKind::InvalidDelay, format!("{}.delay", location), message);
                    self.invalid_variants.insert(full_id);
                    continue;
                }
            };

            let built = factory
                .validate(&definition.options)
                .and_then(|_| factory.build(&definition.options, self.core));
            match built {
                Ok(handler) => variants.push(Arc::new(Variant {
                    id: definition.id.clone(),
                    route_id: route.id.clone(),
                    handler_type: definition.handler_type.clone(),
                    options: definition.options.clone(),
                    delay,
                    handler,
                })),
                Err(message) => {
                    self.report.add(
                        IssueKind::InvalidHandlerOptions,
                        format!("{}.options", location),
                        format!("'{}' handler: {}", definition.handler_type, message),
                    );
                    self.invalid_variants.insert(full_id);
                }
            }
        }
        variants
    }

    pub(crate) fn build_collections(&mut self, definitions: &[CollectionDefinition]) {
        // First declaration of each id; later duplicates are reported and skipped.
        let mut first_index: HashMap<&str, usize> = HashMap::new();
        let mut duplicates = HashSet::new();
        for (index, definition) in definitions.iter().enumerate() {
            if definition.id.trim().is_empty() {
                self.report.add(
                    IssueKind::MissingId,
                    format!("collections[{}]", index),
                    "collection id is required",
                );
                duplicates.insert(index);
                continue;
            }
            if first_index.contains_key(definition.id.as_str()) {
                self.report.add(
                    IssueKind::DuplicateCollection,
                    format!("collections[{}]({})", index, definition.id),
                    format!("collection '{}' is defined more than once", definition.id),
                );
                duplicates.insert(index);
            } else {
                first_index.insert(definition.id.as_str(), index);
            }
        }

        let parents: Vec<Option<usize>> = definitions
            .iter()
            .map(|d| d.from.as_deref().and_then(|p| first_index.get(p).copied()))
            .collect();

        for (index, definition) in definitions.iter().enumerate() {
            if duplicates.contains(&index) {
                continue;
            }
            let location = format!("collections[{}]({})", index, definition.id);
            let mut valid = true;

            if let Some(parent_id) = definition.from.as_deref() {
                match parents[index] {
                    None => {
                        self.report.add(
                            IssueKind::UnknownParent,
                            format!("{}.from", location),
                            format!("parent collection '{}' does not exist", parent_id),
                        );
                        valid = false;
                    }
                    Some(parent) => {
                        if let Some(chain) = inheritance_cycle(index, &parents, definitions) {
                            self.report.add(
                                IssueKind::InheritanceCycle,
                                format!("{}.from", location),
                                format!("inheritance cycle: {}", chain.join(" -> ")),
                            );
                            valid = false;
                        } else if parent > index {
                            self.report.add(
                                IssueKind::ForwardReference,
                                format!("{}.from", location),
                                format!(
                                    "parent collection '{}' must be declared before '{}'",
                                    parent_id, definition.id
                                ),
                            );
                            valid = false;
                        }
                    }
                }
            }

            let inherited = match definition.from.as_deref() {
                Some(parent_id) if valid => match self.collections_by_id.get(parent_id) {
                    Some(&i) => self.collections[i].selections.clone(),
                    // Parent was itself invalid; its problems are already reported.
                    None => Vec::new(),
                },
                _ => Vec::new(),
            };

            let selections = self.resolve_selections(definition, &location, inherited);
            self.collections_by_id
                .insert(definition.id.clone(), self.collections.len());
            self.collections.push(Arc::new(Collection {
                id: definition.id.clone(),
                from: definition.from.clone(),
                own: definition.routes.clone(),
                selections,
            }));
        }
    }

    fn resolve_selections(
        &mut self,
        definition: &CollectionDefinition,
        location: &str,
        mut selections: Vec<Selection>,
    ) -> Vec<Selection> {
        let mut seen_routes = HashSet::new();

        for (index, entry) in definition.routes.iter().enumerate() {
            let location = format!("{}.routes[{}]", location, index);
            let Some((route_id, variant_id)) = split_selection(entry) else {
                self.report.add(
                    IssueKind::InvalidSelection,
                    location,
                    format!("'{}' is not in 'routeId:variantId' form", entry),
                );
                continue;
            };
            if !seen_routes.insert(route_id.to_string()) {
                self.report.add(
                    IssueKind::DuplicateSelection,
                    location,
                    format!("route '{}' is selected more than once", route_id),
                );
                continue;
            }
            if self.invalid_routes.contains(route_id) || self.invalid_variants.contains(entry.as_str()) {
                continue;
            }
            let Some(&route_index) = self.routes_by_id.get(route_id) else {
                self.report.add(
                    IssueKind::UnknownRoute,
                    location,
                    format!("route '{}' does not exist", route_id),
                );
                continue;
            };
            let route = &self.routes[route_index];
            let Some(variant) = route.variant(variant_id) else {
                self.report.add(
                    IssueKind::UnknownVariant,
                    location,
                    format!("route '{}' has no variant '{}'", route_id, variant_id),
                );
                continue;
            };

            let selection = Selection {
                route: Arc::clone(route),
                variant: Arc::clone(variant),
            };
            match selections.iter_mut().find(|s| s.route.id == route_id) {
                Some(existing) => *existing = selection,
                None => selections.push(selection),
            }
        }
        selections
    }

    pub(crate) fn finish(
        self,
        definitions: MockDefinitions,
        version: u64,
    ) -> Result<MockSet, ValidationError> {
        self.report.into_result(MockSet {
            version,
            definitions,
            routes: self.routes,
            routes_by_id: self.routes_by_id,
            collections: self.collections,
            collections_by_id: self.collections_by_id,
        })
    }
}

/// Walk the `from` chain starting at `start`. Returns the chain when it leads back to `start`.
fn inheritance_cycle(
    start: usize,
    parents: &[Option<usize>],
    definitions: &[CollectionDefinition],
) -> Option<Vec<String>> {
    let mut visited = HashSet::with_capacity(parents.len());
    visited.insert(start);
    let mut chain = vec![definitions[start].id.clone()];
    let mut cursor = parents[start];

    while let Some(current) = cursor {
        chain.push(definitions[current].id.clone());
        if current == start {
            return Some(chain);
        }
        if !visited.insert(current) {
            // Cycle further up the chain that `start` only leads into.
            return None;
        }
        cursor = parents[current];
    }
    None
}

/// Milliseconds from a raw `delay`. Absent or `null` inherits.
fn parse_delay(value: Option<&Value>) -> Result<Option<u64>, String> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            format!("delay must be a non-negative integer of milliseconds, received {}", value)
        }),
    }
}
