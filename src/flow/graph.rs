//! Immutable flow/state graph built from a definition

use super::definition::{FlowSetDefinition, RequirementDef, StateDef};
use super::registry::{Action, ActionRegistry, Predicate};
use crate::context::{AgeFilter, Context};
use crate::error::{DialogError, DialogResult};
use crate::pattern::StartPattern;
use crate::state_machine::TransitionTarget;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What a requirement checks
#[derive(Clone)]
enum Check {
    Entity(String),
    Predicate {
        id: String,
        predicate: Arc<dyn Predicate>,
    },
}

/// Precondition of a state's accept action with its remedial action
#[derive(Clone)]
pub struct Requirement {
    check: Check,
    filter: Option<AgeFilter>,
    include_flow: Option<String>,
    exclude_flow: Option<String>,
    action: Arc<dyn Action>,
}

impl Requirement {
    fn build(def: &RequirementDef, registry: &ActionRegistry, state: &str) -> DialogResult<Self> {
        let check = match (&def.entity, &def.predicate) {
            (Some(entity), None) => Check::Entity(entity.clone()),
            (None, Some(id)) => Check::Predicate {
                id: id.clone(),
                predicate: registry.resolve_predicate(id)?,
            },
            _ => {
                return Err(DialogError::configuration(format!(
                    "requirement of {state} needs exactly one of entity or predicate"
                )))
            }
        };
        let filter = if def.filter == AgeFilter::default() {
            None
        } else {
            def.filter.validate().map_err(|e| {
                DialogError::configuration(format!("requirement of {state}: {e}"))
            })?;
            Some(def.filter)
        };
        for pattern in [&def.include_flow, &def.exclude_flow].into_iter().flatten() {
            StartPattern::new(pattern)?;
        }
        Ok(Self {
            check,
            filter,
            include_flow: def.include_flow.clone(),
            exclude_flow: def.exclude_flow.clone(),
            action: registry.resolve(&def.action)?,
        })
    }

    /// Whether the requirement holds for the given context
    pub fn is_met(&self, context: &Context) -> DialogResult<bool> {
        let entity = match &self.check {
            Check::Predicate { predicate, .. } => return Ok(predicate.check(context)),
            Check::Entity(entity) => entity,
        };
        let mut query = context.query(entity);
        if let Some(filter) = self.filter {
            query = query.newer_than(filter)?;
        }
        if let Some(pattern) = &self.include_flow {
            query = query.include_flow(pattern)?;
        }
        if let Some(pattern) = &self.exclude_flow {
            query = query.exclude_flow(pattern)?;
        }
        Ok(!query.is_empty())
    }

    pub fn action(&self) -> &Arc<dyn Action> {
        &self.action
    }

    pub fn describe(&self) -> String {
        match &self.check {
            Check::Entity(entity) => format!("entity {entity}"),
            Check::Predicate { id, .. } => format!("predicate {id}"),
        }
    }
}

impl fmt::Debug for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requirement")
            .field("check", &self.describe())
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

/// A node `<flow>.<state>` of the graph
#[derive(Clone)]
pub struct State {
    name: String,
    flow: String,
    init: Option<Arc<dyn Action>>,
    accept: Option<Arc<dyn Action>>,
    intent: Option<StartPattern>,
    intent_transitions: Vec<(StartPattern, TransitionTarget)>,
    requires: Vec<Requirement>,
}

impl State {
    fn build(
        flow: &str,
        name: &str,
        def: &StateDef,
        registry: &ActionRegistry,
    ) -> DialogResult<Self> {
        let qualified = format!("{flow}.{name}");
        let resolve = |action: &Option<_>| -> DialogResult<Option<Arc<dyn Action>>> {
            action
                .as_ref()
                .map(|a| {
                    registry.resolve(a).map_err(|e| {
                        DialogError::configuration(format!("state {qualified}: {e}"))
                    })
                })
                .transpose()
        };
        let init = resolve(&def.init)?;
        let accept = resolve(&def.accept)?;
        let intent = def.intent.as_deref().map(StartPattern::new).transpose()?;
        let intent_transitions = def
            .intent_transitions
            .iter()
            .map(|(pattern, target)| Ok((StartPattern::new(pattern)?, target.clone())))
            .collect::<DialogResult<Vec<_>>>()?;
        let requires = def
            .requires
            .iter()
            .map(|r| Requirement::build(r, registry, &qualified))
            .collect::<DialogResult<Vec<_>>>()?;

        Ok(Self {
            name: qualified,
            flow: flow.to_string(),
            init,
            accept,
            intent,
            intent_transitions,
            requires,
        })
    }

    /// Qualified name `<flow>.<state>`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flow(&self) -> &str {
        &self.flow
    }

    pub fn init(&self) -> Option<&Arc<dyn Action>> {
        self.init.as_ref()
    }

    pub fn accept(&self) -> Option<&Arc<dyn Action>> {
        self.accept.as_ref()
    }

    pub fn intent(&self) -> Option<&StartPattern> {
        self.intent.as_ref()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requires
    }

    /// First per-state intent override matching the intent, in definition order
    pub fn resolve_intent(&self, intent: &str) -> Option<&TransitionTarget> {
        self.intent_transitions
            .iter()
            .find(|(pattern, _)| pattern.matches(intent))
            .map(|(_, target)| target)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name)
            .field("init", &self.init.is_some())
            .field("accept", &self.accept.is_some())
            .field("intent", &self.intent)
            .field(
                "intent_transitions",
                &self
                    .intent_transitions
                    .iter()
                    .map(|(p, t)| format!("{} -> {t}", p.as_str()))
                    .collect::<Vec<_>>(),
            )
            .field("requires", &self.requires)
            .finish()
    }
}

/// Named group of states sharing an intent pattern
#[derive(Debug, Clone)]
pub struct Flow {
    name: String,
    intent: StartPattern,
    states: Vec<State>,
    index: HashMap<String, usize>,
}

impl Flow {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn intent(&self) -> &StartPattern {
        &self.intent
    }

    /// States in definition order
    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.states.iter()
    }

    /// State by its bare name
    pub fn get_state(&self, name: &str) -> Option<&State> {
        self.index.get(name).map(|i| &self.states[*i])
    }

    /// Qualified name of the flow's entry state
    pub fn root_name(&self) -> String {
        format!("{}.root", self.name)
    }
}

/// Read-only graph of every flow, shared across sessions
#[derive(Debug, Clone)]
pub struct FlowGraph {
    flows: Vec<Flow>,
    index: HashMap<String, usize>,
    root: String,
    version: String,
}

fn check_name(kind: &str, name: &str) -> DialogResult<()> {
    if name.is_empty() || name.contains('.') || name.contains(':') {
        return Err(DialogError::configuration(format!(
            "{kind} name \"{name}\" must be non-empty and must not contain '.' or ':'"
        )));
    }
    Ok(())
}

impl FlowGraph {
    /// Build the graph, resolving every action, predicate, template and pattern
    pub fn build(
        definition: &FlowSetDefinition,
        registry: &ActionRegistry,
        root: &str,
    ) -> DialogResult<Self> {
        let mut flows = Vec::with_capacity(definition.flows.len());
        let mut index = HashMap::new();

        for (flow_name, flow_def) in definition.flows.iter() {
            check_name("flow", flow_name)?;
            if index.insert(flow_name.to_string(), flows.len()).is_some() {
                return Err(DialogError::configuration(format!(
                    "flow \"{flow_name}\" is defined twice"
                )));
            }

            let intent = match &flow_def.intent {
                Some(pattern) => StartPattern::new(pattern)?,
                None => StartPattern::literal(flow_name),
            };

            let mut states = Vec::with_capacity(flow_def.states.len());
            let mut state_index = HashMap::new();
            for (state_name, state_def) in flow_def.states.iter() {
                check_name("state", state_name)?;
                if state_index.insert(state_name.to_string(), states.len()).is_some() {
                    return Err(DialogError::configuration(format!(
                        "state \"{flow_name}.{state_name}\" is defined twice"
                    )));
                }
                states.push(State::build(flow_name, state_name, state_def, registry)?);
            }
            if !state_index.contains_key("root") {
                tracing::warn!(flow = %flow_name, "Flow has no root state, intent matches will not resolve");
            }

            flows.push(Flow {
                name: flow_name.to_string(),
                intent,
                states,
                index: state_index,
            });
        }

        let graph = Self {
            flows,
            index,
            root: root.to_string(),
            version: String::new(),
        };
        if graph.get_state(root).is_none() {
            return Err(DialogError::configuration(format!(
                "root state {root} does not exist"
            )));
        }

        tracing::info!(
            flows = graph.flows.len(),
            states = graph.flows.iter().map(|f| f.states.len()).sum::<usize>(),
            root = %root,
            "Flow graph built"
        );
        Ok(graph)
    }

    /// Tag the graph with the provider version it was built from
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn get_flow(&self, name: &str) -> Option<&Flow> {
        self.index.get(name).map(|i| &self.flows[*i])
    }

    /// State by qualified name `<flow>.<state>`; bare names are not resolved here
    pub fn get_state(&self, qualified: &str) -> Option<&State> {
        let (flow, state) = qualified.split_once('.')?;
        self.get_flow(flow)?.get_state(state)
    }

    /// Flows in definition order
    pub fn flows(&self) -> impl Iterator<Item = &Flow> {
        self.flows.iter()
    }

    /// Qualified name of the designated root state
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn is_root(&self, qualified: &str) -> bool {
        self.root == qualified
    }
}
