//! # Conveyor Belt
//!
//! Decides, then runs, the ordered list of transformers for one object at one
//! processing stage (`harvestQueue`, `renderQueue`, ...).
//!
//! ## Chain resolution (highest priority first)
//!
//! 1. In a routing context, an object flagged with the user-priority flag gets
//!    the single synthetic user-priority selector. The flag is cleared so the
//!    next resolution for the object falls through.
//! 2. A per-object override: the object's metadata property named after the
//!    stage, holding a comma-separated list of transformer ids.
//! 3. The stage's configured default list.
//! 4. Nothing: zero transformers run and the object is returned unchanged.
//!
//! A stage exists for an object when it is configured (possibly with an empty
//! list) or when the object carries its own override for it.
//!
//! ## Execution
//!
//! Chain entries are looked up in a pool of transformers instantiated and
//! initialized once from `transformer_defaults`. Each receives the caller's
//! base configuration with its `transformer_overrides` entry layered on top.
//! Unknown ids and failing transforms are logged and skipped; the object
//! handed forward is whatever the last successful transformer returned.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::isolation::{IsolatedStepRunner, StepReport};
use crate::config::ConveyorConfig;
use crate::error::CuratorError;
use crate::models::DigitalObject;
use crate::registry::{PluginKind, PluginRegistry, RegistryError, Transformer};

/// Where a resolution happens
///
/// The user-priority flag is only honoured while routing an object between
/// stages. Stages listed in `execution_stages` (e.g. render-time) resolve in
/// the execution context and ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChainContext {
    Routing,
    Execution,
}

/// Which rule produced a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChainSource {
    UserPriority,
    ObjectOverride,
    StageDefault,
    Empty,
}

/// Transformer ids resolved for one (object, stage) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformerChain {
    pub stage: String,
    pub source: ChainSource,
    pub transformer_ids: Vec<String>,
}

impl TransformerChain {
    pub fn len(&self) -> usize {
        self.transformer_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformer_ids.is_empty()
    }
}

/// Result of running a chain
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub object: DigitalObject,
    pub chain: TransformerChain,
    pub report: StepReport,
}

pub struct ConveyorBelt {
    config: ConveyorConfig,
    pool: HashMap<String, Arc<dyn Transformer>>,
}

impl ConveyorBelt {
    /// Build the belt and pre-warm one instance per `transformer_defaults` entry
    ///
    /// A transformer that cannot be resolved or initialized is left out of the
    /// pool; chains naming it later skip it.
    #[instrument(skip_all, fields(transformers = config.transformer_defaults.len()))]
    pub async fn warm(config: ConveyorConfig, registry: &PluginRegistry) -> Self {
        let mut pool: HashMap<String, Arc<dyn Transformer>> = HashMap::new();

        for (transformer_id, init_config) in &config.transformer_defaults {
            let transformer = match registry.transformer(transformer_id) {
                Ok(transformer) => transformer,
                Err(e) => {
                    error!(
                        transformer_id = %transformer_id,
                        error = %e,
                        "❌ CONVEYOR: Cannot resolve pooled transformer"
                    );
                    continue;
                }
            };

            if let Err(e) = transformer.init(init_config).await {
                error!(
                    transformer_id = %transformer_id,
                    error = %e,
                    "❌ CONVEYOR: Pooled transformer failed to initialize"
                );
                continue;
            }

            pool.insert(transformer_id.clone(), transformer);
        }

        info!(
            pooled = pool.len(),
            stages = config.stages.len(),
            "✅ CONVEYOR: Transformer pool warmed"
        );

        Self { config, pool }
    }

    pub fn config(&self) -> &ConveyorConfig {
        &self.config
    }

    pub fn is_stage(&self, stage: &str) -> bool {
        self.config.stages.contains_key(stage)
    }

    /// Configured stages plus any stage `object` carries its own override for
    pub fn handles_stage(&self, stage: &str, object: &DigitalObject) -> bool {
        self.is_stage(stage) || object.get_property(stage).is_some()
    }

    /// The context a chain for `stage` resolves in
    pub fn context_for(&self, stage: &str) -> ChainContext {
        if self.config.execution_stages.iter().any(|s| s == stage) {
            ChainContext::Execution
        } else {
            ChainContext::Routing
        }
    }

    pub fn stages(&self) -> Vec<&str> {
        self.config.stages.keys().map(String::as_str).collect()
    }

    /// Ids present in the warmed pool, sorted
    pub fn pooled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pool.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Resolve the chain for `object` at `stage`
    ///
    /// Consumes the user-priority flag on `object` when it decides the chain.
    pub fn resolve_chain(
        &self,
        object: &mut DigitalObject,
        stage: &str,
        context: ChainContext,
    ) -> TransformerChain {
        let chain = |source, transformer_ids| TransformerChain {
            stage: stage.to_string(),
            source,
            transformer_ids,
        };

        let flag = self.config.user_priority_flag.as_str();
        if context == ChainContext::Routing && object.has_flag(flag) {
            object.remove_property(flag);
            debug!(oid = %object.id, stage = %stage, "User-priority flag consumed");
            return chain(
                ChainSource::UserPriority,
                vec![self.config.user_priority_selector.clone()],
            );
        }

        if let Some(ids) = object.get_property(stage).map(split_override) {
            if !ids.is_empty() {
                return chain(ChainSource::ObjectOverride, ids);
            }
        }

        match self.config.stages.get(stage) {
            Some(ids) if !ids.is_empty() => chain(ChainSource::StageDefault, ids.clone()),
            _ => chain(ChainSource::Empty, Vec::new()),
        }
    }

    /// `base` with the transformer's override keys layered on top
    ///
    /// An object override merges key by key into an object base; any other
    /// override replaces `base`.
    pub fn item_config(&self, transformer_id: &str, base: &Value) -> Value {
        match (base, self.config.transformer_overrides.get(transformer_id)) {
            (_, None) => base.clone(),
            (Value::Object(base), Some(Value::Object(overrides))) => {
                let mut merged = base.clone();
                for (key, value) in overrides {
                    merged.insert(key.clone(), value.clone());
                }
                Value::Object(merged)
            }
            (_, Some(overrides)) => overrides.clone(),
        }
    }

    /// Resolve and run the chain for `object` at `stage`, in the context
    /// configured for that stage
    ///
    /// `base_config` is the per-invocation configuration every transformer in
    /// the chain receives, beneath its own override.
    #[instrument(skip(self, object, base_config), fields(oid = %object.id))]
    pub async fn run(
        &self,
        mut object: DigitalObject,
        stage: &str,
        base_config: &Value,
    ) -> ChainOutcome {
        let context = self.context_for(stage);
        let chain = self.resolve_chain(&mut object, stage, context);

        if chain.is_empty() {
            info!(
                oid = %object.id,
                stage = %stage,
                "No transformers configured for stage, object unchanged"
            );
            return ChainOutcome {
                object,
                chain,
                report: StepReport::default(),
            };
        }

        debug!(
            oid = %object.id,
            stage = %stage,
            source = ?chain.source,
            transformers = ?chain.transformer_ids,
            "Running transformer chain"
        );

        let mut runner = IsolatedStepRunner::new("conveyor");
        for transformer_id in &chain.transformer_ids {
            let input = object.clone();
            let step = async {
                let transformer = self.pool.get(transformer_id).ok_or_else(|| {
                    CuratorError::from(RegistryError::not_found(
                        PluginKind::Transformer,
                        transformer_id,
                    ))
                })?;
                let config = self.item_config(transformer_id, base_config);
                transformer
                    .transform(input, &config)
                    .await
                    .map_err(CuratorError::from)
            };

            if let Some(next) = runner.run(transformer_id.as_str(), step).await {
                object = next;
            }
        }

        ChainOutcome {
            object,
            chain,
            report: runner.finish(),
        }
    }

    /// Shut down every pooled transformer; returns how many shut down cleanly
    pub async fn shutdown(&self) -> usize {
        let mut clean = 0;
        for (transformer_id, transformer) in &self.pool {
            match transformer.shutdown().await {
                Ok(()) => clean += 1,
                Err(e) => warn!(
                    transformer_id = %transformer_id,
                    error = %e,
                    "Pooled transformer shutdown failed"
                ),
            }
        }
        clean
    }
}

impl fmt::Debug for ConveyorBelt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConveyorBelt")
            .field("stages", &self.config.stages)
            .field("pool", &self.pooled_ids())
            .finish()
    }
}

/// `"a, b,,c "` -> `["a", "b", "c"]`
fn split_override(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stage lists as a sorted map, for display
pub fn describe_stages(config: &ConveyorConfig) -> BTreeMap<String, String> {
    config
        .stages
        .iter()
        .map(|(stage, ids)| (stage.clone(), ids.join(", ")))
        .collect()
}
