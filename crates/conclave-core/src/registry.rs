//! `SpecRegistry`: source of truth for [`AgentSpec`] definitions and
//! inheritance resolution into an [`EffectiveSpec`] (spec.md §4.1).
//!
//! Grounded in `aof-core/src/registry.rs`'s `Registry<T>` trait and
//! directory-loading `ResourceManager` for the general "concurrent
//! name -> resource map, versioned for cache invalidation" posture; the
//! inheritance-chain walk, cycle detection, and bottom-up merge are absent
//! from the teacher and built fresh against spec.md §3/§4.1/§8.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::agent::{AgentSpec, EffectiveSpec};
use crate::error::{ConclaveError, ConclaveResult};

/// Tunable knobs for a [`SpecRegistry`] instance.
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Inheritance depth cap (spec.md §9 Open Question, decided: default 8,
    /// configurable). Enforced during the chain walk, before cycle
    /// detection would otherwise need to spin unbounded.
    pub max_inheritance_depth: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_inheritance_depth: crate::DEFAULT_MAX_INHERITANCE_DEPTH,
        }
    }
}

/// Source of truth for [`AgentSpec`] definitions (spec.md §4.1).
///
/// Readable concurrently; writes are serialized by `DashMap`'s internal
/// sharding and bump a monotonically increasing `version` counter used to
/// invalidate the `EffectiveSpec` cache (spec.md §5: "writes are serialized
/// and bump a version counter used for cache invalidation").
pub struct SpecRegistry {
    specs: DashMap<String, AgentSpec>,
    cache: DashMap<String, (u64, Arc<EffectiveSpec>)>,
    version: AtomicU64,
    config: RegistryConfig,
}

impl Default for SpecRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl SpecRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            specs: DashMap::new(),
            cache: DashMap::new(),
            version: AtomicU64::new(0),
            config,
        }
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Bump the version and drop every cached `EffectiveSpec`. A full-cache
    /// clear is a conservative but correct implementation of "invalidates
    /// any cached EffectiveSpec whose chain contains this name" (spec.md
    /// §4.1): computing the precise dependent set would require tracking
    /// reverse edges for no observable benefit, since `resolve` recomputes
    /// lazily anyway.
    fn invalidate(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
        self.cache.clear();
    }

    /// **Register(spec)** (spec.md §4.1). Validates structural bounds
    /// (name, temperature, max_tokens are checked by `AgentSpec::validate`)
    /// and stores the spec. Fails with `duplicate_name` if the name exists
    /// and `replace` is false.
    pub fn register(&self, spec: AgentSpec, replace: bool) -> ConclaveResult<()> {
        spec.validate()?;
        if !replace && self.specs.contains_key(&spec.name) {
            return Err(ConclaveError::duplicate_name(format!(
                "agent spec {:?} already registered",
                spec.name
            )));
        }
        self.specs.insert(spec.name.clone(), spec);
        self.invalidate();
        Ok(())
    }

    /// **Unregister(name)** (spec.md §4.1). Fails with `in_use` unless
    /// `force` when another registered spec's `parent` chain still points
    /// at `name` (the registry has no notion of "live Agent" itself - that
    /// ownership lives in `conclave-runtime` - so this only protects
    /// against breaking another spec's inheritance chain).
    pub fn unregister(&self, name: &str, force: bool) -> ConclaveResult<()> {
        if !self.specs.contains_key(name) {
            return Err(ConclaveError::not_found(format!(
                "agent spec {:?} not found",
                name
            )));
        }
        if !force {
            let dependents: Vec<String> = self
                .specs
                .iter()
                .filter(|e| e.value().parent.as_deref() == Some(name))
                .map(|e| e.key().clone())
                .collect();
            if !dependents.is_empty() {
                return Err(ConclaveError::in_use(format!(
                    "agent spec {:?} is referenced as parent by {:?}",
                    name, dependents
                )));
            }
        }
        self.specs.remove(name);
        self.invalidate();
        Ok(())
    }

    /// **Resolve(name) -> EffectiveSpec** (spec.md §4.1). Returns a cached
    /// result if present and still current for the registry's version;
    /// otherwise walks the `parent` chain from `name` to its root with an
    /// explicit visited-set cycle check, then merges bottom-up (spec.md
    /// §3). Cached keyed by `(name, registry-version)`.
    pub fn resolve(&self, name: &str) -> ConclaveResult<Arc<EffectiveSpec>> {
        let version = self.version();
        if let Some(entry) = self.cache.get(name) {
            if entry.0 == version {
                return Ok(entry.1.clone());
            }
        }

        let chain = self.walk_chain(name)?;
        let effective = Arc::new(merge_chain(&chain));
        self.cache
            .insert(name.to_string(), (version, effective.clone()));
        Ok(effective)
    }

    /// Walk `name`'s `parent` chain, returning specs ordered root-first
    /// (ancestor to `name` itself), detecting cycles and enforcing the
    /// configured depth cap.
    fn walk_chain(&self, name: &str) -> ConclaveResult<Vec<AgentSpec>> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = name.to_string();

        loop {
            if !visited.insert(current.clone()) {
                return Err(ConclaveError::cycle(format!(
                    "inheritance cycle detected resolving {:?}: revisited {:?}",
                    name, current
                )));
            }
            if chain.len() >= self.config.max_inheritance_depth {
                return Err(ConclaveError::invalid_spec(format!(
                    "inheritance depth for {:?} exceeds configured max of {}",
                    name, self.config.max_inheritance_depth
                )));
            }

            let spec = self
                .specs
                .get(&current)
                .ok_or_else(|| {
                    ConclaveError::not_found(format!(
                        "agent spec {:?} not found while resolving {:?}",
                        current, name
                    ))
                })?
                .clone();

            let parent = spec.parent.clone();
            chain.push(spec);

            match parent {
                Some(p) => current = p,
                None => break,
            }
        }

        chain.reverse(); // root-first
        Ok(chain)
    }

    pub fn names(&self) -> Vec<String> {
        self.specs.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Bottom-up merge of a root-to-leaf inheritance chain into one
/// [`EffectiveSpec`] (spec.md §3):
/// - tool/skill lists: set-union preserving first-occurrence order.
/// - metadata/config maps: shallow merge, child keys override parent.
/// - scalar fields: child value if set, else parent; `temperature` falls
///   back to [`crate::agent::default_temperature`] if unset anywhere in
///   the chain.
fn merge_chain(chain: &[AgentSpec]) -> EffectiveSpec {
    let leaf = chain.last().expect("walk_chain always returns >= 1 spec");

    let mut provider = None;
    let mut model = String::new();
    let mut temperature = None;
    let mut max_tokens = None;
    let mut system_prompt = None;
    let mut tools = Vec::new();
    let mut seen_tools = HashSet::new();
    let mut skills = Vec::new();
    let mut seen_skills = HashSet::new();
    let mut metadata = std::collections::HashMap::new();
    let mut config = std::collections::HashMap::new();

    for spec in chain {
        if spec.provider.is_some() {
            provider = spec.provider.clone();
        }
        if !spec.model.is_empty() {
            model = spec.model.clone();
        }
        if let Some(t) = spec.temperature {
            temperature = Some(t);
        }
        if spec.max_tokens.is_some() {
            max_tokens = spec.max_tokens;
        }
        if spec.system_prompt.is_some() {
            system_prompt = spec.system_prompt.clone();
        }
        for tool in &spec.tools {
            if seen_tools.insert(tool.name().to_string()) {
                tools.push(tool.clone());
            }
        }
        for skill in &spec.skills {
            if seen_skills.insert(skill.clone()) {
                skills.push(skill.clone());
            }
        }
        for (k, v) in &spec.metadata {
            metadata.insert(k.clone(), v.clone());
        }
        for (k, v) in &spec.config {
            config.insert(k.clone(), v.clone());
        }
    }

    EffectiveSpec {
        name: leaf.name.clone(),
        provider,
        model,
        temperature: temperature.unwrap_or_else(crate::agent::default_temperature),
        max_tokens,
        system_prompt,
        tools,
        skills,
        metadata,
        config,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn spec(name: &str, parent: Option<&str>) -> AgentSpec {
        AgentSpec {
            name: name.to_string(),
            parent: parent.map(|p| p.to_string()),
            provider: None,
            model: "mock:echo".into(),
            temperature: None,
            max_tokens: None,
            system_prompt: None,
            tools: vec![],
            skills: vec![],
            metadata: HashMap::new(),
            config: HashMap::new(),
        }
    }

    #[test]
    fn register_then_resolve_roundtrips() {
        let reg = SpecRegistry::default();
        reg.register(spec("base", None), false).unwrap();
        let eff = reg.resolve("base").unwrap();
        assert_eq!(eff.name, "base");
        assert_eq!(eff.temperature, 0.7);
    }

    #[test]
    fn duplicate_register_without_replace_fails() {
        let reg = SpecRegistry::default();
        reg.register(spec("base", None), false).unwrap();
        let err = reg.register(spec("base", None), false).unwrap_err();
        assert_eq!(err.kind(), "duplicate_name");
    }

    #[test]
    fn resolve_missing_parent_is_not_found() {
        let reg = SpecRegistry::default();
        reg.register(spec("child", Some("ghost")), false).unwrap();
        let err = reg.resolve("child").unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn cycle_detection() {
        let reg = SpecRegistry::default();
        reg.register(spec("a", Some("b")), false).unwrap();
        reg.register(spec("b", Some("a")), false).unwrap();
        let err = reg.resolve("a").unwrap_err();
        assert_eq!(err.kind(), "cycle");
    }

    #[test]
    fn inheritance_merge_matches_spec_scenario() {
        // spec.md §8 scenario 2: base has tools [A, B], skills [X],
        // temperature 0.3; child(parent=base) adds tools [C], skills [Y].
        let mut base = spec("base", None);
        base.temperature = Some(0.3);
        base.tools = vec![
            crate::agent::ToolSpec::Simple("A".into()),
            crate::agent::ToolSpec::Simple("B".into()),
        ];
        base.skills = vec!["X".into()];

        let mut child = spec("child", Some("base"));
        child.tools = vec![crate::agent::ToolSpec::Simple("C".into())];
        child.skills = vec!["Y".into()];

        let reg = SpecRegistry::default();
        reg.register(base, false).unwrap();
        reg.register(child, false).unwrap();

        let eff = reg.resolve("child").unwrap();
        let tool_names: Vec<&str> = eff.tools.iter().map(|t| t.name()).collect();
        assert_eq!(tool_names, vec!["A", "B", "C"]);
        assert_eq!(eff.skills, vec!["X".to_string(), "Y".to_string()]);
        assert_eq!(eff.temperature, 0.3);
    }

    #[test]
    fn unregister_in_use_without_force_fails() {
        let reg = SpecRegistry::default();
        reg.register(spec("base", None), false).unwrap();
        reg.register(spec("child", Some("base")), false).unwrap();
        let err = reg.unregister("base", false).unwrap_err();
        assert_eq!(err.kind(), "in_use");
        reg.unregister("base", true).unwrap();
    }

    #[test]
    fn inheritance_depth_cap_enforced() {
        let config = RegistryConfig {
            max_inheritance_depth: 2,
        };
        let reg = SpecRegistry::new(config);
        reg.register(spec("root", None), false).unwrap();
        reg.register(spec("mid", Some("root")), false).unwrap();
        reg.register(spec("leaf", Some("mid")), false).unwrap();
        let err = reg.resolve("leaf").unwrap_err();
        assert_eq!(err.kind(), "invalid_spec");
    }

    #[test]
    fn cache_invalidated_on_reregister() {
        let reg = SpecRegistry::default();
        reg.register(spec("base", None), false).unwrap();
        let first = reg.resolve("base").unwrap();

        let mut updated = spec("base", None);
        updated.temperature = Some(1.2);
        reg.register(updated, true).unwrap();

        let second = reg.resolve("base").unwrap();
        assert_eq!(first.temperature, 0.7);
        assert_eq!(second.temperature, 1.2);
    }
}
