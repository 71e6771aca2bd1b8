//! Environment
//!
//! The scoped variable store. An environment owns a vector of lexical
//! scopes (root first, current last), capability handles, the evaluator
//! configuration, the document output buffer, and the collected-error
//! buffer. The import and resolution stacks are shared across every
//! environment derived from the same root so cycles are detected across
//! module boundaries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use crate::ast::{GuardTarget, GuardTiming, WhenExprNode};
use crate::error::{ErrorContext, MlldError, Result};
use crate::security::ImportApproval;
use crate::services::{
    normalize, ContentType, DeniedFetch, FetchOps, FilesystemOps, HookOps, MemoryFs, NoopHooks,
    PathService, ResolvedPath, ResolverManager, StreamingManager,
};
use crate::value::{SecurityDescriptor, Taint, Variable, VariableValue};

use super::config::EvalConfig;
use super::input::create_input_value;
use super::reserved::{alias_of, debug_value, frontmatter_variables, is_reserved, seed_variables};

/// One chunk of evaluator output.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Document content, concatenated in source order
    Doc(String),
    /// Command stdout surfaced outside the document (streaming disabled)
    Stdout(String),
    Stderr(String),
}

/// A single lexical scope.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub variables: IndexMap<String, Variable>,
}

/// Import/resolution stacks shared across an environment tree.
#[derive(Clone, Default)]
pub struct SharedStacks {
    imports: Arc<Mutex<Vec<String>>>,
    resolving: Arc<Mutex<Vec<String>>>,
}

/// Capability handles granted by the host.
#[derive(Clone)]
pub struct Capabilities {
    pub fs: Arc<dyn FilesystemOps>,
    pub fetch: Arc<dyn FetchOps>,
    pub resolvers: ResolverManager,
    pub hooks: Arc<dyn HookOps>,
    pub streaming: StreamingManager,
    pub approval: ImportApproval,
    pub paths: PathService,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            fs: Arc::new(MemoryFs::new()),
            fetch: Arc::new(DeniedFetch),
            resolvers: ResolverManager::new(),
            hooks: Arc::new(NoopHooks),
            streaming: StreamingManager::new(),
            approval: ImportApproval::default(),
            paths: PathService,
        }
    }
}

/// A guard declared by a `/guard` directive.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardDef {
    pub name: String,
    pub timing: GuardTiming,
    pub target: GuardTarget,
    pub body: WhenExprNode,
}

/// The evaluator's scoped state.
#[derive(Clone)]
pub struct Environment {
    scopes: Vec<Scope>,
    pub caps: Capabilities,
    pub config: EvalConfig,
    shared: SharedStacks,
    pub output: Vec<Effect>,
    /// Recoverable errors buffered for end-of-document reporting
    pub errors: Vec<MlldError>,
    pub current_file: Option<String>,
    pub base_path: String,
    guards: Vec<GuardDef>,
    pub stdin_content: Option<String>,
}

impl Environment {
    pub fn new(caps: Capabilities, config: EvalConfig, base_path: impl Into<String>) -> Self {
        let base_path = base_path.into();
        let mut root = Scope::default();
        for var in seed_variables(&config, &base_path) {
            root.variables.insert(var.name.clone(), var);
        }
        Self {
            scopes: vec![root],
            caps,
            config,
            shared: SharedStacks::default(),
            output: Vec::new(),
            errors: Vec::new(),
            current_file: None,
            base_path,
            guards: Vec::new(),
            stdin_content: None,
        }
    }

    // -------------------------------------------------------------------
    // Variables
    // -------------------------------------------------------------------

    /// Insert a binding into the current scope, enforcing reservation,
    /// same-scope redefinition, and ancestor-shadowing rules.
    pub fn set_variable(&mut self, variable: Variable) -> Result<()> {
        let name = variable.name.clone();

        if is_reserved(&name) && !variable.flags.is_system {
            return Err(MlldError::ReservedName {
                name,
                ctx: ErrorContext::default(),
            });
        }

        let current = self.scopes.len() - 1;
        if let Some(existing) = self.scopes[current].variables.get(&name) {
            if existing.flags.is_system && variable.flags.is_system {
                // Runtime re-seeding (INPUT, TIME) replaces silently
                self.scopes[current].variables.insert(name, variable);
                return Ok(());
            }
            if existing.flags.is_imported || variable.flags.is_imported {
                return Err(MlldError::ImportConflict {
                    name,
                    existing_source: existing
                        .flags
                        .import_source
                        .clone()
                        .unwrap_or_else(|| "this file".to_string()),
                    ctx: ErrorContext::default(),
                });
            }
            return Err(MlldError::Redefinition {
                name,
                ctx: ErrorContext::default(),
            });
        }

        for scope in self.scopes[..current].iter().rev() {
            if let Some(existing) = scope.variables.get(&name) {
                if existing.flags.is_system {
                    break;
                }
                return Err(MlldError::ImportConflict {
                    name,
                    existing_source: existing
                        .flags
                        .import_source
                        .clone()
                        .unwrap_or_else(|| "an enclosing scope".to_string()),
                    ctx: ErrorContext::default(),
                });
            }
        }

        self.scopes[current].variables.insert(name, variable);
        Ok(())
    }

    /// Parameter bindings check the current scope only; ancestors are
    /// shadowed silently.
    pub fn set_parameter_variable(&mut self, mut variable: Variable) -> Result<()> {
        variable.flags.is_parameter = true;
        let name = variable.name.clone();
        let current = self.scopes.len() - 1;
        if self.scopes[current].variables.contains_key(&name) {
            return Err(MlldError::Redefinition {
                name,
                ctx: ErrorContext::default(),
            });
        }
        self.scopes[current].variables.insert(name, variable);
        Ok(())
    }

    /// Look up a name through the scope chain, materializing lazy reserved
    /// variables and applying lowercase aliases at the root.
    pub fn get_variable(&mut self, name: &str) -> Option<Variable> {
        if let Some(found) = self.lookup(name) {
            let lazy = found.flags.is_lazy;
            let result = found.clone();
            if lazy {
                return Some(self.materialize_lazy(result));
            }
            return Some(result);
        }
        // Lowercase aliases resolve at the root only
        if let Some(alias) = alias_of(name) {
            if let Some(found) = self.scopes[0].variables.get(alias) {
                let lazy = found.flags.is_lazy;
                let result = found.clone();
                if lazy {
                    return Some(self.materialize_lazy(result));
                }
                return Some(result);
            }
        }
        None
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    fn lookup(&self, name: &str) -> Option<&Variable> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.variables.get(name))
    }

    fn materialize_lazy(&mut self, mut variable: Variable) -> Variable {
        if variable.name == "DEBUG" {
            let names: Vec<String> = self
                .scopes
                .iter()
                .flat_map(|s| s.variables.keys().cloned())
                .collect();
            variable.value = VariableValue::Object(debug_value(names, &self.config));
            variable.flags.is_lazy = false;
            let root = &mut self.scopes[0];
            root.variables.insert("DEBUG".to_string(), variable.clone());
        }
        variable
    }

    /// Simple-text variables visible from the current scope, innermost
    /// winning, for injection into parameterless shell code.
    pub fn text_variables(&self) -> indexmap::IndexMap<String, serde_json::Value> {
        let mut out = indexmap::IndexMap::new();
        for scope in &self.scopes {
            for (name, var) in &scope.variables {
                if let VariableValue::SimpleText(s) | VariableValue::InterpolatedText(s) = &var.value
                {
                    if !var.flags.is_system {
                        out.insert(name.clone(), serde_json::Value::String(s.clone()));
                    }
                }
            }
        }
        out
    }

    /// Executable definitions visible from the current scope, innermost
    /// winning, used for shadow-environment capture.
    pub fn visible_executables(&self) -> Vec<(String, crate::value::ExecutableDefinition)> {
        let mut out: indexmap::IndexMap<String, crate::value::ExecutableDefinition> =
            indexmap::IndexMap::new();
        for scope in &self.scopes {
            for (name, var) in &scope.variables {
                if let VariableValue::Executable(def) = &var.value {
                    out.insert(name.clone(), (**def).clone());
                }
            }
        }
        out.into_iter().collect()
    }

    /// User-defined bindings of the current scope, in insertion order.
    pub fn user_variables(&self) -> Vec<&Variable> {
        self.scopes
            .last()
            .map(|scope| {
                scope
                    .variables
                    .values()
                    .filter(|v| !v.flags.is_system)
                    .collect()
            })
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------
    // Scopes
    // -------------------------------------------------------------------

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) -> Option<Scope> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    /// Copy a child scope's bindings into the current scope without
    /// redefinition checks (nested data scopes).
    pub fn merge_child(&mut self, child: Scope) {
        let current = self.scopes.len() - 1;
        for (name, var) in child.variables {
            self.scopes[current].variables.insert(name, var);
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// A fresh environment for evaluating an imported module: own scopes,
    /// shared cycle stacks and capabilities.
    pub fn module_env(&self, file_path: impl Into<String>) -> Environment {
        let mut env = Environment::new(self.caps.clone(), self.config.clone(), self.base_path.clone());
        env.shared = self.shared.clone();
        env.current_file = Some(file_path.into());
        env
    }

    /// Seed `fm`/`frontmatter` for the current document.
    pub fn set_frontmatter(&mut self, frontmatter: &str) {
        for var in frontmatter_variables(frontmatter) {
            self.scopes[0].variables.insert(var.name.clone(), var);
        }
    }

    /// Build and seed `INPUT` from stdin content and host env vars.
    pub fn set_input(&mut self, stdin: Option<String>, env_vars: &HashMap<String, String>) {
        let value = create_input_value(stdin.as_deref(), env_vars);
        self.stdin_content = stdin;
        let mut input = Variable::system("INPUT", VariableValue::from_json(value));
        input.flags.is_system = true;
        input.flags.is_reserved = true;
        if self.stdin_content.is_some() {
            input.security = SecurityDescriptor {
                taint: Taint::Unknown,
                ..Default::default()
            }
            .with_source("stdin");
        }
        self.scopes[0].variables.insert("INPUT".to_string(), input);
    }

    // -------------------------------------------------------------------
    // Cycle stacks
    // -------------------------------------------------------------------

    /// Push an import path, failing on re-entry. Paths are normalized so
    /// `a\b` and `a/b` collide.
    pub fn begin_import(&self, path: &str) -> Result<()> {
        let normalized = normalize(path);
        let mut stack = self.shared.imports.lock().unwrap();
        if stack.contains(&normalized) {
            let mut chain: Vec<&str> = stack.iter().map(String::as_str).collect();
            chain.push(&normalized);
            return Err(MlldError::CircularImport {
                chain: chain.join(" → "),
                ctx: ErrorContext::default(),
            });
        }
        stack.push(normalized);
        Ok(())
    }

    /// Pop an import path. Must run on error paths too.
    pub fn end_import(&self, path: &str) {
        let normalized = normalize(path);
        let mut stack = self.shared.imports.lock().unwrap();
        if let Some(idx) = stack.iter().rposition(|p| *p == normalized) {
            stack.remove(idx);
        }
    }

    /// Push an executable name being resolved. Reserved names are never
    /// tracked; builtin methods bypass resolution entirely.
    pub fn begin_resolving(&self, name: &str) -> Result<()> {
        if is_reserved(name) {
            return Ok(());
        }
        let mut stack = self.shared.resolving.lock().unwrap();
        if stack.iter().any(|n| n == name) {
            return Err(MlldError::CircularExecutable {
                name: name.to_string(),
                ctx: ErrorContext::default(),
            });
        }
        stack.push(name.to_string());
        Ok(())
    }

    pub fn end_resolving(&self, name: &str) {
        if is_reserved(name) {
            return;
        }
        let mut stack = self.shared.resolving.lock().unwrap();
        if let Some(idx) = stack.iter().rposition(|n| n == name) {
            stack.remove(idx);
        }
    }

    // -------------------------------------------------------------------
    // Guards
    // -------------------------------------------------------------------

    pub fn register_guard(&mut self, guard: GuardDef) {
        self.guards.push(guard);
    }

    /// Guards applying to an executable name or any of the given labels.
    pub fn guards_for(
        &self,
        timing: GuardTiming,
        executable: &str,
        labels: &[String],
    ) -> Vec<GuardDef> {
        self.guards
            .iter()
            .filter(|g| g.timing == timing)
            .filter(|g| match &g.target {
                GuardTarget::Executable(name) => name == executable,
                GuardTarget::Label(label) => labels.iter().any(|l| l == label),
            })
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------
    // I/O
    // -------------------------------------------------------------------

    /// Resolve a path expression relative to the current file's directory.
    pub fn resolve_path(&self, input: &str) -> Result<ResolvedPath> {
        let base_dir = self
            .current_file
            .as_deref()
            .map(crate::services::dirname)
            .unwrap_or_else(|| self.base_path.clone());
        self.caps.paths.resolve_path(input, &base_dir)
    }

    /// Read a file path or fetch a URL, applying URL policy, approval, and
    /// the immutable cache on the URL path.
    pub async fn read_path(&self, resolved: &ResolvedPath) -> Result<String> {
        match resolved.content_type {
            ContentType::File => self.caps.fs.read_file(&resolved.validated).await,
            ContentType::Url => {
                let url = self.config.url_policy.check(&resolved.validated)?;
                let fetched = self.caps.fetch.fetch_url(&url, false).await?;
                self.config
                    .url_policy
                    .check_response_size(&url, fetched.content.len())?;
                self.caps.approval.verify(&url, &fetched.content)?;
                Ok(fetched.content)
            }
        }
    }

    // -------------------------------------------------------------------
    // Output
    // -------------------------------------------------------------------

    pub fn append_doc(&mut self, text: impl Into<String>) {
        self.output.push(Effect::Doc(text.into()));
    }

    pub fn append_effect(&mut self, effect: Effect) {
        self.output.push(effect);
    }

    /// The final document: doc effects concatenated in order.
    pub fn render_output(&self) -> String {
        let mut out = String::new();
        for effect in &self.output {
            if let Effect::Doc(text) = effect {
                out.push_str(text);
            }
        }
        out
    }

    pub fn collect_error(&mut self, error: MlldError) {
        self.errors.push(error);
    }
}
