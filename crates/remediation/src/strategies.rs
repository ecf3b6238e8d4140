//! Patch strategies keyed by error type.

use healwatch_core::error::MonitorResult;
use std::collections::HashMap;
use std::sync::Arc;

use crate::java::{Edit, JavaSource, MethodDecl};

const SPRING_COMPONENT_ANNOTATIONS: &[&str] = &[
    "Service",
    "Component",
    "Repository",
    "Controller",
    "RestController",
    "Configuration",
];

/// Where in the source a strategy should act.
#[derive(Debug, Clone)]
pub struct PatchTarget<'a> {
    pub service_name: &'a str,
    pub class_name: &'a str,
    pub method_name: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub enum PatchOutcome {
    Patched { source: String, changes: Vec<String> },
    NoChange(String),
}

pub trait PatchStrategy: Send + Sync {
    /// Stable name recorded as the fix type.
    fn fix_type(&self) -> &'static str;

    fn apply(&self, source: &JavaSource, target: &PatchTarget<'_>) -> MonitorResult<PatchOutcome>;
}

fn target_method(source: &JavaSource, target: &PatchTarget<'_>) -> Result<MethodDecl, PatchOutcome> {
    let Some(name) = target.method_name else {
        return Err(PatchOutcome::NoChange("pattern has no method name".into()));
    };
    source
        .find_method(name)
        .ok_or_else(|| PatchOutcome::NoChange(format!("method {name} not found in {}", target.class_name)))
}

fn finish(source: &JavaSource, edits: Vec<Edit>, changes: Vec<String>) -> MonitorResult<PatchOutcome> {
    let patched = source.patched(edits)?;
    Ok(PatchOutcome::Patched {
        source: patched.text().to_string(),
        changes,
    })
}

/// Guards reference parameters at method entry.
pub struct NullGuardStrategy;

impl PatchStrategy for NullGuardStrategy {
    fn fix_type(&self) -> &'static str {
        "null_check"
    }

    fn apply(&self, source: &JavaSource, target: &PatchTarget<'_>) -> MonitorResult<PatchOutcome> {
        let method = match target_method(source, target) {
            Ok(m) => m,
            Err(outcome) => return Ok(outcome),
        };
        let Some(body_open) = method.body_open else {
            return Ok(PatchOutcome::NoChange(format!("method {} has no body", method.name)));
        };

        let indent = method.body_indent();
        let mut guards = String::new();
        let mut changes = Vec::new();
        for param in method.parameters.iter().filter(|p| !p.is_primitive) {
            let compact: String = method.body_text.split_whitespace().collect();
            if compact.contains(&format!("{}==null", param.name))
                || compact.contains(&format!("null=={}", param.name))
            {
                continue;
            }
            guards.push_str(&format!(
                "\n{indent}if ({name} == null) {{\n{indent}    throw new IllegalArgumentException(\"{name} cannot be null\");\n{indent}}}",
                name = param.name,
            ));
            changes.push(format!("Added null guard for parameter {} in {}", param.name, method.name));
        }

        if changes.is_empty() {
            return Ok(PatchOutcome::NoChange(format!(
                "no unguarded reference parameters in {}",
                method.name
            )));
        }
        finish(source, vec![Edit::insert(body_open, guards)], changes)
    }
}

/// Bounded retry with backoff for transient database failures.
pub struct RetryBackoffStrategy;

impl PatchStrategy for RetryBackoffStrategy {
    fn fix_type(&self) -> &'static str {
        "retry_backoff"
    }

    fn apply(&self, source: &JavaSource, target: &PatchTarget<'_>) -> MonitorResult<PatchOutcome> {
        let method = match target_method(source, target) {
            Ok(m) => m,
            Err(outcome) => return Ok(outcome),
        };
        if method.has_annotation("Retryable") {
            return Ok(PatchOutcome::NoChange(format!("{} is already retryable", method.name)));
        }

        let mut edits = vec![Edit::insert(
            method.start_byte,
            format!(
                "@Retryable(value = {{SQLException.class}}, maxAttempts = 3, backoff = @Backoff(delay = 1000))\n{}",
                method.indent
            ),
        )];
        edits.extend(source.import_edit(&[
            "org.springframework.retry.annotation.Retryable",
            "org.springframework.retry.annotation.Backoff",
            "java.sql.SQLException",
        ]));
        finish(
            source,
            edits,
            vec![format!("Added @Retryable with backoff to {}", method.name)],
        )
    }
}

/// Circuit breaker named after the service, with a generated fallback.
pub struct CircuitBreakerStrategy;

impl CircuitBreakerStrategy {
    fn fallback_stub(method: &MethodDecl) -> String {
        let mut params: Vec<String> = method.parameters.iter().map(|p| p.text.clone()).collect();
        params.push("Throwable t".to_string());
        let body_indent = method.body_indent();
        let body = match method.return_type.as_str() {
            "void" => String::new(),
            "boolean" => format!("\n{body_indent}return false;"),
            "char" => format!("\n{body_indent}return '\\0';"),
            "byte" | "short" | "int" | "long" => format!("\n{body_indent}return 0;"),
            "float" | "double" => format!("\n{body_indent}return 0.0;"),
            _ => format!("\n{body_indent}return null;"),
        };
        let type_params = method
            .type_parameters
            .as_ref()
            .map(|t| format!("{t} "))
            .unwrap_or_default();
        let is_static = method.modifiers.iter().any(|m| m == "static");
        format!(
            "\n\n{indent}private {static_kw}{type_params}{ret} {name}Fallback({params}) {{{body}\n{indent}}}",
            indent = method.indent,
            static_kw = if is_static { "static " } else { "" },
            ret = method.return_type,
            name = method.name,
            params = params.join(", "),
        )
    }
}

impl PatchStrategy for CircuitBreakerStrategy {
    fn fix_type(&self) -> &'static str {
        "circuit_breaker"
    }

    fn apply(&self, source: &JavaSource, target: &PatchTarget<'_>) -> MonitorResult<PatchOutcome> {
        let method = match target_method(source, target) {
            Ok(m) => m,
            Err(outcome) => return Ok(outcome),
        };
        if method.has_annotation("CircuitBreaker") {
            return Ok(PatchOutcome::NoChange(format!(
                "{} already has a circuit breaker",
                method.name
            )));
        }

        let fallback_name = format!("{}Fallback", method.name);
        let mut edits = vec![Edit::insert(
            method.start_byte,
            format!(
                "@CircuitBreaker(name = \"{}\", fallbackMethod = \"{}\")\n{}",
                target.service_name, fallback_name, method.indent
            ),
        )];
        let mut changes = vec![format!("Added @CircuitBreaker to {}", method.name)];
        if !source.has_method(&fallback_name) {
            edits.push(Edit::insert(method.end_byte, Self::fallback_stub(&method)));
            changes.push(format!("Generated fallback method {fallback_name}"));
        }
        edits.extend(source.import_edit(&[
            "io.github.resilience4j.circuitbreaker.annotation.CircuitBreaker",
        ]));
        finish(source, edits, changes)
    }
}

/// Registers a class as a Spring component when it carries no stereotype.
pub struct ComponentRegistrationStrategy;

impl PatchStrategy for ComponentRegistrationStrategy {
    fn fix_type(&self) -> &'static str {
        "component_registration"
    }

    fn apply(&self, source: &JavaSource, target: &PatchTarget<'_>) -> MonitorResult<PatchOutcome> {
        let Some(class) = source.find_class(target.class_name) else {
            return Ok(PatchOutcome::NoChange(format!("class {} not found", target.class_name)));
        };
        if class
            .annotations
            .iter()
            .any(|a| SPRING_COMPONENT_ANNOTATIONS.contains(&a.as_str()))
        {
            return Ok(PatchOutcome::NoChange(format!(
                "{} is already a registered component",
                class.name
            )));
        }

        let mut edits = vec![Edit::insert(class.start_byte, format!("@Service\n{}", class.indent))];
        edits.extend(source.import_edit(&["org.springframework.stereotype.Service"]));
        finish(source, edits, vec![format!("Added @Service to {}", class.name)])
    }
}

/// Error type to patch strategy.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn PatchStrategy>>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("NullPointerException", Arc::new(NullGuardStrategy));
        registry.register("SQLException", Arc::new(RetryBackoffStrategy));
        registry.register("RestClientException", Arc::new(CircuitBreakerStrategy));
        registry.register("BeanCreationException", Arc::new(ComponentRegistrationStrategy));
        registry
    }

    pub fn register(&mut self, error_type: impl Into<String>, strategy: Arc<dyn PatchStrategy>) {
        self.strategies.insert(error_type.into(), strategy);
    }

    pub fn get(&self, error_type: &str) -> Option<Arc<dyn PatchStrategy>> {
        self.strategies.get(error_type).cloned()
    }

    pub fn error_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.strategies.keys().cloned().collect();
        types.sort();
        types
    }
}
