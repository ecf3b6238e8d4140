use healwatch_core::types::ErrorPattern;

/// Known causes and remedies for a recognised error type.
#[derive(Debug, Clone, Copy)]
pub struct ErrorTemplate {
    pub error_type: &'static str,
    pub common_causes: &'static [&'static str],
    pub suggested_fixes: &'static [&'static str],
    pub fix_description: &'static str,
    pub has_automated_fix: bool,
}

impl ErrorTemplate {
    pub fn apply(&self, pattern: &mut ErrorPattern) {
        pattern.common_causes = self.common_causes.iter().map(|s| s.to_string()).collect();
        pattern.suggested_fixes = self.suggested_fixes.iter().map(|s| s.to_string()).collect();
        pattern.fix_description = Some(self.fix_description.to_string());
        pattern.has_automated_fix = self.has_automated_fix;
    }
}

static TEMPLATES: &[ErrorTemplate] = &[
    ErrorTemplate {
        error_type: "NullPointerException",
        common_causes: &["Missing null check", "Uninitialized object", "Optional not used"],
        suggested_fixes: &["Add null checks", "Use Optional", "Initialize objects properly"],
        fix_description: "Add null safety checks and Optional usage",
        has_automated_fix: true,
    },
    ErrorTemplate {
        error_type: "SQLException",
        common_causes: &["Connection timeout", "Database unavailable", "Query syntax error"],
        suggested_fixes: &["Add @Retryable", "Implement circuit breaker", "Add connection pooling"],
        fix_description: "Implement database resilience patterns",
        has_automated_fix: true,
    },
    ErrorTemplate {
        error_type: "RestClientException",
        common_causes: &["Service unavailable", "Timeout", "Connection refused"],
        suggested_fixes: &["Add circuit breaker", "Implement retry logic", "Add fallback"],
        fix_description: "Implement HTTP client resilience",
        has_automated_fix: true,
    },
    // Needs manual analysis.
    ErrorTemplate {
        error_type: "OutOfMemoryError",
        common_causes: &["Heap space", "Memory leak", "Large object allocation"],
        suggested_fixes: &["Optimize memory usage", "Add resource cleanup", "Implement pagination"],
        fix_description: "Optimize memory management",
        has_automated_fix: false,
    },
    ErrorTemplate {
        error_type: "BeanCreationException",
        common_causes: &["Missing bean", "Circular dependency", "Configuration error"],
        suggested_fixes: &["Add @Component", "Fix circular dependencies", "Review configuration"],
        fix_description: "Fix Spring configuration issues",
        has_automated_fix: true,
    },
];

pub fn template_for(error_type: &str) -> Option<&'static ErrorTemplate> {
    TEMPLATES.iter().find(|t| t.error_type == error_type)
}

pub fn all() -> &'static [ErrorTemplate] {
    TEMPLATES
}
