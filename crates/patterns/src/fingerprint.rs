//! Deterministic error fingerprints.
//!
//! A signature is the MD5 of `service|errorType|codeLocation|stackHead`, where
//! the stack head is the first three frames with line numbers and lambda
//! indices masked, so a recompiled service keeps its fingerprints.

use healwatch_core::types::MonitoringEvent;
use md5::{Digest, Md5};
use regex::{NoExpand, Regex};
use std::sync::OnceLock;

pub const UNKNOWN_ERROR_TYPE: &str = "UnknownError";
pub const UNKNOWN_LOCATION: &str = "unknown.method";
const STACK_HEAD_FRAMES: usize = 3;

fn exception_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([a-zA-Z.]+Exception|[a-zA-Z.]+Error)").expect("static regex"))
}

fn frame_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"at\s+([A-Za-z0-9_$.]+)\.([A-Za-z0-9_$<>]+)\(").expect("static regex")
    })
}

fn frame_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^():]*:(\d+)\)").expect("static regex"))
}

fn line_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":[0-9]+").expect("static regex"))
}

fn lambda_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$[0-9]+").expect("static regex"))
}

/// Everything derived from one event that identifies its error shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub signature: String,
    pub error_type: String,
    pub code_location: String,
    pub stack_head: String,
    pub class_name: Option<String>,
    pub method_name: Option<String>,
    pub line_number: Option<u32>,
}

impl Fingerprint {
    pub fn of(event: &MonitoringEvent) -> Self {
        let stack = event.stack_trace.as_deref();
        let error_type = error_type(event.error_signature.as_deref(), stack);
        let code_location = code_location(
            event.code_location.as_deref(),
            stack,
            &event.service_name,
        );
        let stack_head = normalize_stack_head(stack);
        let signature = signature(&event.service_name, &error_type, &code_location, &stack_head);
        let (class_name, method_name) = split_location(&code_location);

        Self {
            signature,
            error_type,
            line_number: stack.and_then(|s| first_line_number(s, class_name.as_deref())),
            code_location,
            stack_head,
            class_name,
            method_name,
        }
    }
}

/// `service|errorType|codeLocation|stackHead`, MD5, lowercase hex.
pub fn signature(service: &str, error_type: &str, code_location: &str, stack_head: &str) -> String {
    let input = format!("{service}|{error_type}|{code_location}|{stack_head}");
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// The explicit error signature, else the first exception name in the stack
/// trace reduced to its simple name.
pub fn error_type(error_signature: Option<&str>, stack_trace: Option<&str>) -> String {
    if let Some(sig) = error_signature.filter(|s| !s.trim().is_empty()) {
        return sig.to_string();
    }
    stack_trace
        .and_then(|stack| exception_regex().captures(stack))
        .and_then(|caps| caps.get(1))
        .map(|m| simple_name(m.as_str()).to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_ERROR_TYPE.to_string())
}

/// The explicit location, else the first frame inside the service's own
/// package, else the first frame.
pub fn code_location(explicit: Option<&str>, stack_trace: Option<&str>, service: &str) -> String {
    if let Some(location) = explicit.filter(|s| !s.trim().is_empty()) {
        return location.to_string();
    }
    let Some(stack) = stack_trace else {
        return UNKNOWN_LOCATION.to_string();
    };

    let service_lower = service.to_ascii_lowercase();
    let compact = service_lower.replace('-', "");
    let frames: Vec<(String, String)> = frame_regex()
        .captures_iter(stack)
        .filter_map(|caps| Some((caps.get(1)?.as_str().to_string(), caps.get(2)?.as_str().to_string())))
        .collect();

    let own_frame = frames.iter().find(|(class, _)| {
        let class = class.to_ascii_lowercase();
        (!service_lower.is_empty() && class.contains(&service_lower))
            || (!compact.is_empty() && class.contains(&compact))
    });

    own_frame
        .or_else(|| frames.first())
        .map(|(class, method)| format!("{class}.{method}"))
        .unwrap_or_else(|| UNKNOWN_LOCATION.to_string())
}

/// First three lines, trimmed, with `:<line>` and `$<n>` masked, each
/// followed by `|`.
pub fn normalize_stack_head(stack_trace: Option<&str>) -> String {
    let Some(stack) = stack_trace else {
        return String::new();
    };
    stack
        .lines()
        .take(STACK_HEAD_FRAMES)
        .map(|line| {
            let masked = line_number_regex().replace_all(line.trim(), NoExpand(":XXX"));
            let masked = lambda_regex().replace_all(&masked, NoExpand("$XXX"));
            format!("{masked}|")
        })
        .collect()
}

/// Class and method are the last two dot-separated segments.
pub fn split_location(location: &str) -> (Option<String>, Option<String>) {
    let mut parts = location.rsplit('.').filter(|p| !p.is_empty());
    match (parts.next(), parts.next()) {
        (Some(method), Some(class)) => (Some(class.to_string()), Some(method.to_string())),
        (Some(only), None) => (Some(only.to_string()), None),
        _ => (None, None),
    }
}

fn simple_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

fn first_line_number(stack: &str, class_name: Option<&str>) -> Option<u32> {
    let line = match class_name {
        Some(class) => stack
            .lines()
            .find(|l| l.contains(&format!(".{class}.")) || l.contains(&format!("({class}.java")))?,
        None => stack.lines().find(|l| l.trim_start().starts_with("at "))?,
    };
    frame_line_regex()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
