//! External-process validator and fixer.
//!
//! Both run a configured command line with placeholders substituted:
//! `{file}` is a scratch file holding the code, `{name}` the POU name and
//! `{diagnostics}` (fixer only) a JSON file with the diagnostics to address.

use super::{Diagnostic, Fixer, Section, ServiceError, ValidationResult, Validator};
use crate::artifact::ingest::extract_code_from_markdown;
use crate::util::{remove_scratch, run_command_with_timeout, scratch_path, tail_chars};
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::debug;

const EXIT_PASS: i32 = 0;
const EXIT_FAIL: i32 = 1;
const STDERR_TAIL_CHARS: usize = 400;

/// POU name declared by the first `FUNCTION`, `FUNCTION_BLOCK` or `PROGRAM`
/// header in `code`.
pub fn pou_name(code: &str) -> Option<String> {
    let mut words = code.split_whitespace();
    while let Some(word) = words.next() {
        let upper = word.to_ascii_uppercase();
        if matches!(upper.as_str(), "FUNCTION" | "FUNCTION_BLOCK" | "PROGRAM") {
            let name: String = words
                .next()?
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            return (!name.is_empty()).then_some(name);
        }
    }
    None
}

fn build_command(
    template: &[String],
    file: &Path,
    name: &str,
    diagnostics: Option<&Path>,
) -> Result<Command, ServiceError> {
    let (program, args) = template
        .split_first()
        .ok_or_else(|| ServiceError::Transport("empty command line".to_string()))?;
    let file = file.display().to_string();
    let diagnostics = diagnostics.map(|p| p.display().to_string()).unwrap_or_default();
    let substitute = |arg: &str| {
        arg.replace("{file}", &file)
            .replace("{name}", name)
            .replace("{diagnostics}", &diagnostics)
    };
    let mut command = Command::new(substitute(program));
    command.args(args.iter().map(|a| substitute(a)));
    Ok(command)
}

/// Parse checker output into diagnostics.
///
/// Accepts JSON objects (`message`/`error_desc`, `line`/`line_no`,
/// `section`/`is_def`), `<source>:<line>: <message>` lines, and bare text.
pub fn parse_diagnostics(output: &str) -> Vec<Diagnostic> {
    let located = Regex::new(r"^\s*(?:[^:\s]+):(?P<line>\d+)(?::\d+)?:\s*(?P<message>.+)$").ok();
    let mut diagnostics = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('{') {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(line) {
                if let Some(diagnostic) = diagnostic_from_json(&map) {
                    diagnostics.push(diagnostic);
                }
                continue;
            }
        }
        if let Some(caps) = located.as_ref().and_then(|re| re.captures(line)) {
            let location = caps.name("line").and_then(|m| m.as_str().parse::<u32>().ok());
            let message = caps.name("message").map(|m| m.as_str()).unwrap_or(line);
            diagnostics.push(Diagnostic {
                message: message.trim().to_string(),
                location,
                section: Section::Unknown,
            });
            continue;
        }
        diagnostics.push(Diagnostic::new(line));
    }
    diagnostics
}

fn diagnostic_from_json(map: &serde_json::Map<String, Value>) -> Option<Diagnostic> {
    let message = map
        .get("message")
        .or_else(|| map.get("error_desc"))
        .and_then(Value::as_str)?
        .trim()
        .to_string();
    let location = map
        .get("line")
        .or_else(|| map.get("line_no"))
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok());
    let section = match (map.get("section").and_then(Value::as_str), map.get("is_def")) {
        (Some(s), _) if s.eq_ignore_ascii_case("declaration") => Section::Declaration,
        (Some(s), _) if s.eq_ignore_ascii_case("implementation") => Section::Implementation,
        (_, Some(Value::Bool(true))) => Section::Declaration,
        (_, Some(Value::Bool(false))) => Section::Implementation,
        _ => Section::Unknown,
    };
    Some(Diagnostic {
        message,
        location,
        section,
    })
}

/// Runs an external checker. Exit 0 passes, exit 1 fails with diagnostics,
/// anything else is a transport failure.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandValidator {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

impl Validator for CommandValidator {
    fn validate(&self, code: &str) -> Result<ValidationResult, ServiceError> {
        let file = scratch_path("streval-validate", "st");
        std::fs::write(&file, code)
            .map_err(|e| ServiceError::Transport(format!("write scratch file: {}", e)))?;
        let name = pou_name(code).unwrap_or_else(|| "Unnamed".to_string());

        let result = build_command(&self.command, &file, &name, None)
            .and_then(|mut command| {
                run_command_with_timeout(&mut command, self.timeout).map_err(ServiceError::Transport)
            });
        remove_scratch(&file);
        let result = result?;

        if result.timed_out {
            return Err(ServiceError::Timeout(self.timeout));
        }
        debug!(
            exit_code = ?result.exit_code(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "validator finished"
        );
        match result.exit_code() {
            Some(EXIT_PASS) => Ok(ValidationResult::passed()),
            Some(EXIT_FAIL) => {
                let mut diagnostics =
                    parse_diagnostics(&format!("{}\n{}", result.stdout, result.stderr));
                if diagnostics.is_empty() {
                    diagnostics.push(Diagnostic::new("validator reported failure without diagnostics"));
                }
                Ok(ValidationResult::failed(diagnostics))
            }
            other => Err(ServiceError::Transport(format!(
                "validator exited with {:?}: {}",
                other,
                tail_chars(result.stderr.trim(), STDERR_TAIL_CHARS)
            ))),
        }
    }
}

/// Runs an external fixer; its stdout (optionally fenced) is the candidate.
#[derive(Debug, Clone)]
pub struct CommandFixer {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandFixer {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

impl Fixer for CommandFixer {
    fn fix(&self, code: &str, diagnostics: &[Diagnostic]) -> Result<String, ServiceError> {
        let file = scratch_path("streval-fix", "st");
        let diagnostics_file = scratch_path("streval-fix", "json");
        let prepared = std::fs::write(&file, code)
            .and_then(|_| {
                let encoded = serde_json::to_string_pretty(diagnostics)
                    .map_err(std::io::Error::other)?;
                std::fs::write(&diagnostics_file, encoded)
            })
            .map_err(|e| ServiceError::Transport(format!("write scratch file: {}", e)));
        let name = pou_name(code).unwrap_or_else(|| "Unnamed".to_string());

        let result = prepared
            .and_then(|_| build_command(&self.command, &file, &name, Some(&diagnostics_file)))
            .and_then(|mut command| {
                run_command_with_timeout(&mut command, self.timeout).map_err(ServiceError::Transport)
            });
        remove_scratch(&file);
        remove_scratch(&diagnostics_file);
        let result = result?;

        if result.timed_out {
            return Err(ServiceError::Timeout(self.timeout));
        }
        match result.exit_code() {
            Some(EXIT_PASS) => Ok(extract_code_from_markdown(&result.stdout)),
            other => Err(ServiceError::Transport(format!(
                "fixer exited with {:?}: {}",
                other,
                tail_chars(result.stderr.trim(), STDERR_TAIL_CHARS)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pou_name_reads_first_header() {
        assert_eq!(
            pou_name("// header\nFUNCTION_BLOCK Valve_Ctrl\nVAR END_VAR"),
            Some("Valve_Ctrl".to_string())
        );
        assert_eq!(pou_name("function Add : INT"), Some("Add".to_string()));
        assert_eq!(pou_name("x := 1;"), None);
    }

    #[test]
    fn parses_json_located_and_bare_diagnostics() {
        let output = concat!(
            "{\"error_desc\": \"type mismatch\", \"line_no\": 4, \"is_def\": true}\n",
            "{\"message\": \"unknown y\", \"line\": 9, \"section\": \"implementation\"}\n",
            "Fun.st:12: missing END_IF\n",
            "\n",
            "compilation failed\n"
        );
        let diagnostics = parse_diagnostics(output);
        assert_eq!(diagnostics.len(), 4);
        assert_eq!(diagnostics[0].message, "type mismatch");
        assert_eq!(diagnostics[0].location, Some(4));
        assert_eq!(diagnostics[0].section, Section::Declaration);
        assert_eq!(diagnostics[1].section, Section::Implementation);
        assert_eq!(diagnostics[2].message, "missing END_IF");
        assert_eq!(diagnostics[2].location, Some(12));
        assert_eq!(diagnostics[3], Diagnostic::new("compilation failed"));
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[cfg(unix)]
    #[test]
    fn validator_maps_exit_codes() {
        let timeout = Duration::from_secs(10);
        let validator = CommandValidator::new(
            sh("grep -q END_IF {file} && exit 0; echo '{name}.st:3: missing END_IF'; exit 1"),
            timeout,
        );
        assert!(validator.validate("FUNCTION F : INT\nEND_IF").unwrap().pass);

        let failed = validator.validate("FUNCTION F : INT\nIF a THEN").unwrap();
        assert!(!failed.pass);
        assert_eq!(failed.diagnostics[0].location, Some(3));
        assert_eq!(failed.diagnostics[0].message, "missing END_IF");

        let broken = CommandValidator::new(sh("echo boom 1>&2; exit 7"), timeout);
        assert!(matches!(
            broken.validate("x"),
            Err(ServiceError::Transport(msg)) if msg.contains("boom")
        ));

        let missing = CommandValidator::new(vec!["/nonexistent/streval-checker".to_string()], timeout);
        assert!(matches!(missing.validate("x"), Err(ServiceError::Transport(_))));
    }

    #[cfg(unix)]
    #[test]
    fn slow_validator_times_out() {
        let validator = CommandValidator::new(sh("sleep 5"), Duration::from_millis(100));
        assert!(matches!(validator.validate("x"), Err(ServiceError::Timeout(_))));
    }

    #[cfg(unix)]
    #[test]
    fn fixer_reads_code_and_diagnostics_files() {
        let fixer = CommandFixer::new(
            sh("printf '```st\\n'; cat {file}; grep -q 'missing END_IF' {diagnostics} && printf '\\nEND_IF;\\n'; printf '```\\n'"),
            Duration::from_secs(10),
        );
        let fixed = fixer
            .fix("IF a THEN\n\tb := 1;", &[Diagnostic::new("missing END_IF")])
            .unwrap();
        assert_eq!(fixed, "IF a THEN\n\tb := 1;\nEND_IF;");

        let failing = CommandFixer::new(sh("exit 2"), Duration::from_secs(10));
        assert!(matches!(
            failing.fix("x", &[]),
            Err(ServiceError::Transport(_))
        ));
    }
}
