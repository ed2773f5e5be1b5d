//! Pure code-wrapping pipeline: dedent -> reindent -> prelude -> scheduler
//! call. Kept free of any process-spawning so it can be unit tested without
//! a real interpreter.

use crate::error::CoreError;

const BODY_INDENT: usize = 8;

/// Options that influence how a program is wrapped before execution.
#[derive(Debug, Clone, Default)]
pub struct WrapOptions {
    /// Extra directories appended to the interpreter's module search path.
    pub extra_module_paths: Vec<String>,
}

/// Strips the common leading whitespace from every non-empty line, then
/// reindents every line uniformly by [`BODY_INDENT`] spaces so the snippet
/// sits inside the generated async entry point. Empty lines pass through
/// untouched.
fn dedent_and_reindent(source: &str) -> String {
    let lines: Vec<&str> = source.lines().collect();

    let min_indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let pad = " ".repeat(BODY_INDENT);
    lines
        .iter()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{pad}{}", &line[min_indent.min(line.len())..])
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn prelude(options: &WrapOptions) -> String {
    let mut path_entries = vec![
        "os.path.join(os.path.dirname(__file__), 'src')".to_string(),
    ];
    path_entries.extend(
        options
            .extra_module_paths
            .iter()
            .map(|p| format!("{p:?}")),
    );

    let path_lines = path_entries
        .iter()
        .map(|e| format!("sys.path.insert(0, {e})"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "import sys\nimport os\nimport json\nimport asyncio\n{path_lines}\n\nexecutor = SkillExecutor()\n\nasync def __entrypoint__():\n    try:\n"
    )
}

const EPILOGUE: &str = "\n    except Exception as e:\n        print(json.dumps({\"error\": str(e), \"success\": False, \"error_type\": type(e).__name__}))\n";

const SCHEDULER_CALL: &str = "\nasyncio.run(__entrypoint__())\n";

/// Wraps `source` into a complete, runnable script. Fails with
/// [`CoreError::Validation`] if nothing but whitespace remains after
/// normalization.
pub fn wrap(source: &str, options: &WrapOptions) -> Result<String, CoreError> {
    let body = dedent_and_reindent(source);
    if body.trim().is_empty() {
        return Err(CoreError::Validation(
            "generated program is empty after normalization".to_string(),
        ));
    }

    let mut script = prelude(options);
    script.push_str(&body);
    script.push_str(EPILOGUE);
    script.push_str(SCHEDULER_CALL);
    Ok(script)
}

/// Counts occurrences of the skill-invocation convention
/// (`executor.execute(...)`) in a generated program, used to populate
/// `metadata.skillCalls` on the returned `TaskResult`.
#[must_use]
pub fn count_skill_calls(source: &str) -> usize {
    source.matches("executor.execute(").count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedents_to_common_indentation() {
        let src = "    a = 1\n    b = 2\n";
        let wrapped = wrap(src, &WrapOptions::default()).unwrap();
        assert!(wrapped.contains("        a = 1"));
        assert!(wrapped.contains("        b = 2"));
    }

    #[test]
    fn preserves_blank_lines() {
        let src = "a = 1\n\nb = 2\n";
        let wrapped = wrap(src, &WrapOptions::default()).unwrap();
        assert!(wrapped.contains("\n\n"));
    }

    #[test]
    fn whitespace_only_source_is_validation_error() {
        let err = wrap("   \n\t\n", &WrapOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn counts_skill_invocations() {
        let src = "executor.execute('a', {})\nexecutor.execute('b', {})\n";
        assert_eq!(count_skill_calls(src), 2);
    }

    #[test]
    fn wrapped_script_ends_with_scheduler_call() {
        let wrapped = wrap("x = 1", &WrapOptions::default()).unwrap();
        assert!(wrapped.trim_end().ends_with("asyncio.run(__entrypoint__())"));
    }

    proptest::proptest! {
        /// Any non-blank generated body survives wrapping with its relative
        /// line count preserved -- wrapping only adds indentation and a
        /// fixed prelude/epilogue, it never drops or merges body lines.
        #[test]
        fn wrap_preserves_body_line_count(lines in proptest::collection::vec("[a-zA-Z0-9_=]{1,20}", 1..10)) {
            let source = lines.join("\n");
            let wrapped = wrap(&source, &WrapOptions::default()).unwrap();
            let body = dedent_and_reindent(&source);
            proptest::prop_assert_eq!(body.lines().count(), lines.len());
            proptest::prop_assert!(wrapped.contains(body.trim()));
        }
    }
}
