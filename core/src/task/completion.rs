use super::task::Task;

/// Decides whether raw agent output counts as a successful completion.
pub trait CompletionChecker: Send + Sync {
    fn is_complete(&self, task: &Task, raw: &str) -> bool;
}

/// Accepts a non-null structured result, else any non-blank text.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCompletionChecker;

impl CompletionChecker for DefaultCompletionChecker {
    fn is_complete(&self, task: &Task, raw: &str) -> bool {
        let parsed = task.parse_output(raw);
        let structured = parsed
            .model
            .as_ref()
            .or(parsed.json_dict.as_ref())
            .is_some_and(|v| !v.is_null());
        structured || !raw.trim().is_empty()
    }
}

pub struct FnCompletionChecker<F>(pub F);

impl<F> CompletionChecker for FnCompletionChecker<F>
where
    F: Fn(&Task, &str) -> bool + Send + Sync,
{
    fn is_complete(&self, task: &Task, raw: &str) -> bool {
        (self.0)(task, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::OutputFormat;

    #[test]
    fn blank_output_is_not_complete() {
        let task = Task::builder("write").build();
        assert!(!DefaultCompletionChecker.is_complete(&task, "   \n"));
        assert!(DefaultCompletionChecker.is_complete(&task, "text"));
    }

    #[test]
    fn null_json_falls_back_to_text_check() {
        let task = Task::builder("emit json")
            .output_format(OutputFormat::Json)
            .build();
        assert!(DefaultCompletionChecker.is_complete(&task, "{\"ok\": true}"));
        // "null" parses to a null value but is still non-blank text.
        assert!(DefaultCompletionChecker.is_complete(&task, "null"));
        assert!(!DefaultCompletionChecker.is_complete(&task, ""));
    }

    #[test]
    fn closure_checker_overrides_default() {
        let checker = FnCompletionChecker(|_: &Task, raw: &str| raw.contains("DONE"));
        let task = Task::builder("x").build();
        assert!(!checker.is_complete(&task, "partial"));
        assert!(checker.is_complete(&task, "all DONE"));
    }
}
