//! Agent CLI argument-vector assembly (spec §4.E "RUN_MAIN", §6
//! "Command-line contract").
//!
//! The supervisor never invokes a shell; every argument below is passed to
//! [`crate::supervisor::AgentCommand`] verbatim.

/// Flags whose value the prompt-injection step may append trailing text to.
const PROMPT_VALUE_FLAGS: &[&str] = &["--print", "--prompt", "-p", "--instruction", "--message"];

/// Static configuration for assembling Agent CLI invocations.
#[derive(Debug, Clone, Default)]
pub struct AgentCliOptions {
    pub model: Option<String>,
    pub approve_mcps: bool,
}

/// Build the argument vector for one review-loop round (spec §4.E
/// "RUN_MAIN"):
///
/// - iteration 0: `--print <prompt> --force [--model ...] [--approve-mcps]`,
///   with tool/MCP system instructions injected into the prompt value when
///   `tools` is non-empty.
/// - iteration ≥ 1: `--resume <conversation_id> --force [--model ...]
///   [--approve-mcps] <refined prompt>`.
pub fn build_main_args(
    options: &AgentCliOptions,
    iteration: u32,
    conversation_id: &str,
    prompt: &str,
    tools: &[String],
) -> Vec<String> {
    let mut args = Vec::new();

    if iteration == 0 {
        args.push("--print".to_string());
        args.push(prompt.to_string());
        args.push("--force".to_string());
    } else {
        args.push("--resume".to_string());
        args.push(conversation_id.to_string());
        args.push("--force".to_string());
    }

    if let Some(model) = &options.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    if options.approve_mcps {
        args.push("--approve-mcps".to_string());
    }

    if iteration == 0 {
        if !tools.is_empty() {
            inject_prompt(&mut args, &system_instructions(tools));
        }
    } else {
        args.push(prompt.to_string());
    }

    args
}

fn system_instructions(tools: &[String]) -> String {
    format!("\n\nAvailable tools/MCPs for this run: {}", tools.join(", "))
}

/// Append `text` to the value of the first occurrence of one of
/// [`PROMPT_VALUE_FLAGS`]; if none is present, append it to the last
/// argument (spec §6).
pub fn inject_prompt(args: &mut [String], text: &str) {
    for i in 0..args.len() {
        if PROMPT_VALUE_FLAGS.contains(&args[i].as_str()) {
            if let Some(value) = args.get_mut(i + 1) {
                value.push_str(text);
                return;
            }
        }
    }
    if let Some(last) = args.last_mut() {
        last.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_zero_uses_print_and_force() {
        let args = build_main_args(&AgentCliOptions::default(), 0, "agent-1", "do the thing", &[]);
        assert_eq!(args, vec!["--print", "do the thing", "--force"]);
    }

    #[test]
    fn iteration_nonzero_uses_resume_with_conversation_id() {
        let args = build_main_args(&AgentCliOptions::default(), 1, "agent-1", "refine it", &[]);
        assert_eq!(args, vec!["--resume", "agent-1", "--force", "refine it"]);
    }

    #[test]
    fn model_and_approve_mcps_are_included_when_set() {
        let options = AgentCliOptions { model: Some("gpt-5".to_string()), approve_mcps: true };
        let args = build_main_args(&options, 1, "agent-1", "go", &[]);
        assert_eq!(
            args,
            vec!["--resume", "agent-1", "--force", "--model", "gpt-5", "--approve-mcps", "go"]
        );
    }

    #[test]
    fn tool_instructions_are_injected_into_print_value_on_iteration_zero() {
        let tools = vec!["linter".to_string(), "search".to_string()];
        let args = build_main_args(&AgentCliOptions::default(), 0, "agent-1", "fix it", &tools);
        assert_eq!(args[0], "--print");
        assert!(args[1].starts_with("fix it"));
        assert!(args[1].contains("linter"));
        assert!(args[1].contains("search"));
    }

    #[test]
    fn inject_prompt_appends_to_recognized_flag_value() {
        let mut args = vec!["--message".to_string(), "hello".to_string(), "--force".to_string()];
        inject_prompt(&mut args, " world");
        assert_eq!(args[1], "hello world");
    }

    #[test]
    fn inject_prompt_falls_back_to_last_argument() {
        let mut args = vec!["--resume".to_string(), "agent-1".to_string(), "--force".to_string()];
        inject_prompt(&mut args, " extra");
        assert_eq!(args.last().unwrap(), "--force extra");
    }
}
