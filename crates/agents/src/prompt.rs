use crate::tool_registry::{CapabilityRegistry, ParamKind, ParamSpec};

/// Build the default system prompt, describing every registered capability.
///
/// Schemas are also sent through the backend's native function-calling
/// field; listing them here keeps smaller local models on track.
pub fn build_system_prompt(registry: &CapabilityRegistry) -> String {
    let mut prompt = String::from(
        "You are a penetration testing assistant. You operate a network scanner and an \
         exploitation framework on behalf of an authorized tester.\n\n",
    );

    if !registry.is_empty() {
        prompt.push_str("## Available Tools\n\n");
        for descriptor in registry.list() {
            prompt.push_str(&format!("### {}\n{}\n", descriptor.name, descriptor.description));
            if descriptor.parameters.is_empty() {
                prompt.push_str("\nNo parameters.\n\n");
                continue;
            }
            prompt.push_str("\nParameters:\n");
            for param in &descriptor.parameters {
                prompt.push_str(&describe_param(param));
            }
            prompt.push('\n');
        }
    }

    prompt.push_str(concat!(
        "## Guidelines\n\n",
        "- Only act on targets the user has explicitly named as in scope.\n",
        "- Start with the least intrusive scan that answers the question.\n",
        "- Read each tool result before deciding on the next step.\n",
        "- If a tool reports an error, explain it instead of retrying blindly.\n",
        "- Ask the user before running exploits or commands inside a session.\n",
    ));

    prompt
}

fn describe_param(param: &ParamSpec) -> String {
    let mut line = format!(
        "- `{}` ({}{}): {}",
        param.name,
        kind_name(param),
        if param.required { ", required" } else { "" },
        param.description
    );
    if let Some(allowed) = &param.allowed {
        line.push_str(&format!(" One of: {}.", allowed.join(", ")));
    }
    line.push('\n');
    line
}

fn kind_name(param: &ParamSpec) -> &'static str {
    match param.kind {
        ParamKind::String => "string",
        ParamKind::StringList => "list of strings",
        ParamKind::Object => "object",
        ParamKind::Id => "id",
    }
}
