use opflow_core::types::OperatorDescriptor;

const PLAN_SHAPE: &str = r#"Reply with a JSON array only, no prose. Each element is one step:
{"op": "<operator name>", "instruction": "<what this step does>", "input_fields": ["<column>"], "output_fields": ["<column>"]}
Rules:
- Use only the operators listed above.
- Steps run in order; each step receives the previous step's result.
- Use semantic operators only on the semantic fields, and sql for structured filtering, grouping and counting.
- Keep the plan as short as the question allows."#;

/// System prompt for turning a question into an operator plan.
pub fn system_prompt(
    operators: &[OperatorDescriptor],
    schema: &str,
    semantic_fields: &[String],
    max_steps: usize,
) -> String {
    let mut prompt = String::from(
        "You are a data analysis planner. Break the user's question into a pipeline of operators.\n\n",
    );

    prompt.push_str("## Operators\n");
    for op in operators {
        prompt.push_str(&format!("- {}: {}\n", op.name, op.description));
    }

    if !schema.trim().is_empty() {
        prompt.push_str("\n## Schema\n");
        prompt.push_str(schema.trim());
        prompt.push('\n');
    }

    if !semantic_fields.is_empty() {
        prompt.push_str("\n## Semantic fields\n");
        prompt.push_str(&semantic_fields.join(", "));
        prompt.push('\n');
    }

    prompt.push_str(&format!("\n## Output\n{}\n- Use at most {} steps.\n", PLAN_SHAPE, max_steps));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_sections() {
        let ops = vec![
            OperatorDescriptor {
                name: "sql".into(),
                description: "Query structured data".into(),
            },
            OperatorDescriptor {
                name: "summarize".into(),
                description: "Summarize rows".into(),
            },
        ];
        let prompt = system_prompt(&ops, "tickets(id, district, body)", &["body".to_string()], 5);
        assert!(prompt.contains("- sql: Query structured data\n- summarize: Summarize rows"));
        assert!(prompt.contains("## Schema\ntickets(id, district, body)"));
        assert!(prompt.contains("## Semantic fields\nbody"));
        assert!(prompt.contains("at most 5 steps"));
    }

    #[test]
    fn test_prompt_omits_empty_sections() {
        let prompt = system_prompt(&[], "  ", &[], 8);
        assert!(!prompt.contains("## Schema"));
        assert!(!prompt.contains("## Semantic fields"));
        assert!(prompt.contains("## Output"));
    }
}
