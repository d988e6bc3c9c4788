//! Serializes dispatcher results back into the wire markup the service
//! expects as the follow-up user turn.

use crate::models::tool::{ToolCall, ToolResult};

/// Format executed tool results, one self-contained block per call, in input
/// order. Content is inserted verbatim.
pub fn format_tool_results(results: &[(ToolCall, ToolResult)]) -> String {
    let mut blocks = Vec::new();

    for (call, result) in results {
        if result.success {
            blocks.push(format!(
                "<function_results>\n<result name=\"{}\">\n{}\n</result>\n</function_results>",
                call.name, result.content
            ));
        } else {
            let error = result.error.as_deref().unwrap_or("unknown error");
            blocks.push(format!(
                "<function_results>\n<error name=\"{}\">\n{}\n</error>\n</function_results>",
                call.name, error
            ));
        }
    }

    blocks.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use std::collections::HashMap;

    fn call(name: &str) -> ToolCall {
        ToolCall::new(name, HashMap::new(), "")
    }

    #[test]
    fn test_success_block() {
        let formatted = format_tool_results(&[(call("fetch-url"), ToolResult::success("body"))]);
        assert_eq!(
            formatted,
            "<function_results>\n<result name=\"fetch-url\">\nbody\n</result>\n</function_results>"
        );
    }

    #[test]
    fn test_failure_block() {
        let formatted =
            format_tool_results(&[(call("shell"), ToolResult::failure("not in this house"))]);
        assert_eq!(
            formatted,
            "<function_results>\n<error name=\"shell\">\nnot in this house\n</error>\n</function_results>"
        );
    }

    #[test]
    fn test_round_trip_recovers_names_and_classification() {
        let results = vec![
            (call("fetch-url"), ToolResult::success("page one")),
            (call("web-search"), ToolResult::failure("no provider")),
            (call("fetch-url"), ToolResult::success("page two")),
        ];
        let formatted = format_tool_results(&results);

        let element = Regex::new(r#"<(result|error) name="([^"]+)">"#).unwrap();
        let recovered: Vec<(bool, String)> = element
            .captures_iter(&formatted)
            .map(|c| (&c[1] == "result", c[2].to_string()))
            .collect();

        let expected: Vec<(bool, String)> = results
            .iter()
            .map(|(call, result)| (result.success, call.name.clone()))
            .collect();
        assert_eq!(recovered, expected);
    }

    #[test]
    fn test_blocks_joined_with_single_newline() {
        let formatted = format_tool_results(&[
            (call("a"), ToolResult::success("1")),
            (call("b"), ToolResult::success("2")),
        ]);
        assert_eq!(formatted.matches("</function_results>\n<function_results>").count(), 1);
    }
}
