//! Fixed prompt templates for the screenshot pipeline and the short-answer
//! path.

/// Stage-1 analytical prompt: structured extraction from screenshots.
pub const SCREENSHOT_ANALYSIS_PROMPT: &str = "\
Analyze these coding screenshots carefully. Extract and identify:

1. **Problem Statement**: Any coding problems, questions, or technical challenges
2. **Code Content**: Programming code, algorithms, data structures, or technical implementations
3. **UI Elements**: Buttons, forms, interfaces, or interactive components
4. **Error Messages**: Any error outputs, warnings, or system messages
5. **Test Cases**: Input/output examples, test scenarios, or expected results
6. **Technical Details**: APIs, databases, frameworks, or technical specifications

Provide a comprehensive, structured analysis that captures all relevant technical information for solving the problem.";

/// Stage-2 prompt: turn the stage-1 analysis into a structured solution.
pub fn solution_prompt(analysis: &str, additional_context: Option<&str>) -> String {
    let context_section = additional_context
        .map(|ctx| format!("## Additional Context:\n{ctx}\n\n"))
        .unwrap_or_default();

    format!(
        "\
Based on the following image analysis, provide a comprehensive solution for this problem:

## Image Analysis:
{analysis}

{context_section}## Please provide a complete solution including:

1. **Problem Understanding**: Clear explanation of what needs to be solved
2. **Approach**: Step-by-step solution strategy
3. **Implementation**: Complete, working code with proper syntax highlighting
4. **Explanation**: Line-by-line code explanation for complex parts
5. **Time & Space Complexity**: Big O analysis
6. **Edge Cases**: Important considerations and edge cases
7. **Testing**: Example test cases and expected outputs
8. **Optimization**: Potential improvements or alternative approaches

Format your response clearly with proper markdown formatting for code blocks. Focus on providing accurate, complete solutions."
    )
}

/// Short-answer template constraining the reply to 3-4 lines.
pub fn short_answer_prompt(question: &str, context: Option<&str>) -> String {
    let context_section = context
        .map(|ctx| format!("Context: {ctx}\n\n"))
        .unwrap_or_default();

    format!(
        "\
Answer in EXACTLY 3-4 lines maximum. Be precise and complete.

Format:
- Line 1: Direct answer
- Line 2-3: Key explanation/solution
- Line 4: Example/conclusion (if needed)

For coding: Show working code + brief explanation in 3-4 lines total.
For any question: Complete answer in 3-4 lines maximum.
Use markdown formatting.

{context_section}Question: {question}

Answer (3-4 lines max):"
    )
}
