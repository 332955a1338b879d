//! Assembles a single system-prompt string from a [`Rubric`] (§4.5).

use std::fmt::Write as _;

use postscore_types::rubric::SCORING_HEADER;
use postscore_types::{Attribute, AttributeCategory, Rubric};

pub fn build_system_prompt(rubric: &Rubric) -> String {
    let mut out = String::new();

    for component in &rubric.prompt_components {
        if component.component_id == SCORING_HEADER {
            out.push_str(&component.text);
            out.push('\n');
            append_rubric_block(&mut out, rubric);
        } else {
            out.push_str(&component.text);
        }
        out.push('\n');
    }

    out.trim().to_string()
}

fn append_rubric_block(out: &mut String, rubric: &Rubric) {
    out.push_str("## Scoring Rubric\n\n");

    let mut positive: Vec<&Attribute> = Vec::new();
    let mut negative: Vec<&Attribute> = Vec::new();

    for attribute in rubric.attributes_by_id.values() {
        if !attribute.active {
            continue;
        }
        match attribute.category {
            AttributeCategory::Positive => positive.push(attribute),
            AttributeCategory::Negative => negative.push(attribute),
            AttributeCategory::Other => {
                tracing::warn!(
                    target: "postscore",
                    attribute_id = attribute.id.as_str(),
                    "scoring attribute has unknown category, defaulting to positive"
                );
                positive.push(attribute);
            }
        }
    }

    out.push_str("### Positive Scoring Attributes\n\n");
    for attribute in &positive {
        append_attribute(out, attribute);
    }

    out.push_str("### Negative Scoring Attributes\n\n");
    for attribute in &negative {
        append_attribute(out, attribute);
    }
}

fn append_attribute(out: &mut String, attribute: &Attribute) {
    let _ = writeln!(
        out,
        "- **{}** ({}): scoring type {:?}, max {} points\n  {}",
        attribute.name, attribute.id, attribute.category, attribute.max_points, attribute.detailed_instructions
    );
    if let Some(keywords) = &attribute.positive_keywords {
        let _ = writeln!(out, "  Positive keywords: {keywords}");
    }
    if let Some(keywords) = &attribute.negative_keywords {
        let _ = writeln!(out, "  Negative keywords: {keywords}");
    }
    if let Some(example) = &attribute.example_high {
        let _ = writeln!(out, "  Example (high): {example}");
    }
    if let Some(example) = &attribute.example_low {
        let _ = writeln!(out, "  Example (low): {example}");
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use postscore_types::PromptComponent;
    use std::collections::BTreeMap;

    fn attribute(id: &str, category: AttributeCategory, active: bool) -> Attribute {
        Attribute {
            id: id.to_string(),
            name: format!("Attribute {id}"),
            category,
            max_points: 10,
            detailed_instructions: "do the thing".to_string(),
            positive_keywords: None,
            negative_keywords: None,
            example_high: None,
            example_low: None,
            active,
        }
    }

    #[test]
    fn inactive_attributes_are_skipped() {
        let mut attributes_by_id = BTreeMap::new();
        attributes_by_id.insert("a".to_string(), attribute("a", AttributeCategory::Positive, false));
        let rubric = Rubric {
            prompt_components: vec![PromptComponent {
                component_id: SCORING_HEADER.to_string(),
                name: "header".to_string(),
                text: "Score the posts.".to_string(),
                order: 0,
            }],
            attributes_by_id,
        };
        let prompt = build_system_prompt(&rubric);
        assert!(!prompt.contains("Attribute a"));
    }

    #[test]
    fn unknown_category_defaults_to_positive() {
        let mut attributes_by_id = BTreeMap::new();
        attributes_by_id.insert("a".to_string(), attribute("a", AttributeCategory::Other, true));
        let rubric = Rubric {
            prompt_components: vec![PromptComponent {
                component_id: SCORING_HEADER.to_string(),
                name: "header".to_string(),
                text: "Score the posts.".to_string(),
                order: 0,
            }],
            attributes_by_id,
        };
        let prompt = build_system_prompt(&rubric);
        let positive_idx = prompt.find("Positive Scoring Attributes").unwrap();
        let negative_idx = prompt.find("Negative Scoring Attributes").unwrap();
        let attribute_idx = prompt.find("Attribute a").unwrap();
        assert!(positive_idx < attribute_idx && attribute_idx < negative_idx);
    }

    #[test]
    fn other_components_are_emitted_verbatim() {
        let rubric = Rubric {
            prompt_components: vec![PromptComponent {
                component_id: "intro".to_string(),
                name: "intro".to_string(),
                text: "You are a scoring assistant.".to_string(),
                order: 0,
            }],
            attributes_by_id: BTreeMap::new(),
        };
        let prompt = build_system_prompt(&rubric);
        assert_eq!(prompt, "You are a scoring assistant.");
    }

    #[test]
    fn final_string_is_trimmed() {
        let rubric = Rubric {
            prompt_components: vec![PromptComponent {
                component_id: "intro".to_string(),
                name: "intro".to_string(),
                text: "  padded  ".to_string(),
                order: 0,
            }],
            attributes_by_id: BTreeMap::new(),
        };
        let prompt = build_system_prompt(&rubric);
        assert_eq!(prompt, "padded");
    }
}
