//! Static validation and compilation of workflow definitions
//!
//! A single pass over the steps checks block nesting, labels and expression
//! syntax, and records a jump target for every control-flow step. The
//! interpreter only ever follows these targets; it never searches the step
//! list at run time.

use super::env::{LOOP_NAMESPACE, PARSED_NAMESPACE, RESERVED_NAMES};
use super::error::{ValidationError, ValidationFailure};
use super::expr::{self, Expr};
use crate::config::{PromptDefinition, Step, WorkflowDefinition};
use std::collections::HashMap;
use std::sync::Arc;

/// A step with its expressions already parsed
#[derive(Debug, Clone)]
pub enum Instruction {
    Set { name: String, expr: Expr },
    Prompt {
        name: String,
        definition: Arc<PromptDefinition>,
    },
    If { condition: Expr },
    Else,
    EndIf,
    ForEach { var: String, collection: Expr },
    EndForEach,
    Goto { label: String },
    Label,
    Output { fields: Vec<(String, Expr)> },
}

impl Instruction {
    pub fn kind(&self) -> &'static str {
        match self {
            Instruction::Set { .. } => "set",
            Instruction::Prompt { .. } => "prompt",
            Instruction::If { .. } => "if",
            Instruction::Else => "else",
            Instruction::EndIf => "end_if",
            Instruction::ForEach { .. } => "for_each",
            Instruction::EndForEach => "end_for_each",
            Instruction::Goto { .. } => "goto",
            Instruction::Label => "label",
            Instruction::Output { .. } => "output",
        }
    }
}

/// Step index → step index for every control-flow step
///
/// - `if`: first step of the `else` body, or the `end_if`, taken when false
/// - `else`: the matching `end_if`
/// - `for_each`: the step after `end_for_each`, taken for an empty list
/// - `end_for_each`: the first body step, taken while elements remain
/// - `goto`: the label
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JumpTable {
    targets: Vec<Option<usize>>,
}

impl JumpTable {
    fn with_len(len: usize) -> Self {
        Self {
            targets: vec![None; len],
        }
    }

    fn set(&mut self, from: usize, to: usize) {
        self.targets[from] = Some(to);
    }

    /// Jump target recorded for the step at `pc`
    pub fn target(&self, pc: usize) -> Option<usize> {
        self.targets.get(pc).copied().flatten()
    }
}

/// A validated, executable workflow
#[derive(Debug, Clone)]
pub struct Program {
    name: String,
    instructions: Vec<Instruction>,
    jumps: JumpTable,
    loop_depth: Vec<usize>,
    max_steps: Option<usize>,
}

enum Block {
    If { start: usize, else_at: Option<usize> },
    Loop { start: usize },
}

impl Block {
    fn kind(&self) -> &'static str {
        match self {
            Block::If { .. } => "if",
            Block::Loop { .. } => "for_each",
        }
    }

    fn start(&self) -> usize {
        match self {
            Block::If { start, .. } | Block::Loop { start } => *start,
        }
    }
}

impl Program {
    /// Validate a definition and build its jump table
    ///
    /// Every problem is collected; a definition with any error never yields
    /// a program.
    pub fn compile(definition: &WorkflowDefinition) -> Result<Self, ValidationFailure> {
        let steps = &definition.steps;
        let mut errors = Vec::new();
        let mut instructions = Vec::with_capacity(steps.len());
        let mut jumps = JumpTable::with_len(steps.len());
        let mut loop_stacks: Vec<Vec<usize>> = Vec::with_capacity(steps.len());

        let mut blocks: Vec<Block> = Vec::new();
        let mut loops: Vec<usize> = Vec::new();
        let mut labels: HashMap<&str, usize> = HashMap::new();
        let mut gotos: Vec<(usize, &str)> = Vec::new();

        let parse = |step: usize, source: &str, errors: &mut Vec<ValidationError>| {
            expr::parse(source).map_err(|e| {
                errors.push(ValidationError::Expression {
                    step,
                    source_text: source.to_string(),
                    message: e.to_string(),
                })
            })
        };

        for (i, step) in steps.iter().enumerate() {
            loop_stacks.push(loops.clone());

            let instruction = match step {
                Step::Set { name, expr } => {
                    if RESERVED_NAMES.contains(&name.as_str()) {
                        errors.push(ValidationError::ReservedName {
                            step: i,
                            name: name.clone(),
                        });
                    }
                    parse(i, expr, &mut errors).ok().map(|expr| Instruction::Set {
                        name: name.clone(),
                        expr,
                    })
                }
                Step::Prompt { prompt } => match definition.prompts.get(prompt) {
                    Some(found) => Some(Instruction::Prompt {
                        name: prompt.clone(),
                        definition: Arc::new(found.clone()),
                    }),
                    None => {
                        errors.push(ValidationError::UnknownPrompt {
                            step: i,
                            prompt: prompt.clone(),
                        });
                        None
                    }
                },
                Step::If { condition } => {
                    blocks.push(Block::If {
                        start: i,
                        else_at: None,
                    });
                    parse(i, condition, &mut errors)
                        .ok()
                        .map(|condition| Instruction::If { condition })
                }
                Step::Else => {
                    match blocks.last_mut() {
                        Some(Block::If {
                            else_at: else_at @ None,
                            ..
                        }) => *else_at = Some(i),
                        Some(Block::If { start, .. }) => {
                            errors.push(ValidationError::DuplicateElse {
                                step: i,
                                opened_at: *start,
                            })
                        }
                        Some(other) => errors.push(ValidationError::Crossed {
                            step: i,
                            kind: "else",
                            open_kind: other.kind(),
                            opened_at: other.start(),
                        }),
                        None => errors.push(ValidationError::Unopened {
                            step: i,
                            kind: "else",
                            expected: "if",
                        }),
                    }
                    Some(Instruction::Else)
                }
                Step::EndIf => {
                    match blocks.last() {
                        Some(Block::If { start, else_at }) => {
                            match else_at {
                                Some(e) => {
                                    jumps.set(*start, e + 1);
                                    jumps.set(*e, i);
                                }
                                None => jumps.set(*start, i),
                            }
                            blocks.pop();
                        }
                        Some(other) => errors.push(ValidationError::Crossed {
                            step: i,
                            kind: "end_if",
                            open_kind: other.kind(),
                            opened_at: other.start(),
                        }),
                        None => errors.push(ValidationError::Unopened {
                            step: i,
                            kind: "end_if",
                            expected: "if",
                        }),
                    }
                    Some(Instruction::EndIf)
                }
                Step::ForEach { var, collection } => {
                    if var == PARSED_NAMESPACE || var == LOOP_NAMESPACE {
                        errors.push(ValidationError::ReservedName {
                            step: i,
                            name: var.clone(),
                        });
                    }
                    blocks.push(Block::Loop { start: i });
                    loops.push(i);
                    parse(i, collection, &mut errors)
                        .ok()
                        .map(|collection| Instruction::ForEach {
                            var: var.clone(),
                            collection,
                        })
                }
                Step::EndForEach => {
                    match blocks.last() {
                        Some(Block::Loop { start }) => {
                            jumps.set(*start, i + 1);
                            jumps.set(i, start + 1);
                            blocks.pop();
                            loops.pop();
                        }
                        Some(other) => errors.push(ValidationError::Crossed {
                            step: i,
                            kind: "end_for_each",
                            open_kind: other.kind(),
                            opened_at: other.start(),
                        }),
                        None => errors.push(ValidationError::Unopened {
                            step: i,
                            kind: "end_for_each",
                            expected: "for_each",
                        }),
                    }
                    Some(Instruction::EndForEach)
                }
                Step::Goto { label } => {
                    gotos.push((i, label.as_str()));
                    Some(Instruction::Goto {
                        label: label.clone(),
                    })
                }
                Step::Label { name } => {
                    if let Some(first) = labels.get(name.as_str()) {
                        errors.push(ValidationError::DuplicateLabel {
                            step: i,
                            label: name.clone(),
                            first: *first,
                        });
                    } else {
                        labels.insert(name.as_str(), i);
                    }
                    Some(Instruction::Label)
                }
                Step::Output { fields } => {
                    if fields.is_empty() {
                        errors.push(ValidationError::EmptyOutput { step: i });
                    }
                    let parsed: Vec<_> = fields
                        .iter()
                        .filter_map(|field| {
                            parse(i, field, &mut errors)
                                .ok()
                                .map(|expr| (field.clone(), expr))
                        })
                        .collect();
                    Some(Instruction::Output { fields: parsed })
                }
            };

            instructions.push(instruction.unwrap_or(Instruction::Label));
        }

        for block in &blocks {
            errors.push(ValidationError::Unclosed {
                step: block.start(),
                kind: block.kind(),
            });
        }

        for (step, label) in gotos {
            let Some(&target) = labels.get(label) else {
                errors.push(ValidationError::DanglingGoto {
                    step,
                    label: label.to_string(),
                });
                continue;
            };
            if !loop_stacks[step].starts_with(&loop_stacks[target]) {
                errors.push(ValidationError::GotoIntoLoop {
                    step,
                    label: label.to_string(),
                });
                continue;
            }
            jumps.set(step, target);
        }

        let mut prompt_names: Vec<_> = definition.prompts.keys().collect();
        prompt_names.sort();
        for name in prompt_names {
            let prompt = &definition.prompts[name];
            if let Err(e) = crate::template::validate_template(&prompt.template) {
                errors.push(ValidationError::InvalidPrompt {
                    prompt: name.clone(),
                    message: e.to_string(),
                });
            }
            if let Err(e) = crate::parser::validate_config(&prompt.parser) {
                errors.push(ValidationError::InvalidPrompt {
                    prompt: name.clone(),
                    message: e.to_string(),
                });
            }
        }

        if !errors.is_empty() {
            return Err(ValidationFailure {
                workflow: definition.name.clone(),
                errors,
            });
        }

        Ok(Self {
            name: definition.name.clone(),
            instructions,
            jumps,
            loop_depth: loop_stacks.iter().map(Vec::len).collect(),
            max_steps: definition.max_steps,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instruction(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }

    pub fn jumps(&self) -> &JumpTable {
        &self.jumps
    }

    /// Number of loops enclosing the step at `pc`
    pub fn loop_depth(&self, pc: usize) -> usize {
        self.loop_depth.get(pc).copied().unwrap_or(0)
    }

    /// Step budget declared by the workflow itself
    pub fn max_steps(&self) -> Option<usize> {
        self.max_steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParserConfig, ParserKind};

    fn workflow(steps: Vec<Step>) -> WorkflowDefinition {
        let mut prompts = HashMap::new();
        prompts.insert(
            "ask".to_string(),
            PromptDefinition {
                template: "Q: {{question}}".into(),
                ..Default::default()
            },
        );
        WorkflowDefinition {
            name: "test".into(),
            prompts,
            steps,
            ..Default::default()
        }
    }

    fn set(name: &str, expr: &str) -> Step {
        Step::Set {
            name: name.into(),
            expr: expr.into(),
        }
    }

    fn cond(condition: &str) -> Step {
        Step::If {
            condition: condition.into(),
        }
    }

    fn for_each(var: &str, collection: &str) -> Step {
        Step::ForEach {
            var: var.into(),
            collection: collection.into(),
        }
    }

    fn errors_of(steps: Vec<Step>) -> Vec<ValidationError> {
        Program::compile(&workflow(steps)).unwrap_err().errors
    }

    #[test]
    fn test_if_else_jumps() {
        let program = Program::compile(&workflow(vec![
            cond("x > 1"),   // 0
            set("y", "1"),   // 1
            Step::Else,      // 2
            set("y", "2"),   // 3
            Step::EndIf,     // 4
        ]))
        .unwrap();

        assert_eq!(program.jumps().target(0), Some(3));
        assert_eq!(program.jumps().target(2), Some(4));
        assert_eq!(program.jumps().target(1), None);
    }

    #[test]
    fn test_if_without_else_jumps_to_end() {
        let program =
            Program::compile(&workflow(vec![cond("true"), set("y", "1"), Step::EndIf])).unwrap();
        assert_eq!(program.jumps().target(0), Some(2));
    }

    #[test]
    fn test_for_each_jumps_and_depth() {
        let program = Program::compile(&workflow(vec![
            set("x", "0"),              // 0
            for_each("row", "[1, 2]"), // 1
            set("x", "x + row"),       // 2
            Step::EndForEach,          // 3
            Step::Output {
                fields: vec!["x".into()],
            }, // 4
        ]))
        .unwrap();

        assert_eq!(program.jumps().target(1), Some(4));
        assert_eq!(program.jumps().target(3), Some(2));
        assert_eq!(program.loop_depth(1), 0);
        assert_eq!(program.loop_depth(2), 1);
        assert_eq!(program.loop_depth(3), 1);
        assert_eq!(program.loop_depth(4), 0);
    }

    #[test]
    fn test_goto_resolves_to_label() {
        let program = Program::compile(&workflow(vec![
            Step::Goto {
                label: "done".into(),
            },
            set("skipped", "1"),
            Step::Label {
                name: "done".into(),
            },
        ]))
        .unwrap();
        assert_eq!(program.jumps().target(0), Some(2));
    }

    #[test]
    fn test_unclosed_if() {
        let errors = errors_of(vec![cond("true"), set("x", "1")]);
        assert_eq!(
            errors,
            vec![ValidationError::Unclosed {
                step: 0,
                kind: "if"
            }]
        );
    }

    #[test]
    fn test_unopened_end_for_each() {
        let errors = errors_of(vec![set("x", "1"), Step::EndForEach]);
        assert!(matches!(
            errors[0],
            ValidationError::Unopened {
                step: 1,
                kind: "end_for_each",
                ..
            }
        ));
    }

    #[test]
    fn test_crossed_blocks() {
        let errors = errors_of(vec![
            cond("true"),
            for_each("n", "[1]"),
            Step::EndIf,
            Step::EndForEach,
        ]);
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::Crossed {
                step: 2,
                open_kind: "for_each",
                ..
            }
        )));
    }

    #[test]
    fn test_duplicate_else() {
        let errors = errors_of(vec![cond("true"), Step::Else, Step::Else, Step::EndIf]);
        assert_eq!(
            errors,
            vec![ValidationError::DuplicateElse {
                step: 2,
                opened_at: 0
            }]
        );
    }

    #[test]
    fn test_labels() {
        let errors = errors_of(vec![
            Step::Label { name: "a".into() },
            Step::Label { name: "a".into() },
            Step::Goto {
                label: "missing".into(),
            },
        ]);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateLabel { step: 1, .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DanglingGoto { step: 2, .. })));
    }

    #[test]
    fn test_goto_into_loop_rejected() {
        let errors = errors_of(vec![
            Step::Goto {
                label: "inside".into(),
            },
            for_each("n", "[1]"),
            Step::Label {
                name: "inside".into(),
            },
            Step::EndForEach,
        ]);
        assert!(matches!(errors[0], ValidationError::GotoIntoLoop { step: 0, .. }));
    }

    #[test]
    fn test_goto_out_of_loop_allowed() {
        let program = Program::compile(&workflow(vec![
            for_each("n", "[1, 2]"),
            Step::Goto {
                label: "out".into(),
            },
            Step::EndForEach,
            Step::Label { name: "out".into() },
        ]))
        .unwrap();
        assert_eq!(program.jumps().target(1), Some(3));
        assert_eq!(program.loop_depth(3), 0);
    }

    #[test]
    fn test_reserved_and_expression_errors() {
        let errors = errors_of(vec![
            set("parsed", "1"),
            set("x", "1 +"),
            for_each("loop", "[1]"),
            Step::EndForEach,
        ]);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::ReservedName { step: 0, .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::Expression { step: 1, .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::ReservedName { step: 2, .. })));
    }

    #[test]
    fn test_prompt_checks() {
        let mut definition = workflow(vec![Step::Prompt {
            prompt: "unknown".into(),
        }]);
        definition.prompts.insert(
            "broken".into(),
            PromptDefinition {
                template: "{{ open".into(),
                ..Default::default()
            },
        );
        definition.prompts.insert(
            "bad_regex".into(),
            PromptDefinition {
                template: "ok".into(),
                parser: ParserConfig {
                    kind: ParserKind::Regex,
                    pattern: Some("(unclosed".into()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        let errors = Program::compile(&definition).unwrap_err().errors;
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnknownPrompt { .. })));
        assert!(errors.iter().any(
            |e| matches!(e, ValidationError::InvalidPrompt { prompt, .. } if prompt == "broken")
        ));
        assert!(errors.iter().any(
            |e| matches!(e, ValidationError::InvalidPrompt { prompt, .. } if prompt == "bad_regex")
        ));
    }

    #[test]
    fn test_empty_output_rejected() {
        let errors = errors_of(vec![Step::Output { fields: vec![] }]);
        assert_eq!(errors, vec![ValidationError::EmptyOutput { step: 0 }]);
    }
}
