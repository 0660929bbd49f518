//! Executes a compiled program for one job item

use super::env::Environment;
use super::error::{ErrorDetail, FailureKind, RuntimeError, StepFailure};
use super::expr::{is_truthy, type_name};
use super::program::{Instruction, Program};
use crate::config::PromptDefinition;
use crate::parser::ResponseParser;
use crate::provider::{PromptExecutor, PromptRequest};
use crate::template::TemplateRenderer;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Step budget applied when neither the workflow nor the caller sets one
pub const DEFAULT_MAX_STEPS: usize = 10_000;

/// What one item's run produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemOutcome {
    /// One row per `output` step executed
    pub output_rows: Vec<Map<String, Value>>,

    /// Set when the item failed; rows emitted before the failure are kept
    pub error: Option<ErrorDetail>,

    /// Raw text of the most recent provider response
    pub raw_text: Option<String>,

    /// Total provider time across every prompt of the item
    pub turnaround_ms: u64,

    pub steps_executed: usize,
}

impl ItemOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives programs against the three collaborators
///
/// The interpreter holds no per-item state; every `run` builds a fresh
/// environment, so one instance is shared by all workers.
#[derive(Clone)]
pub struct Interpreter {
    renderer: Arc<dyn TemplateRenderer>,
    executor: Arc<dyn PromptExecutor>,
    parser: Arc<dyn ResponseParser>,
    max_steps: usize,
}

impl Interpreter {
    pub fn new(
        renderer: Arc<dyn TemplateRenderer>,
        executor: Arc<dyn PromptExecutor>,
        parser: Arc<dyn ResponseParser>,
    ) -> Self {
        Self {
            renderer,
            executor,
            parser,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Budget for programs that do not declare their own
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Run `program` with `bindings` as the item's seed variables
    pub async fn run(&self, program: &Program, bindings: Map<String, Value>) -> ItemOutcome {
        let mut env = Environment::new(bindings);
        let mut outcome = ItemOutcome::default();

        if let Err(failure) = self.execute(program, &mut env, &mut outcome).await {
            tracing::debug!(
                workflow = program.name(),
                step = failure.step,
                kind = failure.step_kind,
                error = %failure.kind,
                "item failed"
            );
            outcome.error = Some(failure.to_detail());
        }

        outcome
    }

    async fn execute(
        &self,
        program: &Program,
        env: &mut Environment,
        outcome: &mut ItemOutcome,
    ) -> Result<(), StepFailure> {
        let limit = program.max_steps().unwrap_or(self.max_steps);
        // Compiled programs carry a target for every control step
        let jump = |pc: usize| program.jumps().target(pc).unwrap_or(pc + 1);
        let mut pc = 0;

        while let Some(instruction) = program.instruction(pc) {
            let kind = instruction.kind();
            if outcome.steps_executed >= limit {
                return Err(StepFailure::new(
                    pc,
                    kind,
                    RuntimeError::StepLimitExceeded { limit },
                ));
            }
            outcome.steps_executed += 1;

            let fail = move |e: RuntimeError| StepFailure::new(pc, kind, e);

            pc = match instruction {
                Instruction::Set { name, expr } => {
                    let value = expr.eval(env).map_err(fail)?;
                    env.set(name, value);
                    pc + 1
                }
                Instruction::If { condition } => {
                    if is_truthy(&condition.eval(env).map_err(fail)?) {
                        pc + 1
                    } else {
                        jump(pc)
                    }
                }
                Instruction::Else => jump(pc),
                Instruction::EndIf | Instruction::Label => pc + 1,
                Instruction::ForEach { var, collection } => {
                    let items = into_list(collection.eval(env).map_err(fail)?).map_err(fail)?;
                    if env.push_frame(var, items) {
                        pc + 1
                    } else {
                        jump(pc)
                    }
                }
                Instruction::EndForEach => {
                    if env.advance_frame() {
                        jump(pc)
                    } else {
                        pc + 1
                    }
                }
                Instruction::Goto { .. } => {
                    let target = jump(pc);
                    env.truncate_frames(program.loop_depth(target));
                    target
                }
                Instruction::Prompt { name, definition } => {
                    self.prompt(name, definition, env, outcome)
                        .await
                        .map_err(|e| StepFailure::new(pc, kind, e))?;
                    pc + 1
                }
                Instruction::Output { fields } => {
                    let mut row = Map::new();
                    for (field, expr) in fields {
                        row.insert(field.clone(), expr.eval(env).map_err(fail)?);
                    }
                    outcome.output_rows.push(row);
                    pc + 1
                }
            };
        }

        Ok(())
    }

    /// Render, execute, parse, merge
    async fn prompt(
        &self,
        name: &str,
        definition: &PromptDefinition,
        env: &mut Environment,
        outcome: &mut ItemOutcome,
    ) -> Result<(), FailureKind> {
        let text = self
            .renderer
            .render(&definition.template, &env.snapshot())
            .map_err(|e| e.in_prompt(name))?;

        let request = PromptRequest {
            text,
            provider: definition.provider.clone(),
            model: definition.model.clone(),
            parameters: definition.parameters.clone(),
        };

        let response = self.executor.execute(&request).await?;
        tracing::trace!(prompt = name, turnaround_ms = response.turnaround_ms, "prompt answered");

        outcome.turnaround_ms += response.turnaround_ms;
        let fields = self.parser.parse(&response.raw_text, &definition.parser);
        outcome.raw_text = Some(response.raw_text);

        env.merge_parsed(fields?);
        Ok(())
    }
}

/// Lists iterate as-is; a string holding a JSON array is decoded first
fn into_list(value: Value) -> Result<Vec<Value>, RuntimeError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::String(ref text) => match serde_json::from_str(text) {
            Ok(Value::Array(items)) => Ok(items),
            _ => Err(RuntimeError::NotIterable {
                found: type_name(&value).to_string(),
            }),
        },
        other => Err(RuntimeError::NotIterable {
            found: type_name(&other).to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParserConfig, ParserKind, Step, WorkflowDefinition};
    use crate::engine::ErrorCategory;
    use crate::parser::{ParseError, StructuredParser};
    use crate::provider::{EchoProvider, PromptResponse, ProviderError};
    use crate::template::TemplateEngine;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn set(name: &str, expr: &str) -> Step {
        Step::Set {
            name: name.into(),
            expr: expr.into(),
        }
    }

    fn output(fields: &[&str]) -> Step {
        Step::Output {
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn compile(steps: Vec<Step>, prompts: HashMap<String, PromptDefinition>) -> Program {
        Program::compile(&WorkflowDefinition {
            name: "test".into(),
            prompts,
            steps,
            ..Default::default()
        })
        .unwrap()
    }

    fn echo_interpreter() -> Interpreter {
        Interpreter::new(
            Arc::new(TemplateEngine::new()),
            Arc::new(EchoProvider),
            Arc::new(StructuredParser),
        )
    }

    fn seed(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_loop_sum() {
        let program = compile(
            vec![
                set("x", "0"),
                Step::ForEach {
                    var: "row".into(),
                    collection: "[{a: 1}, {a: 2}]".into(),
                },
                set("x", "x + row.a"),
                Step::EndForEach,
                output(&["x"]),
            ],
            HashMap::new(),
        );

        let outcome = echo_interpreter().run(&program, Map::new()).await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.output_rows, vec![seed(json!({"x": 3}))]);
    }

    #[tokio::test]
    async fn test_empty_loop_skips_body() {
        let program = compile(
            vec![
                set("count", "0"),
                Step::ForEach {
                    var: "n".into(),
                    collection: "[]".into(),
                },
                set("count", "count + 1"),
                Step::EndForEach,
                output(&["count"]),
            ],
            HashMap::new(),
        );

        let outcome = echo_interpreter().run(&program, Map::new()).await;
        assert_eq!(outcome.output_rows[0]["count"], json!(0));
    }

    #[tokio::test]
    async fn test_exactly_one_branch_per_iteration() {
        let program = compile(
            vec![
                set("big", "0"),
                set("small", "0"),
                Step::ForEach {
                    var: "n".into(),
                    collection: "[1, 5, 2, 7]".into(),
                },
                Step::If {
                    condition: "n > 3".into(),
                },
                set("big", "big + 1"),
                Step::Else,
                set("small", "small + 1"),
                Step::EndIf,
                Step::EndForEach,
                output(&["big", "small"]),
            ],
            HashMap::new(),
        );

        let outcome = echo_interpreter().run(&program, Map::new()).await;
        assert_eq!(outcome.output_rows[0], seed(json!({"big": 2, "small": 2})));
    }

    #[tokio::test]
    async fn test_goto_out_of_loop_pops_frame() {
        let program = compile(
            vec![
                Step::ForEach {
                    var: "n".into(),
                    collection: "[1, 2, 3]".into(),
                },
                Step::If {
                    condition: "n == 2".into(),
                },
                Step::Goto {
                    label: "found".into(),
                },
                Step::EndIf,
                Step::EndForEach,
                Step::Label {
                    name: "found".into(),
                },
                output(&["loop"]),
            ],
            HashMap::new(),
        );

        // Outside any loop `loop` is unbound, so the output fails if the
        // frame leaked past the goto
        let outcome = echo_interpreter().run(&program, Map::new()).await;
        let error = outcome.error.unwrap();
        assert_eq!(error.category, ErrorCategory::Runtime);
        assert!(error.message.contains("undefined variable 'loop'"));
    }

    #[tokio::test]
    async fn test_backward_goto_hits_step_limit() {
        let program = compile(
            vec![
                Step::Label {
                    name: "again".into(),
                },
                Step::Goto {
                    label: "again".into(),
                },
            ],
            HashMap::new(),
        );

        let outcome = echo_interpreter()
            .with_max_steps(50)
            .run(&program, Map::new())
            .await;
        assert_eq!(outcome.steps_executed, 50);
        assert!(outcome.error.unwrap().message.contains("step budget of 50"));
    }

    #[tokio::test]
    async fn test_undefined_variable_fails_item_but_keeps_rows() {
        let program = compile(
            vec![set("a", "1"), output(&["a"]), set("b", "missing + 1")],
            HashMap::new(),
        );

        let outcome = echo_interpreter().run(&program, Map::new()).await;
        assert_eq!(outcome.output_rows.len(), 1);
        let error = outcome.error.unwrap();
        assert_eq!(error.step, Some(2));
        assert_eq!(error.category, ErrorCategory::Runtime);
    }

    #[tokio::test]
    async fn test_for_each_accepts_json_string() {
        let program = compile(
            vec![
                set("total", "0"),
                Step::ForEach {
                    var: "n".into(),
                    collection: "numbers".into(),
                },
                set("total", "total + n"),
                Step::EndForEach,
                output(&["total"]),
            ],
            HashMap::new(),
        );

        let outcome = echo_interpreter()
            .run(&program, seed(json!({"numbers": "[1, 2, 3]"})))
            .await;
        assert_eq!(outcome.output_rows[0]["total"], json!(6));

        let outcome = echo_interpreter()
            .run(&program, seed(json!({"numbers": 5})))
            .await;
        assert!(outcome.error.unwrap().message.contains("cannot iterate"));
    }

    #[tokio::test]
    async fn test_prompt_parses_into_parsed_namespace() {
        let mut prompts = HashMap::new();
        prompts.insert(
            "grade".to_string(),
            PromptDefinition {
                template: "ANSWER: {{answerKey:str}}".into(),
                parser: ParserConfig {
                    kind: ParserKind::Regex,
                    fields: vec!["ANSWER".into()],
                    pattern: Some(r"ANSWER:\s*(?P<ANSWER>\S+)".into()),
                },
                ..Default::default()
            },
        );
        let program = compile(
            vec![
                Step::Prompt {
                    prompt: "grade".into(),
                },
                set("correct", "parsed.ANSWER == row.answerKey"),
                output(&["parsed.ANSWER", "correct"]),
            ],
            prompts,
        );

        let outcome = echo_interpreter()
            .run(&program, seed(json!({"answerKey": 4})))
            .await;
        assert!(outcome.succeeded(), "{:?}", outcome.error);
        assert_eq!(outcome.raw_text.as_deref(), Some("ANSWER: 4"));
        assert_eq!(
            outcome.output_rows[0],
            seed(json!({"parsed.ANSWER": "4", "correct": true}))
        );
    }

    struct FailingProvider;

    #[async_trait]
    impl PromptExecutor for FailingProvider {
        async fn execute(&self, _request: &PromptRequest) -> Result<PromptResponse, ProviderError> {
            Err(ProviderError::timeout("upstream took too long"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    /// Answers "yes"/"no" alternately, whatever the prompt says
    struct Alternating(Mutex<bool>);

    impl ResponseParser for Alternating {
        fn parse(
            &self,
            _raw_text: &str,
            _config: &ParserConfig,
        ) -> Result<Map<String, Value>, ParseError> {
            let mut yes = self.0.lock().unwrap();
            *yes = !*yes;
            Ok(seed(json!({"VERDICT": if *yes { "yes" } else { "no" }})))
        }
    }

    /// Reads `ANSWER: <x>` back from the echo, garbling every second answer
    struct AlternatingAnswer(Mutex<bool>);

    impl ResponseParser for AlternatingAnswer {
        fn parse(
            &self,
            raw_text: &str,
            _config: &ParserConfig,
        ) -> Result<Map<String, Value>, ParseError> {
            let mut garble = self.0.lock().unwrap();
            let answer = raw_text.trim_start_matches("ANSWER: ");
            let answer = if *garble { "wrong" } else { answer };
            *garble = !*garble;
            Ok(seed(json!({ "ANSWER": answer })))
        }
    }

    #[tokio::test]
    async fn test_grading_loop_over_rows_counts_correct_and_incorrect() {
        let mut prompts = HashMap::new();
        prompts.insert(
            "ask".to_string(),
            PromptDefinition {
                template: "ANSWER: {{ row.answerKey }}".into(),
                ..Default::default()
            },
        );
        let program = compile(
            vec![
                set("correct", "0"),
                set("incorrect", "0"),
                Step::ForEach {
                    var: "row".into(),
                    collection: "rows".into(),
                },
                Step::Prompt {
                    prompt: "ask".into(),
                },
                Step::If {
                    condition: "parsed.ANSWER == row.answerKey".into(),
                },
                set("correct", "correct + 1"),
                Step::Else,
                set("incorrect", "incorrect + 1"),
                Step::EndIf,
                Step::EndForEach,
                output(&["correct", "incorrect"]),
            ],
            prompts,
        );
        let interpreter = Interpreter::new(
            Arc::new(TemplateEngine::new()),
            Arc::new(EchoProvider),
            Arc::new(AlternatingAnswer(Mutex::new(false))),
        );

        let rows: Vec<Value> = (0..10).map(|i| json!({ "answerKey": i })).collect();
        let outcome = interpreter
            .run(&program, seed(json!({ "rows": rows })))
            .await;

        assert!(outcome.succeeded(), "{:?}", outcome.error);
        assert_eq!(
            outcome.output_rows,
            vec![seed(json!({"correct": 5, "incorrect": 5}))]
        );
        assert_eq!(outcome.raw_text.as_deref(), Some("ANSWER: 9"));
    }

    fn ask_prompt() -> HashMap<String, PromptDefinition> {
        let mut prompts = HashMap::new();
        prompts.insert(
            "ask".to_string(),
            PromptDefinition {
                template: "Is {{ item }} interesting?".into(),
                ..Default::default()
            },
        );
        prompts
    }

    #[tokio::test]
    async fn test_provider_error_is_fatal_and_verbatim() {
        let program = compile(
            vec![
                set("item", "1"),
                Step::Prompt {
                    prompt: "ask".into(),
                },
                output(&["item"]),
            ],
            ask_prompt(),
        );
        let interpreter = Interpreter::new(
            Arc::new(TemplateEngine::new()),
            Arc::new(FailingProvider),
            Arc::new(StructuredParser),
        );

        let outcome = interpreter.run(&program, Map::new()).await;
        assert!(outcome.output_rows.is_empty());
        let error = outcome.error.unwrap();
        assert_eq!(error.category, ErrorCategory::Provider);
        assert_eq!(error.step, Some(1));
        assert!(error.message.contains("upstream took too long"));
    }

    #[tokio::test]
    async fn test_template_error_names_prompt() {
        let program = compile(
            vec![Step::Prompt {
                prompt: "ask".into(),
            }],
            ask_prompt(),
        );

        let outcome = echo_interpreter().run(&program, Map::new()).await;
        let error = outcome.error.unwrap();
        assert_eq!(error.category, ErrorCategory::Template);
        assert!(error.message.contains("ask:"));
    }

    #[tokio::test]
    async fn test_per_iteration_prompt_with_counters() {
        let program = compile(
            vec![
                set("yes", "0"),
                set("no", "0"),
                Step::ForEach {
                    var: "item".into(),
                    collection: "rows".into(),
                },
                Step::Prompt {
                    prompt: "ask".into(),
                },
                Step::If {
                    condition: "parsed.VERDICT == \"yes\"".into(),
                },
                set("yes", "yes + 1"),
                Step::Else,
                set("no", "no + 1"),
                Step::EndIf,
                Step::EndForEach,
                output(&["yes", "no"]),
            ],
            ask_prompt(),
        );
        let interpreter = Interpreter::new(
            Arc::new(TemplateEngine::new()),
            Arc::new(EchoProvider),
            Arc::new(Alternating(Mutex::new(false))),
        );

        let rows: Vec<Value> = (0..10).map(|i| json!(i)).collect();
        let outcome = interpreter
            .run(&program, seed(json!({ "rows": rows })))
            .await;

        assert!(outcome.succeeded(), "{:?}", outcome.error);
        assert_eq!(outcome.output_rows, vec![seed(json!({"yes": 5, "no": 5}))]);
        assert_eq!(outcome.raw_text.as_deref(), Some("Is 9 interesting?"));
    }
}
