//! Tree-walking evaluator.

use std::{
    collections::HashMap,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use futures::{FutureExt, future::BoxFuture};
use scriptbridge_core::{HostFunctions, Interpreter, ScriptError};

use crate::{
    ast::{BinaryOp, Expr, LogicalOp, Stmt, UnaryOp},
    parser::parse,
    value::Value,
};

/// Loop iterations between cooperative yields.
const YIELD_EVERY: u32 = 1024;

/// Deepest evaluation the walker allows before failing the run.
const MAX_DEPTH: usize = 2 * crate::parser::MAX_NESTING;

type EvalResult<T> = Result<T, ScriptError>;

fn runtime_error(line: usize, message: impl std::fmt::Display) -> ScriptError {
    ScriptError::runtime(format!("[line {line}] Runtime error: {message}"))
}

/// Reference interpreter.
///
/// Each `execute` call parses the source and evaluates it with a fresh
/// global scope.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeWalker;

impl TreeWalker {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Interpreter for TreeWalker {
    async fn execute(&self, source: &str, host: &dyn HostFunctions) -> Result<(), ScriptError> {
        let program = parse(source)?;
        tracing::debug!(statements = program.len(), "Parsed script");

        let mut eval = Evaluation::new(host);
        for stmt in &program {
            eval.exec(stmt).await?;
        }
        Ok(())
    }
}

/// Lexical scopes, innermost last.
struct Environment {
    scopes: Vec<HashMap<String, Value>>,
}

impl Environment {
    fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    fn define(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn assign(&mut self, name: &str, value: Value) -> bool {
        match self.scopes.iter_mut().rev().find_map(|scope| scope.get_mut(name)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

struct Evaluation<'h> {
    host: &'h dyn HostFunctions,
    env: Environment,
    iterations: u32,
    depth: usize,
    max_depth: usize,
    /// Line of the last located node, for errors raised without one.
    line: usize,
}

impl<'h> Evaluation<'h> {
    fn new(host: &'h dyn HostFunctions) -> Self {
        Self {
            host,
            env: Environment::new(),
            iterations: 0,
            depth: 0,
            max_depth: MAX_DEPTH,
            line: 1,
        }
    }

    fn descend(&mut self) -> EvalResult<()> {
        if self.depth >= self.max_depth {
            return Err(runtime_error(self.line, "Too much nesting."));
        }
        self.depth += 1;
        Ok(())
    }

    fn exec<'a>(&'a mut self, stmt: &'a Stmt) -> BoxFuture<'a, EvalResult<()>> {
        async move {
            self.descend()?;
            let result = self.exec_node(stmt).await;
            self.depth -= 1;
            result
        }
        .boxed()
    }

    async fn exec_node(&mut self, stmt: &Stmt) -> EvalResult<()> {
        match stmt {
            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.eval(expr).await?,
                    None => Value::Nil,
                };
                self.env.define(name, value);
            }
            Stmt::Expression(expr) => {
                self.eval(expr).await?;
            }
            Stmt::Block(statements) => {
                self.env.push();
                let result = self.exec_all(statements).await;
                self.env.pop();
                result?;
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval(condition).await?.is_truthy() {
                    self.exec(then_branch).await?;
                } else if let Some(else_branch) = else_branch {
                    self.exec(else_branch).await?;
                }
            }
            Stmt::While { condition, body } => {
                while self.eval(condition).await?.is_truthy() {
                    self.exec(body).await?;
                    self.tick().await;
                }
            }
        }
        Ok(())
    }

    async fn exec_all(&mut self, statements: &[Stmt]) -> EvalResult<()> {
        for stmt in statements {
            self.exec(stmt).await?;
        }
        Ok(())
    }

    /// Let the execution context process messages during long loops.
    async fn tick(&mut self) {
        self.iterations = self.iterations.wrapping_add(1);
        if self.iterations % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
    }

    fn eval<'a>(&'a mut self, expr: &'a Expr) -> BoxFuture<'a, EvalResult<Value>> {
        async move {
            self.descend()?;
            let result = self.eval_node(expr).await;
            self.depth -= 1;
            result
        }
        .boxed()
    }

    async fn eval_node(&mut self, expr: &Expr) -> EvalResult<Value> {
        if let Some(line) = expr.line() {
            self.line = line;
        }
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Variable { name, line } => self
                .env
                .get(name)
                .cloned()
                .ok_or_else(|| runtime_error(*line, format!("Undefined variable '{name}'."))),
            Expr::Assign { name, value, line } => {
                let value = self.eval(value).await?;
                if self.env.assign(name, value.clone()) {
                    Ok(value)
                } else {
                    Err(runtime_error(*line, format!("Undefined variable '{name}'.")))
                }
            }
            Expr::Unary { op, operand, line } => {
                let operand = self.eval(operand).await?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
                    UnaryOp::Negate => match operand {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        _ => Err(runtime_error(*line, "Operand must be a number.")),
                    },
                }
            }
            Expr::Binary {
                left,
                op,
                right,
                line,
            } => {
                let left = self.eval(left).await?;
                let right = self.eval(right).await?;
                binary(*op, left, right, *line)
            }
            Expr::Logical { left, op, right } => {
                let left = self.eval(left).await?;
                let short_circuit = match op {
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::And => !left.is_truthy(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right).await
                }
            }
            Expr::Call { callee, args, line } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg).await?);
                }
                self.call(callee, values, *line).await
            }
        }
    }

    async fn call(&mut self, callee: &str, args: Vec<Value>, line: usize) -> EvalResult<Value> {
        let arity = match callee {
            "end" | "clock" => 0,
            "print" | "println" | "read" | "readAsync" | "tostring" | "tonumber" | "strlen"
            | "error" => 1,
            _ => return Err(runtime_error(line, format!("Undefined function '{callee}'."))),
        };
        if args.len() != arity {
            return Err(runtime_error(
                line,
                format!("{callee}() expected {arity} arguments but got {}.", args.len()),
            ));
        }

        let mut args = args.into_iter();
        let mut arg = || args.next().unwrap_or(Value::Nil);

        match callee {
            "print" => {
                self.host.print(&arg().to_string());
                Ok(Value::Nil)
            }
            "println" => {
                self.host.println(&arg().to_string());
                Ok(Value::Nil)
            }
            "read" => Ok(Value::Str(self.host.read(&arg().to_string()).await)),
            "readAsync" => Ok(Value::Str(self.host.read_async(&arg().to_string()).await)),
            "end" => {
                self.host.end();
                Ok(Value::Nil)
            }
            "tostring" => Ok(Value::Str(arg().to_string())),
            "tonumber" => Ok(match arg() {
                Value::Number(n) => Value::Number(n),
                Value::Str(s) => s.trim().parse().map_or(Value::Nil, Value::Number),
                _ => Value::Nil,
            }),
            "strlen" => match arg() {
                #[allow(clippy::cast_precision_loss)]
                Value::Str(s) => Ok(Value::Number(s.chars().count() as f64)),
                other => Err(runtime_error(
                    line,
                    format!("strlen() expects a string, got {}.", other.type_name()),
                )),
            },
            "clock" => {
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs_f64() * 1000.0)
                    .unwrap_or_default();
                Ok(Value::Number(millis))
            }
            "error" => Err(runtime_error(line, arg())),
            _ => Err(runtime_error(line, format!("Undefined function '{callee}'."))),
        }
    }
}

fn binary(op: BinaryOp, left: Value, right: Value, line: usize) -> EvalResult<Value> {
    use Value::{Bool, Number, Str};

    let value = match (op, left, right) {
        (BinaryOp::Equal, l, r) => Bool(l == r),
        (BinaryOp::NotEqual, l, r) => Bool(l != r),
        (BinaryOp::Add, Number(l), Number(r)) => Number(l + r),
        (BinaryOp::Add, l @ Str(_), r) | (BinaryOp::Add, l, r @ Str(_)) => Str(format!("{l}{r}")),
        (BinaryOp::Add, ..) => {
            return Err(runtime_error(
                line,
                "Operands must be two numbers or include a string.",
            ));
        }
        (BinaryOp::Subtract, Number(l), Number(r)) => Number(l - r),
        (BinaryOp::Multiply, Number(l), Number(r)) => Number(l * r),
        (BinaryOp::Divide, Number(l), Number(r)) => Number(l / r),
        (BinaryOp::Less, Number(l), Number(r)) => Bool(l < r),
        (BinaryOp::LessEqual, Number(l), Number(r)) => Bool(l <= r),
        (BinaryOp::Greater, Number(l), Number(r)) => Bool(l > r),
        (BinaryOp::GreaterEqual, Number(l), Number(r)) => Bool(l >= r),
        _ => return Err(runtime_error(line, "Operands must be numbers.")),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicBool, Ordering},
        },
    };

    use scriptbridge_core::ErrorKind;

    use super::*;

    #[derive(Default)]
    struct RecordingHost {
        output: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
        answers: Mutex<VecDeque<String>>,
        ended: AtomicBool,
    }

    impl RecordingHost {
        fn answering(answers: &[&str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().map(ToString::to_string).collect()),
                ..Self::default()
            }
        }

        fn output(&self) -> Vec<String> {
            self.output.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HostFunctions for RecordingHost {
        fn print(&self, text: &str) {
            self.output.lock().unwrap().push(text.to_string());
        }

        fn println(&self, text: &str) {
            self.output.lock().unwrap().push(format!("{text}\n"));
        }

        async fn read(&self, prompt: &str) -> String {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.answers.lock().unwrap().pop_front().unwrap_or_default()
        }

        fn end(&self) {
            self.ended.store(true, Ordering::SeqCst);
        }
    }

    async fn run(source: &str, host: &RecordingHost) -> Result<(), ScriptError> {
        TreeWalker::new().execute(source, host).await
    }

    #[tokio::test]
    async fn test_print_emits_one_chunk() {
        let host = RecordingHost::default();
        run("print(\"hi\");", &host).await.unwrap();
        assert_eq!(host.output(), vec!["hi"]);
    }

    #[tokio::test]
    async fn test_read_async_feeds_variable() {
        let host = RecordingHost::answering(&["Ada"]);
        run("var x = readAsync(\"name?\"); print(x);", &host).await.unwrap();
        assert_eq!(*host.prompts.lock().unwrap(), vec!["name?"]);
        assert_eq!(host.output(), vec!["Ada"]);
    }

    #[tokio::test]
    async fn test_arithmetic_and_concatenation() {
        let host = RecordingHost::default();
        run(
            "println(1 + 2 * 3); println(\"n=\" + 4 / 2); println(-(1 - 3)); println(!nil);",
            &host,
        )
        .await
        .unwrap();
        assert_eq!(host.output(), vec!["7\n", "n=2\n", "2\n", "true\n"]);
    }

    #[tokio::test]
    async fn test_scopes_and_loops() {
        let host = RecordingHost::default();
        let source = r#"
            var total = 0;
            var i = 1;
            while (i <= 4) {
                var doubled = i * 2;
                total = total + doubled;
                i = i + 1;
            }
            if (total == 20 and i > 4) print("ok"); else print("bad");
            print(doubled);
        "#;
        let err = run(source, &host).await.unwrap_err();
        assert_eq!(host.output(), vec!["ok"]);
        assert_eq!(err.kind, ErrorKind::Runtime);
        assert_eq!(err.message, "[line 10] Runtime error: Undefined variable 'doubled'.");
    }

    #[tokio::test]
    async fn test_logical_short_circuit() {
        let host = RecordingHost::default();
        run("var a = nil or \"x\"; print(a); false and undefined();", &host)
            .await
            .unwrap();
        assert_eq!(host.output(), vec!["x"]);
    }

    #[tokio::test]
    async fn test_builtins() {
        let host = RecordingHost::default();
        run(
            "print(strlen(\"héllo\")); print(tonumber(\"2.5\") + 1); print(tonumber(\"x\")); print(tostring(3) + \"!\");",
            &host,
        )
        .await
        .unwrap();
        assert_eq!(host.output(), vec!["5", "3.5", "nil", "3!"]);
    }

    #[tokio::test]
    async fn test_end_calls_host() {
        let host = RecordingHost::default();
        run("print(\"a\"); end();", &host).await.unwrap();
        assert!(host.ended.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_runtime_errors() {
        let host = RecordingHost::default();

        let err = run("print(1 - \"a\");", &host).await.unwrap_err();
        assert_eq!(err.message, "[line 1] Runtime error: Operands must be numbers.");

        let err = run("\n\nnope();", &host).await.unwrap_err();
        assert_eq!(err.message, "[line 3] Runtime error: Undefined function 'nope'.");

        let err = run("print(1, 2);", &host).await.unwrap_err();
        assert!(err.message.contains("expected 1 arguments but got 2"));

        let err = run("error(\"boom\");", &host).await.unwrap_err();
        assert_eq!(err.message, "[line 1] Runtime error: boom");

        let err = run("true + 1;", &host).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime);
    }

    #[tokio::test]
    async fn test_syntax_error_runs_nothing() {
        let host = RecordingHost::default();
        let err = run("print(\"a\"); print(", &host).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(host.output().is_empty());
    }

    #[tokio::test]
    async fn test_evaluation_depth_is_bounded() {
        let host = RecordingHost::default();
        let program = parse("print(1);\nprint(-(-(-(-1))));").unwrap();

        let mut eval = Evaluation::new(&host);
        eval.max_depth = 4;
        eval.exec(&program[0]).await.unwrap();
        let err = eval.exec(&program[1]).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Runtime);
        assert_eq!(err.message, "[line 2] Runtime error: Too much nesting.");
        assert_eq!(host.output(), vec!["1"]);
        assert_eq!(eval.depth, 0);
    }

    #[tokio::test]
    async fn test_deepest_accepted_program_runs() {
        let host = RecordingHost::default();
        let depth = crate::parser::MAX_NESTING - 3;
        let source = format!("print({}1{});", "-(".repeat(depth / 2), ")".repeat(depth / 2));

        run(&source, &host).await.unwrap();
        let expected = if (depth / 2) % 2 == 0 { "1" } else { "-1" };
        assert_eq!(host.output(), vec![expected]);
    }
}
