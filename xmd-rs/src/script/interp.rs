//! Tree-walking evaluator.
//!
//! The [`Interpreter`] owns the global scope, the call-frame stack, the
//! function and class tables, and the output buffer.  Documents are rendered
//! by [`Interpreter::render`]; bare directive programs run through
//! [`Interpreter::exec_script`].
//!
//! Each directive is isolated: a non-fatal error inside one drops that
//! directive's output (or replaces it with an error marker), records a
//! diagnostic and lets the rest of the document render.  Only resource
//! exhaustion ([`EvalError::is_fatal`]) stops the render.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, warn};

use super::ast::{AssignOp, BinOp, ClassDef, FileOpKind, FunctionDef, Literal, Node, Target, UnaryOp};
use super::builtins::call_builtin;
use super::document::parse_document;
use super::flow::{Flow, FlowStatus, Signal};
use super::parser::{parse_expression, parse_program};
use super::scope::Scope;
use super::value::{Value, Variable, CLASS_KEY};
use crate::config::Config;
use crate::error::{EvalError, ParseError, XmdError};
use crate::module::{FsModuleResolver, ImportGraph, ModuleResolver};
use crate::platform::{DeniedFs, Filesystem, StdFs};
use crate::process::{CommandRunner, Sandbox, ShellRunner};
use crate::template::{is_path, substitute_with, VariableSource};

// ── Results ───────────────────────────────────────────────────────────────────

/// A problem found while rendering.  Rendering carried on past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl From<ParseError> for Diagnostic {
    fn from(e: ParseError) -> Self {
        Diagnostic { line: e.line, message: e.message }
    }
}

/// Output of [`Interpreter::render`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub output: String,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Interpreter ───────────────────────────────────────────────────────────────

struct Frame {
    locals: Scope,
    /// The instance a method was invoked on.
    this: Option<Value>,
}

pub struct Interpreter {
    globals: Scope,
    /// Call frames, innermost last.  Only the innermost frame is visible.
    frames: Vec<Frame>,
    functions: HashMap<String, Rc<FunctionDef>>,
    classes: HashMap<String, Rc<ClassDef>>,
    /// Rendered text so far.
    pub output: String,
    diagnostics: Vec<Diagnostic>,
    config: Rc<Config>,
    fs: Rc<dyn Filesystem>,
    runner: Rc<dyn CommandRunner>,
    resolver: Rc<dyn ModuleResolver>,
    imports: Rc<RefCell<ImportGraph>>,
    /// Active function, method and import nesting.
    depth: usize,
    /// Document being rendered, for resolving relative imports.
    current_file: Option<PathBuf>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// An interpreter wired to the real filesystem, shell and module
    /// resolver as `config` allows.
    pub fn with_config(config: Config) -> Self {
        let fs: Rc<dyn Filesystem> = match (&config.file_root, config.allow_file_access) {
            (_, false) => Rc::new(DeniedFs),
            (Some(root), true) => Rc::new(StdFs::rooted(root)),
            (None, true) => Rc::new(StdFs::new()),
        };
        let sandbox = Sandbox::new(config.enable_sandbox, config.exec_whitelist.clone());
        let resolver = FsModuleResolver::new(config.module_paths.clone());
        Interpreter {
            globals: Scope::new(),
            frames: Vec::new(),
            functions: HashMap::new(),
            classes: HashMap::new(),
            output: String::new(),
            diagnostics: Vec::new(),
            config: Rc::new(config),
            fs,
            runner: Rc::new(ShellRunner::new(sandbox)),
            resolver: Rc::new(resolver),
            imports: Rc::new(RefCell::new(ImportGraph::new())),
            depth: 0,
            current_file: None,
        }
    }

    pub fn with_filesystem(mut self, fs: impl Filesystem + 'static) -> Self {
        self.fs = Rc::new(fs);
        self
    }

    pub fn with_runner(mut self, runner: impl CommandRunner + 'static) -> Self {
        self.runner = Rc::new(runner);
        self
    }

    pub fn with_resolver(mut self, resolver: impl ModuleResolver + 'static) -> Self {
        self.resolver = Rc::new(resolver);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A child for rendering an imported module: same collaborators and
    /// import graph, fresh variables.
    fn child(&self, file: &Path) -> Self {
        Interpreter {
            globals: Scope::new(),
            frames: Vec::new(),
            functions: HashMap::new(),
            classes: HashMap::new(),
            output: String::new(),
            diagnostics: Vec::new(),
            config: Rc::clone(&self.config),
            fs: Rc::clone(&self.fs),
            runner: Rc::clone(&self.runner),
            resolver: Rc::clone(&self.resolver),
            imports: Rc::clone(&self.imports),
            depth: self.depth + 1,
            current_file: Some(file.to_path_buf()),
        }
    }

    // ── Variables ─────────────────────────────────────────────────────────────

    /// Set a global variable.
    pub fn set_global_var(&mut self, name: impl Into<String>, value: Value) {
        self.globals.set(name, value);
    }

    /// Get a global variable.
    pub fn get_global_var(&self, name: &str) -> Option<Value> {
        self.globals.lookup(name)
    }

    /// Look a name up in the innermost frame, then the globals.
    pub fn get_var(&self, name: &str) -> Option<Value> {
        self.frames
            .last()
            .and_then(|f| f.locals.lookup(name))
            .or_else(|| self.globals.lookup(name))
    }

    /// Bind in the current scope: the innermost frame, or the globals at top
    /// level.  Used for parameters and loop variables.
    fn set_current(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) => frame.locals.set(name, value),
            None => self.globals.set(name, value),
        }
    }

    /// Assignment: inside a function, an existing local wins, then an
    /// existing global; otherwise a new local is created.
    fn assign_var(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) if frame.locals.contains(name) || !self.globals.contains(name) => {
                frame.locals.set(name, value)
            }
            _ => self.globals.set(name, value),
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    // ── Entry points ──────────────────────────────────────────────────────────

    /// Run a directive program.  Errors propagate; the value of a top-level
    /// `return` is the result.
    pub fn exec_script(&mut self, src: &str) -> Result<Value, EvalError> {
        let program = parse_program(src);
        self.diagnostics.extend(program.diagnostics.into_iter().map(Diagnostic::from));
        let mut flow = Flow::new();
        self.exec_stmt(&program.body, &mut flow)?;
        Ok(if flow.status() == FlowStatus::Return { flow.take_return() } else { Value::Null })
    }

    /// Render a document, returning the output and everything that went
    /// wrong along the way.
    pub fn render(&mut self, src: &str) -> Result<Rendered, XmdError> {
        self.run_document(src)?;
        Ok(Rendered {
            output: std::mem::take(&mut self.output),
            diagnostics: std::mem::take(&mut self.diagnostics),
        })
    }

    /// Render a document file.  Imports inside it resolve relative to it.
    pub fn render_file(&mut self, path: &Path) -> Result<Rendered, XmdError> {
        let src = std::fs::read_to_string(path).map_err(|source| XmdError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.imports.borrow_mut().enter(&key).map_err(EvalError::from)?;
        self.current_file = Some(key);
        let result = self.render(&src);
        self.imports.borrow_mut().leave();
        result
    }

    fn run_document(&mut self, src: &str) -> Result<(), EvalError> {
        let doc = parse_document(src, self.config.trim_directive_lines);
        self.diagnostics.extend(doc.diagnostics.into_iter().map(Diagnostic::from));
        let mut flow = Flow::new();
        self.exec_stmt(&doc.body, &mut flow)
    }

    // ── Statements ────────────────────────────────────────────────────────────

    /// Append to the output, enforcing the size ceiling.
    fn emit(&mut self, text: &str) -> Result<(), EvalError> {
        let limit = self.config.max_output_size;
        if self.output.len() + text.len() > limit {
            warn!(limit, "output size limit reached");
            return Err(EvalError::OutputLimit(limit));
        }
        self.output.push_str(text);
        Ok(())
    }

    /// Execute a block, stopping early when a signal is pending.
    pub fn exec_block(&mut self, stmts: &[Node], flow: &mut Flow) -> Result<(), EvalError> {
        for stmt in stmts {
            self.exec_stmt(stmt, flow)?;
            if flow.is_interrupted() {
                break;
            }
        }
        Ok(())
    }

    /// Execute one statement.  A call, method call, file read or file list
    /// at statement level writes its non-null result to the output.
    pub fn exec_stmt(&mut self, node: &Node, flow: &mut Flow) -> Result<(), EvalError> {
        match node {
            Node::Block(stmts) => self.exec_block(stmts, flow),
            Node::Text(text) => {
                let text = self.interpolate(text);
                self.emit(&text)
            }
            Node::Directive { body, line, standalone } => {
                self.exec_directive(body, *line, *standalone, flow)
            }
            Node::Call { .. }
            | Node::MethodCall { .. }
            | Node::File { op: FileOpKind::Read | FileOpKind::List, .. } => {
                let value = self.eval(node, flow)?;
                if value.is_null() {
                    Ok(())
                } else {
                    self.emit(&value.to_string())
                }
            }
            _ => self.eval(node, flow).map(drop),
        }
    }

    fn exec_directive(
        &mut self,
        body: &Node,
        line: usize,
        standalone: bool,
        flow: &mut Flow,
    ) -> Result<(), EvalError> {
        let start = self.output.len();
        match self.exec_stmt(body, flow) {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(line, error = %e, "directive failed");
                self.output.truncate(start);
                if self.config.error_markers {
                    self.emit(&format!("<!-- xmd-error: {e} -->"))?;
                }
                self.diagnostics.push(Diagnostic { line, message: e.to_string() });
            }
        }
        if standalone && self.output.len() > start && !self.output.ends_with('\n') {
            self.emit("\n")?;
        }
        Ok(())
    }

    // ── Expressions ───────────────────────────────────────────────────────────

    pub fn eval(&mut self, node: &Node, flow: &mut Flow) -> Result<Value, EvalError> {
        match node {
            Node::Literal(lit) => Ok(match lit {
                Literal::Null => Value::Null,
                Literal::Boolean(b) => Value::Boolean(*b),
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::String(s.clone()),
            }),
            Node::Identifier(name) => Ok(self.get_var(name).unwrap_or_default()),
            Node::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, flow),
            Node::Unary { op, operand } => {
                let v = self.eval(operand, flow)?;
                match op {
                    UnaryOp::Not => Ok(Value::Boolean(!v.is_truthy())),
                    UnaryOp::Neg => v.to_number().map(|n| Value::Number(-n)).ok_or_else(|| {
                        EvalError::Type(format!("cannot negate {}", v.type_name()))
                    }),
                }
            }
            Node::Assign { target, op, value } => self.eval_assign(target, *op, value, flow),
            Node::Block(_) | Node::Text(_) | Node::Directive { .. } => {
                self.exec_stmt(node, flow).map(|()| Value::Null)
            }
            Node::Conditional { branches, otherwise } => {
                for (cond, body) in branches {
                    if self.eval(cond, flow)?.is_truthy() {
                        self.exec_stmt(body, flow)?;
                        return Ok(Value::Null);
                    }
                }
                if let Some(body) = otherwise {
                    self.exec_stmt(body, flow)?;
                }
                Ok(Value::Null)
            }
            Node::ForIn { var, iterable, body } => {
                let items = self.eval(iterable, flow)?.iter_items();
                flow.loop_depth += 1;
                let result = self.run_for(var, items, body, flow);
                flow.loop_depth -= 1;
                result.map(|()| Value::Null)
            }
            Node::While { cond, body } => {
                flow.loop_depth += 1;
                let result = self.run_while(cond, body, flow);
                flow.loop_depth -= 1;
                result.map(|()| Value::Null)
            }
            Node::Range { start, end } => {
                let start = self.eval_number(start, "..", flow)?;
                let end = self.eval_number(end, "..", flow)?;
                self.range(start, end)
            }
            Node::Break => {
                if flow.loop_depth == 0 {
                    return Err(EvalError::BreakOutsideLoop);
                }
                flow.raise(Signal::Break);
                Ok(Value::Null)
            }
            Node::Continue => {
                if flow.loop_depth == 0 {
                    return Err(EvalError::ContinueOutsideLoop);
                }
                flow.raise(Signal::Continue);
                Ok(Value::Null)
            }
            Node::Return(value) => {
                let v = match value {
                    Some(expr) => self.eval(expr, flow)?,
                    None => Value::Null,
                };
                flow.raise(Signal::Return(v));
                Ok(Value::Null)
            }
            Node::Function(def) => {
                debug!(name = %def.name, "defining function");
                self.functions.insert(def.name.clone(), Rc::new((**def).clone()));
                Ok(Value::Null)
            }
            Node::Class(def) => {
                debug!(name = %def.name, "defining class");
                self.classes.insert(def.name.clone(), Rc::new((**def).clone()));
                Ok(Value::Null)
            }
            Node::Call { name, args } => self.eval_call(name, args, flow),
            Node::MethodCall { object, method, args } => {
                self.eval_method_call(object, method, args, flow)
            }
            Node::Array(items) => {
                let values = self.eval_args(items, flow)?;
                Ok(Value::array(values))
            }
            Node::Object(pairs) => {
                let mut fields: Vec<(String, Value)> = Vec::with_capacity(pairs.len());
                for (key, expr) in pairs {
                    let v = self.eval(expr, flow)?;
                    match fields.iter_mut().find(|(k, _)| k == key) {
                        Some(slot) => slot.1 = v,
                        None => fields.push((key.clone(), v)),
                    }
                }
                Ok(Value::object(fields))
            }
            Node::Property { object, key } => Ok(self.eval(object, flow)?.property(key)),
            Node::Index { object, index } => {
                let object = self.eval(object, flow)?;
                let index = self.eval(index, flow)?;
                Ok(object.index(&index))
            }
            Node::File { op, path, content } => self.eval_file(*op, path, content.as_deref(), flow),
        }
    }

    fn eval_args(&mut self, args: &[Node], flow: &mut Flow) -> Result<Vec<Value>, EvalError> {
        args.iter().map(|a| self.eval(a, flow)).collect()
    }

    fn eval_number(&mut self, node: &Node, op: &str, flow: &mut Flow) -> Result<f64, EvalError> {
        let v = self.eval(node, flow)?;
        v.to_number()
            .ok_or_else(|| EvalError::Type(format!("'{op}' needs a number, got {}", v.type_name())))
    }

    fn eval_binary(&mut self, op: BinOp, lhs: &Node, rhs: &Node, flow: &mut Flow) -> Result<Value, EvalError> {
        match op {
            BinOp::And => {
                if !self.eval(lhs, flow)?.is_truthy() {
                    return Ok(Value::Boolean(false));
                }
                Ok(Value::Boolean(self.eval(rhs, flow)?.is_truthy()))
            }
            BinOp::Or => {
                if self.eval(lhs, flow)?.is_truthy() {
                    return Ok(Value::Boolean(true));
                }
                Ok(Value::Boolean(self.eval(rhs, flow)?.is_truthy()))
            }
            _ => {
                let l = self.eval(lhs, flow)?;
                let r = self.eval(rhs, flow)?;
                binary_op(op, &l, &r)
            }
        }
    }

    /// Inclusive numeric range, counting down when `end < start`.
    fn range(&self, start: f64, end: f64) -> Result<Value, EvalError> {
        let limit = self.config.max_loop_iterations;
        let count = (end - start).abs().floor();
        if !count.is_finite() || count >= limit as f64 {
            return Err(EvalError::IterationLimit(limit));
        }
        let step = if end < start { -1.0 } else { 1.0 };
        Ok(Value::array((0..=count as usize).map(|i| Value::Number(start + step * i as f64))))
    }

    fn run_for(&mut self, var: &str, items: Vec<Value>, body: &Node, flow: &mut Flow) -> Result<(), EvalError> {
        let limit = self.config.max_loop_iterations;
        for (i, item) in items.into_iter().enumerate() {
            if i >= limit {
                warn!(limit, "for loop hit the iteration limit");
                return Err(EvalError::IterationLimit(limit));
            }
            self.set_current(var, item);
            self.exec_stmt(body, flow)?;
            if loop_should_stop(flow) {
                break;
            }
        }
        Ok(())
    }

    fn run_while(&mut self, cond: &Node, body: &Node, flow: &mut Flow) -> Result<(), EvalError> {
        let limit = self.config.max_loop_iterations;
        let mut iterations = 0;
        while self.eval(cond, flow)?.is_truthy() {
            if iterations >= limit {
                warn!(limit, "while loop hit the iteration limit");
                return Err(EvalError::IterationLimit(limit));
            }
            iterations += 1;
            self.exec_stmt(body, flow)?;
            if loop_should_stop(flow) {
                break;
            }
        }
        Ok(())
    }

    // ── Assignment ────────────────────────────────────────────────────────────

    fn eval_assign(&mut self, target: &Target, op: AssignOp, value: &Node, flow: &mut Flow) -> Result<Value, EvalError> {
        let rhs = self.eval(value, flow)?;
        match target {
            Target::Name(name) => {
                let current = self.get_var(name).unwrap_or_default();
                let v = combine(op, &current, rhs)?;
                self.assign_var(name, v.clone());
                Ok(v)
            }
            Target::Property { object, key } => {
                let object = self.eval(object, flow)?;
                let v = combine(op, &object.property(key), rhs)?;
                set_field(&object, key, v.clone())?;
                Ok(v)
            }
            Target::Index { object, index } => {
                let object = self.eval(object, flow)?;
                let index = self.eval(index, flow)?;
                let v = combine(op, &object.index(&index), rhs)?;
                match (&object, index.to_number()) {
                    (Value::Array(_), Some(n)) if n >= 0.0 && n.fract() == 0.0 => {
                        set_field(&object, &format!("{}", n as usize), v.clone())?
                    }
                    (Value::Array(_), _) => {
                        return Err(EvalError::Type(format!("bad array index {index}")))
                    }
                    _ => set_field(&object, &index.to_string(), v.clone())?,
                }
                Ok(v)
            }
        }
    }

    // ── Calls ─────────────────────────────────────────────────────────────────

    fn eval_call(&mut self, name: &str, args: &[Node], flow: &mut Flow) -> Result<Value, EvalError> {
        match name {
            "print" => {
                let parts = self.eval_args(args, flow)?;
                let text: Vec<String> = parts.iter().map(Value::to_string).collect();
                let text = text.join(" ");
                let text = self.interpolate(&text);
                self.emit(&text)?;
                self.emit("\n")?;
                return Ok(Value::Null);
            }
            "exec" | "import" => {
                let argv = self.eval_args(args, flow)?;
                let [arg] = argv.as_slice() else {
                    return Err(EvalError::Arity { name: name.to_owned(), expected: 1, found: argv.len() });
                };
                let arg = arg.to_string();
                return if name == "exec" { self.exec_command(&arg) } else { self.import(&arg) };
            }
            _ => {}
        }

        let argv = self.eval_args(args, flow)?;
        if let Some(function) = self.functions.get(name).cloned() {
            return self.invoke(&function.name, &function.params, &function.body, argv, None);
        }
        if let Some(class) = self.classes.get(name).cloned() {
            return self.instantiate(&class, argv);
        }
        if argv.is_empty() {
            if let Some(v) = self.get_var(name) {
                return Ok(v);
            }
        }
        match call_builtin(name, &argv) {
            Some(result) => result,
            None => Err(EvalError::UndefinedFunction(name.to_owned())),
        }
    }

    /// Run a function or method body in a new frame.
    fn invoke(
        &mut self,
        name: &str,
        params: &[String],
        body: &Node,
        argv: Vec<Value>,
        this: Option<Value>,
    ) -> Result<Value, EvalError> {
        if argv.len() != params.len() {
            return Err(EvalError::Arity { name: name.to_owned(), expected: params.len(), found: argv.len() });
        }
        let limit = self.config.max_recursion_depth;
        if self.depth >= limit {
            warn!(limit, function = name, "call depth limit reached");
            return Err(EvalError::RecursionLimit(limit));
        }

        let mut locals = Scope::new();
        if let Some(this) = &this {
            locals.set("self", this.clone());
        }
        for (param, arg) in params.iter().zip(argv) {
            locals.set(param.as_str(), arg);
        }
        self.depth += 1;
        self.frames.push(Frame { locals, this });
        let mut flow = Flow::for_function(self.depth);
        let result = self.exec_stmt(body, &mut flow);
        self.frames.pop();
        self.depth -= 1;
        result?;
        Ok(if flow.status() == FlowStatus::Return { flow.take_return() } else { Value::Null })
    }

    /// Find `method` on `class` or its ancestors.
    fn find_method(&self, class: &str, method: &str) -> Option<(Rc<ClassDef>, usize)> {
        let mut current = self.classes.get(class).cloned();
        // Bounded walk: an `extends` cycle must not hang.
        for _ in 0..=self.classes.len() {
            let def = current?;
            if let Some(i) = def.methods.iter().position(|m| m.name == method) {
                return Some((def, i));
            }
            current = def.parent.as_ref().and_then(|p| self.classes.get(p).cloned());
        }
        None
    }

    fn instantiate(&mut self, class: &ClassDef, argv: Vec<Value>) -> Result<Value, EvalError> {
        let instance = Value::object([(CLASS_KEY, Value::str(class.name.as_str()))]);
        match self.find_method(&class.name, "constructor") {
            Some((owner, i)) => {
                let ctor = &owner.methods[i];
                let name = format!("{}.constructor", class.name);
                self.invoke(&name, &ctor.params, &ctor.body, argv, Some(instance.clone()))?;
            }
            None if !argv.is_empty() => {
                return Err(EvalError::Arity { name: class.name.clone(), expected: 0, found: argv.len() });
            }
            None => {}
        }
        Ok(instance)
    }

    /// True when `value` is the instance the current method runs on.
    fn is_current_self(&self, value: &Value) -> bool {
        self.frames
            .last()
            .and_then(|f| f.this.as_ref())
            .is_some_and(|this| this.equals(value))
    }

    fn eval_method_call(&mut self, object: &Node, method: &str, args: &[Node], flow: &mut Flow) -> Result<Value, EvalError> {
        let receiver = self.eval(object, flow)?;
        let argv = self.eval_args(args, flow)?;

        let class = receiver.class_name();
        if let Some(class) = &class {
            if let Some((owner, i)) = self.find_method(class, method) {
                let m = &owner.methods[i];
                if m.private && !self.is_current_self(&receiver) {
                    return Err(EvalError::PrivateMethod { class: class.clone(), method: method.to_owned() });
                }
                let name = format!("{class}.{method}");
                return self.invoke(&name, &m.params, &m.body, argv, Some(receiver));
            }
        }

        let class = class.unwrap_or_else(|| receiver.type_name().to_owned());
        let mut full = Vec::with_capacity(argv.len() + 1);
        full.push(receiver);
        full.extend(argv);
        match call_builtin(method, &full) {
            Some(result) => result,
            None => Err(EvalError::UnknownMethod { class, method: method.to_owned() }),
        }
    }

    // ── Collaborators ─────────────────────────────────────────────────────────

    fn eval_file(&mut self, op: FileOpKind, path: &Node, content: Option<&Node>, flow: &mut Flow) -> Result<Value, EvalError> {
        let path = self.eval(path, flow)?.to_string();
        let content = match content {
            Some(node) => Some(self.eval(node, flow)?.to_string()),
            None => None,
        };
        let file_err = |source| EvalError::File { op: op.name(), path: path.clone(), source };
        debug!(op = op.name(), path = %path, "file operation");
        match op {
            FileOpKind::Read => self.fs.read(&path).map(Value::String).map_err(file_err),
            FileOpKind::Write => {
                let content = content.unwrap_or_default();
                self.fs.write(&path, &content).map_err(file_err)?;
                Ok(Value::Boolean(true))
            }
            FileOpKind::Exists => Ok(Value::Boolean(self.fs.exists(&path))),
            FileOpKind::Delete => {
                self.fs.delete(&path).map_err(file_err)?;
                Ok(Value::Boolean(true))
            }
            FileOpKind::List => {
                let names = self.fs.list(&path).map_err(file_err)?;
                Ok(Value::array(names.into_iter().map(Value::String)))
            }
        }
    }

    /// Run a shell command; the result is its stdout without the trailing
    /// newline.
    fn exec_command(&mut self, command: &str) -> Result<Value, EvalError> {
        let out = self.runner.run(command, self.config.exec_timeout())?;
        if out.exit_code != Some(0) {
            warn!(command, exit_code = ?out.exit_code, stderr = %out.stderr.trim_end(), "command failed");
        }
        Ok(Value::String(out.stdout.trim_end_matches(['\n', '\r']).to_owned()))
    }

    /// Render a module and merge its variables, functions and classes into
    /// this interpreter.  The module's output is emitted here.
    fn import(&mut self, name: &str) -> Result<Value, EvalError> {
        let limit = self.config.max_recursion_depth;
        if self.depth >= limit {
            return Err(EvalError::RecursionLimit(limit));
        }
        let path = self.resolver.resolve(name, self.current_file.as_deref())?;
        self.imports.borrow_mut().enter(&path)?;
        let result = self.render_module(&path);
        self.imports.borrow_mut().leave();
        result.map(|()| Value::Null)
    }

    fn render_module(&mut self, path: &Path) -> Result<(), EvalError> {
        debug!(path = %path.display(), "importing module");
        let src = self.resolver.load(path)?;
        let mut child = self.child(path);
        child.run_document(&src)?;

        for (name, var) in child.globals.iter() {
            self.globals.bind(name, Variable::clone(var));
        }
        self.functions.extend(child.functions);
        self.classes.extend(child.classes);
        let module = path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        self.diagnostics.extend(child.diagnostics.into_iter().map(|d| Diagnostic {
            line: d.line,
            message: format!("{module}: {}", d.message),
        }));
        self.emit(&child.output)
    }
}

impl Interpreter {
    /// Substitute `{{…}}` references in literal text.  Paths are looked up;
    /// other bodies are evaluated as expressions.  Undefined paths and
    /// bodies that fail to parse or evaluate stay as written.
    pub fn interpolate(&mut self, text: &str) -> String {
        substitute_with(text, |body| self.reference(body)).into_owned()
    }

    fn reference(&mut self, body: &str) -> Option<String> {
        if is_path(body) {
            return self.lookup(body);
        }
        let node = parse_expression(body).ok()?;
        let mut flow = Flow::new();
        match self.eval(&node, &mut flow) {
            Ok(value) => Some(value.to_string()),
            Err(e) => {
                debug!(reference = body, error = %e, "reference left as written");
                None
            }
        }
    }
}

impl VariableSource for Interpreter {
    fn lookup(&self, path: &str) -> Option<String> {
        let mut keys = path.split('.');
        let mut value = self.get_var(keys.next()?)?;
        for key in keys {
            value = value.property(key);
            if value.is_null() {
                return None;
            }
        }
        Some(value.to_string())
    }
}

// ── Operators ─────────────────────────────────────────────────────────────────

/// After a loop body: consume `break`/`continue`, report whether to stop.
fn loop_should_stop(flow: &mut Flow) -> bool {
    match flow.status() {
        FlowStatus::Break => {
            flow.reset();
            true
        }
        FlowStatus::Continue => {
            flow.reset();
            false
        }
        FlowStatus::Return | FlowStatus::Error => true,
        FlowStatus::Normal => false,
    }
}

/// `=` keeps the new value; `+=` adds it to the current one (an unset
/// target counts as empty).
fn combine(op: AssignOp, current: &Value, rhs: Value) -> Result<Value, EvalError> {
    match op {
        AssignOp::Set => Ok(rhs),
        AssignOp::Add if current.is_null() => Ok(rhs),
        AssignOp::Add => binary_op(BinOp::Add, current, &rhs),
    }
}

/// Store `value` under `key` in an object, or at a numeric key in an array
/// (one past the end appends).
fn set_field(target: &Value, key: &str, value: Value) -> Result<(), EvalError> {
    match target {
        Value::Object(fields) => {
            let mut fields = fields.borrow_mut();
            match fields.iter().find(|(k, _)| k == key) {
                Some((_, var)) => var.set(value),
                None => fields.push((key.to_owned(), Variable::new(value))),
            }
            Ok(())
        }
        Value::Array(items) => {
            let i: usize = key
                .parse()
                .map_err(|_| EvalError::Type(format!("bad array index '{key}'")))?;
            let mut items = items.borrow_mut();
            match i.cmp(&items.len()) {
                std::cmp::Ordering::Less => items[i].set(value),
                std::cmp::Ordering::Equal => items.push(Variable::new(value)),
                std::cmp::Ordering::Greater => {
                    return Err(EvalError::Type(format!("array index {i} out of range")))
                }
            }
            Ok(())
        }
        other => Err(EvalError::NotAssignable(other.type_name())),
    }
}

/// Evaluate a binary operator on two values.  `&&` and `||` short-circuit in
/// the evaluator and are only handled here for completeness.
pub fn binary_op(op: BinOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    let mismatch = || EvalError::TypeMismatch {
        op: op.symbol().to_owned(),
        left: l.type_name(),
        right: r.type_name(),
    };
    let numbers = || match (l.to_number(), r.to_number()) {
        (Some(a), Some(b)) if !matches!(l, Value::Null) && !matches!(r, Value::Null) => Ok((a, b)),
        _ => Err(mismatch()),
    };
    Ok(match op {
        BinOp::Add => match (l, r) {
            (Value::String(_), _) | (_, Value::String(_)) => Value::String(format!("{l}{r}")),
            (Value::Array(a), Value::Array(b)) => {
                let items: Vec<Value> = a.borrow().iter().chain(b.borrow().iter()).map(Variable::get).collect();
                Value::array(items)
            }
            _ => {
                let (a, b) = numbers()?;
                Value::Number(a + b)
            }
        },
        BinOp::Sub => numbers().map(|(a, b)| Value::Number(a - b))?,
        BinOp::Mul => numbers().map(|(a, b)| Value::Number(a * b))?,
        BinOp::Div => numbers().map(|(a, b)| Value::Number(a / b))?,
        BinOp::Rem => numbers().map(|(a, b)| Value::Number(a % b))?,
        BinOp::Eq => Value::Boolean(l.equals(r)),
        BinOp::Ne => Value::Boolean(!l.equals(r)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = match (l, r) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => {
                    let (a, b) = numbers()?;
                    a.partial_cmp(&b)
                }
            };
            let Some(ord) = ord else { return Ok(Value::Boolean(false)) };
            Value::Boolean(match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            })
        }
        BinOp::And => Value::Boolean(l.is_truthy() && r.is_truthy()),
        BinOp::Or => Value::Boolean(l.is_truthy() || r.is_truthy()),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io;
    use std::time::Duration;

    use super::*;
    use crate::process::{CommandOutput, ExecError};

    fn run(src: &str) -> Interpreter {
        let mut interp = Interpreter::new();
        interp.exec_script(src).expect("script failed");
        interp
    }

    fn output(src: &str) -> String {
        run(src).output
    }

    fn render(src: &str) -> Rendered {
        Interpreter::new().render(src).expect("render failed")
    }

    fn limited(f: impl FnOnce(&mut Config)) -> Interpreter {
        let mut config = Config::default();
        f(&mut config);
        Interpreter::with_config(config)
    }

    #[derive(Default)]
    struct MemFs(RefCell<BTreeMap<String, String>>);

    impl Filesystem for MemFs {
        fn read(&self, path: &str) -> io::Result<String> {
            self.0.borrow().get(path).cloned().ok_or_else(|| io::ErrorKind::NotFound.into())
        }
        fn write(&self, path: &str, contents: &str) -> io::Result<()> {
            self.0.borrow_mut().insert(path.to_owned(), contents.to_owned());
            Ok(())
        }
        fn exists(&self, path: &str) -> bool {
            self.0.borrow().contains_key(path)
        }
        fn list(&self, _path: &str) -> io::Result<Vec<String>> {
            Ok(self.0.borrow().keys().cloned().collect())
        }
        fn delete(&self, path: &str) -> io::Result<()> {
            self.0.borrow_mut().remove(path).map(drop).ok_or_else(|| io::ErrorKind::NotFound.into())
        }
    }

    struct EchoRunner;

    impl CommandRunner for EchoRunner {
        fn run(&self, command: &str, _timeout: Duration) -> Result<CommandOutput, ExecError> {
            Ok(CommandOutput { stdout: format!("ran: {command}\n"), stderr: String::new(), exit_code: Some(0) })
        }
    }

    // ── Scripts ───────────────────────────────────────────────────────────────

    #[test]
    fn multi_assignment() {
        let interp = run("set x 10, y 20, z 30");
        assert_eq!(interp.get_global_var("x"), Some(Value::Number(10.0)));
        assert_eq!(interp.get_global_var("y"), Some(Value::Number(20.0)));
        assert_eq!(interp.get_global_var("z"), Some(Value::Number(30.0)));
    }

    #[test]
    fn print_concatenates() {
        assert_eq!(output("print \"a\" + 1"), "a1\n");
        assert_eq!(output("set n 2\nprint n * 3 + 1"), "7\n");
    }

    #[test]
    fn print_interpolates() {
        assert_eq!(output("set who \"Ann\"\nprint \"Hi {{who}}\""), "Hi Ann\n");
    }

    #[test]
    fn for_with_break() {
        assert_eq!(output("for i in 1 2 3\n    if i == 2 then break\n    print i"), "1\n");
    }

    #[test]
    fn for_over_range() {
        assert_eq!(output("for i in 1 .. 3\n  print i"), "1\n2\n3\n");
        assert_eq!(output("for i in 3 .. 1\n  print i"), "3\n2\n1\n");
    }

    #[test]
    fn for_over_object_keys() {
        assert_eq!(output("set o {b: 1, a: 2}\nfor k in o\n  print k"), "b\na\n");
    }

    #[test]
    fn while_with_continue() {
        let src = "set i 0\nwhile i < 5\n  i += 1\n  if i % 2 == 0 then continue\n  print i";
        assert_eq!(output(src), "1\n3\n5\n");
    }

    #[test]
    fn loop_limit() {
        let mut interp = limited(|c| c.max_loop_iterations = 5);
        let err = interp.exec_script("set i 0\nwhile true\n  i += 1").unwrap_err();
        assert!(matches!(err, EvalError::IterationLimit(5)));
        assert_eq!(interp.get_global_var("i"), Some(Value::Number(5.0)));
    }

    #[test]
    fn break_outside_loop() {
        let err = Interpreter::new().exec_script("break").unwrap_err();
        assert!(matches!(err, EvalError::BreakOutsideLoop));
    }

    #[test]
    fn functions_and_shell_style_calls() {
        assert_eq!(output("function add a b\n  return a + b\nprint add(2, 3)"), "5\n");
        assert_eq!(output("function add a b\n  return a + b\nadd 5 3"), "8");
    }

    #[test]
    fn arity_is_exact() {
        let err = Interpreter::new().exec_script("function f a\n  return a\nf(1, 2)").unwrap_err();
        assert!(matches!(err, EvalError::Arity { expected: 1, found: 2, .. }));
    }

    #[test]
    fn recursion() {
        let src = "function fact n\n  if n <= 1 then return 1\n  return n * fact(n - 1)\nprint fact(5)";
        assert_eq!(output(src), "120\n");
    }

    #[test]
    fn recursion_limit() {
        let mut interp = limited(|c| c.max_recursion_depth = 10);
        let err = interp.exec_script("function f n\n  return f(n)\nf(1)").unwrap_err();
        assert!(matches!(err, EvalError::RecursionLimit(10)));
    }

    #[test]
    fn assignment_scoping() {
        let interp = run("set count 0\nfunction bump\n  count = count + 1\nbump()\nbump()");
        assert_eq!(interp.get_global_var("count"), Some(Value::Number(2.0)));

        let interp = run("function f\n  tmp = 1\nf()");
        assert_eq!(interp.get_global_var("tmp"), None);
    }

    #[test]
    fn top_level_return_value() {
        let mut interp = Interpreter::new();
        assert_eq!(interp.exec_script("set x 4\nreturn x * 2\nprint x").unwrap(), Value::Number(8.0));
        assert_eq!(interp.output, "");
    }

    #[test]
    fn classes_and_inheritance() {
        let src = "class Animal
  constructor name
    self.name = name
  speak
    return self.name + \" makes a sound\"
class Dog extends Animal
  speak
    return self.name + \" barks\"
set a Animal(\"Cat\")
set d Dog(\"Rex\")
print a.speak()
print d.speak()";
        assert_eq!(output(src), "Cat makes a sound\nRex barks\n");
    }

    #[test]
    fn private_methods() {
        let src = "class Safe\n  private secret\n    return 42\n  reveal\n    return self.secret()\nset s Safe()";
        assert_eq!(output(&format!("{src}\nprint s.reveal()")), "42\n");

        let err = Interpreter::new().exec_script(&format!("{src}\ns.secret()")).unwrap_err();
        assert!(matches!(err, EvalError::PrivateMethod { .. }));
    }

    #[test]
    fn builtins_as_methods() {
        assert_eq!(output("print \"hi\".upper()"), "HI\n");
        assert_eq!(output("set xs [3, 1, 2]\nprint xs.sort().join(\"-\")"), "1-2-3\n");
    }

    #[test]
    fn property_and_index_assignment() {
        let src = "set o {a: 1}\no.b = 2\nset arr [1, 2]\narr[2] = 3\narr[0] += 10\nprint o\nprint arr";
        assert_eq!(output(src), "{a: 1, b: 2}\n[11, 2, 3]\n");
    }

    #[test]
    fn containers_compare_by_identity() {
        let interp = run("set a [1, 2]\nset b [1, 2]\nset c a\nset same a == c\nset diff a == b");
        assert_eq!(interp.get_global_var("same"), Some(Value::Boolean(true)));
        assert_eq!(interp.get_global_var("diff"), Some(Value::Boolean(false)));
    }

    #[test]
    fn arithmetic_type_errors() {
        let err = Interpreter::new().exec_script("x = [1] * 2").unwrap_err();
        assert!(matches!(err, EvalError::TypeMismatch { .. }));
    }

    #[test]
    fn file_operations() {
        let mut interp = Interpreter::new().with_filesystem(MemFs::default());
        interp
            .exec_script("File.write \"notes.txt\" \"hello\"\nFile.read \"notes.txt\"\nset ok File.exists(\"notes.txt\")")
            .unwrap();
        assert_eq!(interp.output, "hello");
        assert_eq!(interp.get_global_var("ok"), Some(Value::Boolean(true)));

        let err = interp.exec_script("File.read \"missing.txt\"").unwrap_err();
        assert!(matches!(err, EvalError::File { op: "read", .. }));
    }

    #[test]
    fn file_access_can_be_disabled() {
        let mut interp = limited(|c| c.allow_file_access = false);
        assert!(interp.exec_script("File.read \"Cargo.toml\"").is_err());
    }

    #[test]
    fn exec_uses_runner() {
        let mut interp = Interpreter::new().with_runner(EchoRunner);
        interp.exec_script("exec echo hi\nset r exec(\"date\")").unwrap();
        assert_eq!(interp.output, "ran: echo hi");
        assert_eq!(interp.get_global_var("r"), Some(Value::str("ran: date")));
    }

    #[test]
    fn binary_op_table() {
        let n = Value::Number;
        assert_eq!(binary_op(BinOp::Add, &Value::str("a"), &n(1.0)).unwrap(), Value::str("a1"));
        assert_eq!(binary_op(BinOp::Div, &n(1.0), &n(0.0)).unwrap(), n(f64::INFINITY));
        assert_eq!(binary_op(BinOp::Lt, &Value::str("a"), &Value::str("b")).unwrap(), Value::Boolean(true));
        assert_eq!(binary_op(BinOp::Ge, &n(2.0), &n(2.0)).unwrap(), Value::Boolean(true));
        assert_eq!(binary_op(BinOp::Eq, &n(1.0), &Value::str("1")).unwrap(), Value::Boolean(false));
        assert!(binary_op(BinOp::Sub, &Value::Null, &n(1.0)).is_err());
    }

    // ── Documents ─────────────────────────────────────────────────────────────

    #[test]
    fn set_and_interpolate() {
        let r = render("<!-- xmd:set name \"World\" -->\nHello {{name}}!");
        assert_eq!(r.output, "Hello World!");
        assert!(r.diagnostics.is_empty());
    }

    #[test]
    fn undefined_references_are_kept() {
        assert_eq!(render("Hi {{nobody}}").output, "Hi {{nobody}}");
    }

    #[test]
    fn expression_references() {
        let r = render("<!-- xmd:set a 2, name \"ann\" -->{{a + 1}} {{upper(name)}} {{ \"x\" + a }}");
        assert_eq!(r.output, "3 ANN x2");
        assert!(r.diagnostics.is_empty());
        assert_eq!(output("set a 4\nprint \"{{a * 2}}\""), "8\n");
    }

    #[test]
    fn failed_expression_references_are_kept() {
        let src = "{{a + 1}} {{nope(1)}} {{1 +}} {{ {} }}";
        let r = render(src);
        assert_eq!(r.output, src);
        assert!(r.diagnostics.is_empty());
    }

    #[test]
    fn deeply_nested_expressions_do_not_abort() {
        let deep = format!("{}1{}", "(".repeat(5000), ")".repeat(5000));
        let r = render(&format!("<!-- xmd:set x {deep} -->ok {{{{{deep}}}}}"));
        assert_eq!(r.output, format!("ok {{{{{deep}}}}}"));
    }

    #[test]
    fn standalone_call_gets_a_newline() {
        assert_eq!(render("<!-- xmd:upper \"hi\" -->").output, "HI\n");
    }

    #[test]
    fn inline_directives() {
        let r = render("<!-- xmd:set name \"john\" -->\nName: xmd:upper(name)!");
        assert_eq!(r.output, "Name: JOHN!");
        assert_eq!(render("<!-- xmd:set n \"Ann\" --><!-- xmd:n() -->").output, "Ann");
    }

    #[test]
    fn document_for_block() {
        let src = "<!-- xmd:for item in apple banana -->\n- {{item}}\n<!-- xmd:endfor -->\n";
        assert_eq!(render(src).output, "- apple\n- banana\n");
    }

    #[test]
    fn document_if_block() {
        let src = "<!-- xmd:set n 5 -->
<!-- xmd:if n > 10 -->
big
<!-- xmd:elif n > 3 -->
medium
<!-- xmd:else -->
small
<!-- xmd:endif -->
";
        assert_eq!(render(src).output, "medium\n");
    }

    #[test]
    fn errors_are_isolated() {
        let r = render("a <!-- xmd:nosuch(1) --> b");
        assert_eq!(r.output, "a  b");
        assert_eq!(r.diagnostics.len(), 1);
        assert!(r.diagnostics[0].message.contains("nosuch"));

        let mut interp = limited(|c| c.error_markers = true);
        let r = interp.render("a <!-- xmd:nosuch(1) --> b").unwrap();
        assert_eq!(r.output, "a <!-- xmd-error: undefined function 'nosuch' --> b");
    }

    #[test]
    fn break_outside_loop_is_a_diagnostic() {
        let r = render("x\n<!-- xmd:break -->\ny");
        assert_eq!(r.output, "x\ny");
        assert_eq!(r.diagnostics.len(), 1);
    }

    #[test]
    fn top_level_return_stops_the_document() {
        assert_eq!(render("before\n<!-- xmd:return -->\nafter").output, "before\n");
    }

    #[test]
    fn output_limit_is_fatal() {
        let mut interp = limited(|c| c.max_output_size = 10);
        let err = interp.render("<!-- xmd:for i in 1 .. 100\n  print i\n-->").unwrap_err();
        assert!(matches!(err, XmdError::Eval(EvalError::OutputLimit(10))));
    }

    #[test]
    fn imports_merge_definitions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("lib.md"),
            "<!-- xmd:\nfunction greet who\n  return \"Hi \" + who\n-->\n<!-- xmd:set site \"docs\" -->\n",
        )
        .unwrap();
        let main = dir.path().join("main.md");
        std::fs::write(&main, "<!-- xmd:import \"lib.md\" -->\n<!-- xmd:greet(\"Ann\") -->\n{{site}}\n").unwrap();

        let r = Interpreter::new().render_file(&main).unwrap();
        assert_eq!(r.output, "Hi Ann\ndocs\n");
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
    }

    #[test]
    fn circular_imports_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "A\n<!-- xmd:import \"b.md\" -->\n").unwrap();
        std::fs::write(dir.path().join("b.md"), "B\n<!-- xmd:import \"a.md\" -->\n").unwrap();

        let r = Interpreter::new().render_file(&dir.path().join("a.md")).unwrap();
        assert_eq!(r.output, "A\nB\n");
        assert_eq!(r.diagnostics.len(), 1);
        assert!(r.diagnostics[0].message.contains("circular"), "{}", r.diagnostics[0]);
    }
}
